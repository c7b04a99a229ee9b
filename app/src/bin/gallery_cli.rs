use clap::{Parser, Subcommand};
use futures::StreamExt;
use gallery::{FetchPhase, GalleryController};
use poll::{
    bind_scheduler, NotificationSink, PeriodicPollScheduler, PollOutcome, PollScheduler, Poller,
};
use prefs::PreferencesStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

#[path = "../config.rs"]
mod config;
#[path = "../setup.rs"]
mod setup;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(
    name = "gallery_cli",
    author,
    version,
    about = "PhotoGallery command line"
)]
struct Cli {
    /// Override log level (e.g. info, debug)
    #[arg(long)]
    log_level: Option<String>,
    /// Flickr API key (defaults to FLICKR_API_KEY)
    #[arg(long)]
    api_key: Option<String>,
    /// Override the Flickr API base URL
    #[arg(long)]
    api_base_url: Option<String>,
    /// Override poll interval in minutes
    #[arg(long)]
    poll_interval_minutes: Option<u64>,
    /// Directory holding preferences and logs
    #[arg(long)]
    data_path: Option<PathBuf>,
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Enable tokio console for debugging
    #[arg(long)]
    debug_console: bool,
    /// Enable tracing spans instrumentation
    #[arg(long)]
    trace_spans: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a search query
    Search {
        /// Search text
        text: String,
    },
    /// Clear the saved search query
    ClearSearch,
    /// Fetch and list photos for the saved query
    Show {
        /// Maximum number of photos to display
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Turn background polling on or off
    TogglePolling,
    /// Run a single background poll
    Poll,
    /// Show saved preferences
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Poll periodically until interrupted
    Watch,
    /// Forget all saved preferences
    Reset,
    /// Write the effective configuration to the config file
    InitConfig,
}

/// Prints announcements for the terminal user.
struct StdoutNotifier;

impl NotificationSink for StdoutNotifier {
    fn announce_new_result(&self, result_id: &str) {
        println!("🔔 New pictures available: {}", result_id);
    }
}

#[cfg_attr(feature = "trace-spans", tracing::instrument)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let overrides = config::AppConfigOverrides {
        log_level: cli.log_level.clone(),
        flickr_api_key: cli.api_key.clone(),
        api_base_url: cli.api_base_url.clone(),
        poll_interval_minutes: cli.poll_interval_minutes,
        data_path: cli.data_path.clone(),
        debug_console: cli.debug_console,
        trace_spans: cli.trace_spans,
    };
    let cfg = config::AppConfig::load_from(cli.config.clone()).apply_overrides(&overrides);
    let _guard = setup::init_logging(&cfg)?;

    let prefs_path = cfg.prefs_path();

    match cli.command {
        Commands::Search { text } => {
            let store = setup::open_store(&cfg)?;
            store.set_stored_query(text.clone()).await?;
            println!("Saved query: {}", text);
        }
        Commands::ClearSearch => {
            let store = setup::open_store(&cfg)?;
            store.set_stored_query(String::new()).await?;
            println!("Cleared saved query");
        }
        Commands::Show { limit } => {
            let store = setup::open_store(&cfg)?;
            let controller = GalleryController::new(store, setup::api_client(&cfg));
            let phase = wait_for_fetch(&controller).await;
            let state = controller.state();
            match phase {
                FetchPhase::Applied => {
                    let query = if state.query.is_empty() {
                        "interesting photos"
                    } else {
                        state.query.as_str()
                    };
                    println!("{} photos for {}", state.items.len(), query);
                    for item in state.items.iter().take(limit.unwrap_or(usize::MAX)) {
                        println!("{} - {} - {}", item.id, item.title, item.page_url());
                    }
                }
                FetchPhase::Failed => {
                    return Err("Fetching photos failed".into());
                }
                FetchPhase::Idle | FetchPhase::Fetching => {
                    return Err("Timed out fetching photos".into());
                }
            }
        }
        Commands::TogglePolling => {
            let store = setup::open_store(&cfg)?;
            let enabled = !store.is_polling_enabled();
            store.set_polling_enabled(enabled).await?;
            if enabled {
                println!("Polling enabled");
            } else {
                println!("Polling disabled");
            }
        }
        Commands::Poll => {
            let store = setup::open_store(&cfg)?;
            let poller = Poller::new(store, setup::api_client(&cfg), Arc::new(StdoutNotifier));
            let outcome = poller.run_poll_once().await;
            println!("Poll outcome: {}", outcome);
            if let PollOutcome::Failed(reason) = outcome {
                // Non-zero exit lets an external scheduler retry.
                return Err(format!("Poll failed: {}", reason).into());
            }
        }
        Commands::Status { json } => {
            if !prefs_path.exists() {
                println!("No preferences found at {:?}", prefs_path);
                return Ok(());
            }
            let store = PreferencesStore::open(&prefs_path)?;
            let prefs = store.snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&prefs)?);
                return Ok(());
            }
            if prefs.stored_query.is_empty() {
                println!("Saved query: none");
            } else {
                println!("Saved query: {}", prefs.stored_query);
            }
            if prefs.last_result_id.is_empty() {
                println!("Last result id: none");
            } else {
                println!("Last result id: {}", prefs.last_result_id);
            }
            println!(
                "Polling: {}",
                if prefs.is_polling_enabled { "enabled" } else { "disabled" }
            );
        }
        Commands::Watch => {
            let store = setup::open_store(&cfg)?;
            let api = setup::api_client(&cfg);
            let mut controller = GalleryController::new(store.clone(), api.clone());
            let mut states = controller.observe_gallery_state();
            let poller = Arc::new(Poller::new(store.clone(), api, Arc::new(StdoutNotifier)));
            let (tx, mut rx) = mpsc::unbounded_channel();
            let (err_tx, mut err_rx) = mpsc::unbounded_channel();
            let scheduler = Arc::new(
                PeriodicPollScheduler::new(
                    poller,
                    Duration::from_secs(cfg.poll_interval_minutes * 60),
                )
                .with_constraints(setup::poll_constraints(&cfg), setup::network_probe(&cfg))
                .with_reports(tx)
                .with_errors(err_tx),
            );
            let binding = bind_scheduler(&store, scheduler.clone());
            if !store.is_polling_enabled() {
                println!("Polling is disabled; run `gallery_cli toggle-polling` to enable it");
            }
            loop {
                tokio::select! {
                    Some(state) = states.next() => {
                        println!(
                            "Gallery: {} photos for {:?} (polling {})",
                            state.items.len(),
                            state.query,
                            if state.is_polling { "on" } else { "off" }
                        );
                    }
                    Some(outcome) = rx.recv() => println!("Poll outcome: {}", outcome),
                    Some(err) = err_rx.recv() => tracing::warn!(error = %err, "Periodic poll failed"),
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            binding.abort();
            scheduler.cancel();
            controller.shutdown();
        }
        Commands::InitConfig => {
            let path = cli.config.clone().unwrap_or_else(config::default_config_path);
            cfg.save_to(Some(path.clone()))?;
            println!("Wrote config to {:?}", path);
        }
        Commands::Reset => {
            if !prefs_path.exists() {
                println!("No preferences found at {:?}", prefs_path);
                return Ok(());
            }
            let store = PreferencesStore::open(&prefs_path)?;
            store.clear().await?;
            println!("Preferences reset");
        }
    }

    Ok(())
}

/// Wait until the first fetch settles or [`FETCH_TIMEOUT`] passes.
async fn wait_for_fetch(controller: &GalleryController) -> FetchPhase {
    let mut states = controller.observe_gallery_state();
    let settled = timeout(FETCH_TIMEOUT, async {
        loop {
            match controller.fetch_phase() {
                FetchPhase::Applied => return FetchPhase::Applied,
                FetchPhase::Failed => return FetchPhase::Failed,
                FetchPhase::Idle | FetchPhase::Fetching => {}
            }
            tokio::select! {
                _ = states.next() => {}
                _ = sleep(Duration::from_millis(50)) => {}
            }
        }
    })
    .await;
    settled.unwrap_or_else(|_| controller.fetch_phase())
}
