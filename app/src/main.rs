//! Interactive gallery runner.
//!
//! Each line typed on stdin becomes the saved search query. `/poll` toggles
//! background polling, `/clear` clears the query and `/quit` exits.

use futures::StreamExt;
use gallery::{GalleryController, GalleryState};
use poll::{bind_scheduler, ChannelNotifier, PeriodicPollScheduler, PollScheduler, Poller};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Duration;

mod config;
mod setup;

const SHOWN_ITEMS: usize = 20;

#[cfg_attr(feature = "trace-spans", tracing::instrument)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::AppConfig::load_from(None);
    let _guard = setup::init_logging(&cfg)?;

    println!("🚀 Starting PhotoGallery");
    if cfg.flickr_api_key.is_empty() {
        eprintln!("❌ Error: no Flickr API key configured.");
        eprintln!("💡 Set it using:");
        eprintln!("   export FLICKR_API_KEY=your_api_key");
        eprintln!("   or add flickr_api_key to {:?}", config::default_config_path());
        return Ok(());
    }

    let store = setup::open_store(&cfg)?;
    let api = setup::api_client(&cfg);
    let mut controller = GalleryController::new(store.clone(), api.clone());

    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let poller = Arc::new(Poller::new(
        store.clone(),
        api,
        Arc::new(ChannelNotifier::new(notify_tx)),
    ));
    let scheduler = Arc::new(
        PeriodicPollScheduler::new(poller, Duration::from_secs(cfg.poll_interval_minutes * 60))
            .with_constraints(setup::poll_constraints(&cfg), setup::network_probe(&cfg)),
    );
    let binding = bind_scheduler(&store, scheduler.clone());

    println!("📝 Type a search term and press enter. Commands: /poll, /clear, /quit");
    let mut states = controller.observe_gallery_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(state) = states.next() => render(&state),
            Some(id) = notify_rx.recv() => {
                println!("🔔 New pictures for your saved search (newest: {})", id);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&controller, line.trim()).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    binding.abort();
    scheduler.cancel();
    controller.shutdown();
    println!("👋 Bye");
    Ok(())
}

/// Returns `false` once the user asked to quit.
async fn handle_line(controller: &GalleryController, line: &str) -> bool {
    let result = match line {
        "/quit" => return false,
        "/poll" => controller.toggle_polling().await.map(|enabled| {
            println!("{}", if enabled { "⏰ Polling enabled" } else { "⏸️ Polling disabled" });
        }),
        "/clear" => controller.set_query("").await,
        query => controller.set_query(query).await,
    };
    if let Err(e) = result {
        eprintln!("❌ {}", e);
    }
    true
}

fn render(state: &GalleryState) {
    let query = if state.query.is_empty() {
        "(interesting photos)"
    } else {
        state.query.as_str()
    };
    println!(
        "🔎 {} | polling: {} | {} photos",
        query,
        if state.is_polling { "on" } else { "off" },
        state.items.len()
    );
    for item in state.items.iter().take(SHOWN_ITEMS) {
        println!("  {} {}", item.title, item.page_url());
    }
}
