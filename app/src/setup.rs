//! Startup wiring shared by the gallery binaries.

use crate::config::AppConfig;
use api_client::ApiClient;
use poll::{AlwaysAvailable, DnsProbe, NetworkProbe, PollConstraints};
use prefs::{PreferencesStore, PrefsError};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Keep the returned guard alive to flush the log file.
pub fn init_logging(cfg: &AppConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    if start_console(cfg) {
        return Ok(None);
    }

    std::fs::create_dir_all(&cfg.data_path)?;
    let file_appender = rolling::daily(&cfg.data_path, "photogallery.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cfg.log_level.clone()))
        .with_span_events(span_events(cfg))
        .with_writer(std::io::stderr.and(file_writer))
        .init();
    Ok(Some(guard))
}

/// With `trace_spans` on, span open and close are logged as events.
fn span_events(cfg: &AppConfig) -> FmtSpan {
    if cfg.trace_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

#[cfg(feature = "tokio-console")]
fn start_console(cfg: &AppConfig) -> bool {
    if cfg.debug_console {
        console_subscriber::init();
    }
    cfg.debug_console
}

#[cfg(not(feature = "tokio-console"))]
fn start_console(cfg: &AppConfig) -> bool {
    if cfg.debug_console {
        eprintln!("tokio-console support not compiled in; rebuild with --features tokio-console");
    }
    false
}

/// Open the durable store, falling back to an in-memory one if the file is unusable.
pub fn open_store(cfg: &AppConfig) -> Result<Arc<PreferencesStore>, PrefsError> {
    let path = cfg.prefs_path();
    if let Err(e) = std::fs::create_dir_all(&cfg.data_path) {
        tracing::warn!(error = %e, path = ?cfg.data_path, "Failed to create data directory");
    }
    match PreferencesStore::open(&path) {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) => {
            tracing::error!(error = %e, path = ?path, "Preferences unavailable, changes will not persist");
            PreferencesStore::in_memory().map(Arc::new)
        }
    }
}

pub fn api_client(cfg: &AppConfig) -> Arc<ApiClient> {
    if cfg.flickr_api_key.is_empty() {
        tracing::warn!("No Flickr API key configured; set FLICKR_API_KEY or flickr_api_key");
    }
    Arc::new(ApiClient::with_base_url(
        cfg.flickr_api_key.clone(),
        cfg.api_base_url.clone(),
    ))
}

pub fn poll_constraints(cfg: &AppConfig) -> PollConstraints {
    PollConstraints {
        require_network: cfg.require_network,
    }
}

/// Probe that resolves the configured API host.
pub fn network_probe(cfg: &AppConfig) -> Arc<dyn NetworkProbe> {
    match url::Url::parse(&cfg.api_base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
    {
        Some(host) => Arc::new(DnsProbe::new(host)),
        None => {
            tracing::warn!(url = %cfg.api_base_url, "Cannot derive host for network probe");
            Arc::new(AlwaysAvailable)
        }
    }
}
