//! Periodic invocation of the [`Poller`].

use crate::{PollOutcome, Poller};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use prefs::PreferencesStore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(300);
/// Upper bound on how long an unmet constraint delays the next check.
const CONSTRAINT_RECHECK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Error)]
pub enum PollTaskError {
    #[error("Periodic poll failed: {0}")]
    PeriodicPollFailed(String),
}

/// Registration of the periodic poll, as seen by whoever toggles it.
pub trait PollScheduler: Send + Sync {
    /// Start periodic polling. Returns `false` if a registration already existed and was kept.
    fn register_periodic(&self) -> bool;

    /// Stop future polls. A poll that is already running still completes.
    /// Returns `false` if nothing was registered.
    fn cancel(&self) -> bool;

    fn is_registered(&self) -> bool;
}

/// Preconditions checked before each scheduled poll.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollConstraints {
    pub require_network: bool,
}

#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn is_available(&self) -> bool;
}

pub struct AlwaysAvailable;

#[async_trait]
impl NetworkProbe for AlwaysAvailable {
    async fn is_available(&self) -> bool {
        true
    }
}

/// Treats the network as available when `host` resolves.
pub struct DnsProbe {
    host: String,
}

impl DnsProbe {
    pub fn new(host: impl Into<String>) -> Self {
        DnsProbe { host: host.into() }
    }
}

#[async_trait]
impl NetworkProbe for DnsProbe {
    async fn is_available(&self) -> bool {
        match tokio::net::lookup_host((self.host.as_str(), 443)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                tracing::debug!(host = %self.host, error = %e, "Network probe failed");
                false
            }
        }
    }
}

#[derive(Clone)]
struct PollLoop {
    poller: Arc<Poller>,
    interval: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    constraints: PollConstraints,
    probe: Arc<dyn NetworkProbe>,
    report_tx: Option<mpsc::UnboundedSender<PollOutcome>>,
    error_tx: Option<mpsc::UnboundedSender<PollTaskError>>,
}

impl PollLoop {
    async fn constraints_met(&self) -> bool {
        !self.constraints.require_network || self.probe.is_available().await
    }

    fn report(&self, outcome: &PollOutcome) {
        if let Some(tx) = &self.report_tx {
            if let Err(e) = tx.send(outcome.clone()) {
                tracing::debug!(error = %e, "Poll report receiver dropped");
            }
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = self.initial_backoff;
        let mut last_success: Option<DateTime<Utc>> = None;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let wait = if !self.constraints_met().await {
                tracing::info!("Network unavailable, deferring poll");
                self.interval.min(CONSTRAINT_RECHECK)
            } else {
                let outcome = self.poller.run_poll_once().await;
                self.report(&outcome);
                match &outcome {
                    PollOutcome::Failed(reason) => {
                        let wait = backoff.min(self.max_backoff);
                        backoff = (backoff * 2).min(self.max_backoff);
                        let last = last_success
                            .map(|ts| ts.to_rfc3339())
                            .unwrap_or_else(|| "never".to_string());
                        let msg = format!("{} | last_success: {}", reason, last);
                        tracing::error!(backoff_ms = wait.as_millis() as u64, "Periodic poll failed");
                        if let Some(tx) = &self.error_tx {
                            if let Err(send_err) = tx.send(PollTaskError::PeriodicPollFailed(msg)) {
                                tracing::error!(error = ?send_err, "Failed to forward periodic poll error");
                            }
                        }
                        wait
                    }
                    _ => {
                        last_success = Some(Utc::now());
                        backoff = self.initial_backoff;
                        self.interval
                    }
                }
            };
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(wait) => {}
            }
        }
        tracing::info!("Periodic poll stopped");
    }
}

struct Registration {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Tokio-backed [`PollScheduler`]: polls immediately on registration, then every `interval`.
///
/// Failed polls are retried with exponential backoff instead of waiting a full interval.
pub struct PeriodicPollScheduler {
    config: PollLoop,
    registration: Mutex<Option<Registration>>,
}

impl PeriodicPollScheduler {
    pub fn new(poller: Arc<Poller>, interval: Duration) -> Self {
        PeriodicPollScheduler {
            config: PollLoop {
                poller,
                interval,
                initial_backoff: DEFAULT_INITIAL_BACKOFF,
                max_backoff: DEFAULT_MAX_BACKOFF,
                constraints: PollConstraints::default(),
                probe: Arc::new(AlwaysAvailable),
                report_tx: None,
                error_tx: None,
            },
            registration: Mutex::new(None),
        }
    }

    pub fn with_constraints(mut self, constraints: PollConstraints, probe: Arc<dyn NetworkProbe>) -> Self {
        self.config.constraints = constraints;
        self.config.probe = probe;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.initial_backoff = initial;
        self.config.max_backoff = max.max(initial);
        self
    }

    /// Receive every poll outcome.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<PollOutcome>) -> Self {
        self.config.report_tx = Some(tx);
        self
    }

    pub fn with_errors(mut self, tx: mpsc::UnboundedSender<PollTaskError>) -> Self {
        self.config.error_tx = Some(tx);
        self
    }

    fn registration(&self) -> MutexGuard<'_, Option<Registration>> {
        self.registration.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PollScheduler for PeriodicPollScheduler {
    fn register_periodic(&self) -> bool {
        let mut registration = self.registration();
        if let Some(existing) = registration.as_ref() {
            if !existing.handle.is_finished() {
                return false;
            }
        }
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.config.clone().run(shutdown_rx));
        *registration = Some(Registration { handle, shutdown });
        tracing::info!(interval_secs = self.config.interval.as_secs(), "Periodic poll registered");
        true
    }

    fn cancel(&self) -> bool {
        match self.registration().take() {
            Some(registration) => {
                // The loop may already be gone; nothing else to stop then.
                let _ = registration.shutdown.send(true);
                tracing::info!("Periodic poll cancelled");
                true
            }
            None => false,
        }
    }

    fn is_registered(&self) -> bool {
        self.registration()
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }
}

/// Keep `scheduler` registered exactly while the stored polling flag is on.
pub fn bind_scheduler(store: &PreferencesStore, scheduler: Arc<dyn PollScheduler>) -> JoinHandle<()> {
    let mut flags = store.observe_is_polling_enabled();
    tokio::spawn(async move {
        while let Some(enabled) = flags.next().await {
            if enabled {
                if !scheduler.register_periodic() {
                    tracing::debug!("Periodic poll already registered, keeping it");
                }
            } else {
                scheduler.cancel();
            }
        }
    })
}
