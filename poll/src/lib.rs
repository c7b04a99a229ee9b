//! Background check for new results on the saved search.

pub mod scheduler;

pub use scheduler::{
    bind_scheduler, AlwaysAvailable, DnsProbe, NetworkProbe, PeriodicPollScheduler,
    PollConstraints, PollScheduler, PollTaskError,
};

use api_client::GalleryApi;
use prefs::PreferencesStore;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No saved query. Counts as success.
    Skipped,
    Unchanged,
    NewResult(String),
    Failed(String),
}

impl PollOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, PollOutcome::Failed(_))
    }

    pub fn new_result_found(&self) -> bool {
        matches!(self, PollOutcome::NewResult(_))
    }

    pub fn newest_id(&self) -> Option<&str> {
        match self {
            PollOutcome::NewResult(id) => Some(id),
            _ => None,
        }
    }
}

impl std::fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PollOutcome::Skipped => write!(f, "skipped (no saved query)"),
            PollOutcome::Unchanged => write!(f, "unchanged"),
            PollOutcome::NewResult(id) => write!(f, "new result {}", id),
            PollOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Receives "new pictures" announcements. Presentation is up to the implementor.
pub trait NotificationSink: Send + Sync {
    fn announce_new_result(&self, result_id: &str);
}

/// Writes announcements to the log.
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn announce_new_result(&self, result_id: &str) {
        tracing::info!(result_id, "New pictures available");
    }
}

/// Forwards announced ids to a channel.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        ChannelNotifier { tx }
    }
}

impl NotificationSink for ChannelNotifier {
    fn announce_new_result(&self, result_id: &str) {
        if let Err(e) = self.tx.send(result_id.to_string()) {
            tracing::error!(error = %e, "Failed to forward notification");
        }
    }
}

pub struct Poller {
    store: Arc<PreferencesStore>,
    api: Arc<dyn GalleryApi>,
    notifier: Arc<dyn NotificationSink>,
    // Held for a whole poll; a second caller waits and then sees the first one's write.
    running: tokio::sync::Mutex<()>,
}

impl Poller {
    pub fn new(
        store: Arc<PreferencesStore>,
        api: Arc<dyn GalleryApi>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Poller {
            store,
            api,
            notifier,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Check the saved search once and announce its newest item if it was not seen before.
    ///
    /// `last_result_id` is written before the notifier is called, so a crash in
    /// between can only lose an announcement, never repeat one. Overlapping calls
    /// on one `Poller` run one after the other.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn run_poll_once(&self) -> PollOutcome {
        let _running = self.running.lock().await;
        let query = self.store.read_stored_query().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read saved query, using default");
            String::new()
        });
        let last_id = self.store.read_last_result_id().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to read last result id, using default");
            String::new()
        });

        if query.is_empty() {
            tracing::info!("No saved query, finishing early.");
            return PollOutcome::Skipped;
        }

        let items = match self.api.search(&query).await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "Background update failed");
                return PollOutcome::Failed(e.to_string());
            }
        };

        let Some(newest) = items.first() else {
            tracing::info!(query = %query, "Search returned no results");
            return PollOutcome::Unchanged;
        };

        if newest.id == last_id {
            tracing::info!(result_id = %newest.id, "Still have the same result");
            return PollOutcome::Unchanged;
        }

        tracing::info!(result_id = %newest.id, "Got a new result");
        if let Err(e) = self.store.set_last_result_id(newest.id.clone()).await {
            tracing::error!(error = %e, "Failed to store last result id");
            return PollOutcome::Failed(e.to_string());
        }
        self.notifier.announce_new_result(&newest.id);
        PollOutcome::NewResult(newest.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        assert!(PollOutcome::Skipped.succeeded());
        assert!(PollOutcome::Unchanged.succeeded());
        assert!(!PollOutcome::Failed("x".into()).succeeded());

        let new = PollOutcome::NewResult("42".into());
        assert!(new.succeeded());
        assert!(new.new_result_found());
        assert_eq!(new.newest_id(), Some("42"));
        assert_eq!(PollOutcome::Unchanged.newest_id(), None);
    }

    #[tokio::test]
    async fn test_channel_notifier_forwards_id() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = ChannelNotifier::new(tx);
        notifier.announce_new_result("7");
        assert_eq!(rx.recv().await.as_deref(), Some("7"));
    }

    #[test]
    fn test_channel_notifier_survives_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        ChannelNotifier::new(tx).announce_new_result("7");
    }
}
