//! Gallery state controller.
//!
//! Keeps one [`GalleryState`] in step with the persisted search query and polling
//! flag. Every new query value starts a fetch; only the fetch for the latest value
//! may touch the state.

use api_client::{ApiClientError, GalleryApi, GalleryItem};
use futures::StreamExt;
use prefs::{Observable, Observed, PreferencesStore, PrefsError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GalleryState {
    pub items: Vec<GalleryItem>,
    pub query: String,
    pub is_polling: bool,
}

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("Preferences Error: {0}")]
    Storage(#[from] PrefsError),
}

/// Lifecycle of the most recently started fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    Fetching,
    Applied,
    Failed,
}

/// Outcome of completing one fetch task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Completion {
    Applied,
    Failed,
    Discarded,
}

struct LiveFetch {
    ticket: u64,
    query: String,
    phase: FetchPhase,
    handle: Option<JoinHandle<()>>,
}

struct Inner {
    store: Arc<PreferencesStore>,
    api: Arc<dyn GalleryApi>,
    state: Observable<GalleryState>,
    live: Mutex<LiveFetch>,
}

impl Inner {
    fn live(&self) -> MutexGuard<'_, LiveFetch> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_fetch(self: &Arc<Self>, query: String) {
        let mut live = self.live();
        live.ticket += 1;
        let ticket = live.ticket;
        if let Some(previous) = live.handle.take() {
            if !previous.is_finished() {
                tracing::debug!(superseded = %live.query, "Discarding in-flight fetch");
                previous.abort();
            }
        }
        live.query = query.clone();
        live.phase = FetchPhase::Fetching;
        tracing::debug!(ticket, query = %query, "Fetching gallery items");

        let inner = Arc::clone(self);
        live.handle = Some(tokio::spawn(async move {
            let result = inner.fetch(&query).await;
            inner.complete(ticket, query, result);
        }));
    }

    async fn fetch(&self, query: &str) -> Result<Vec<GalleryItem>, ApiClientError> {
        if query.is_empty() {
            self.api.fetch_default().await
        } else {
            self.api.search(query).await
        }
    }

    fn complete(
        &self,
        ticket: u64,
        query: String,
        result: Result<Vec<GalleryItem>, ApiClientError>,
    ) -> Completion {
        // The ticket check and the state update happen under one lock, so a
        // newer query cannot slip in between them.
        let mut live = self.live();
        if live.ticket != ticket {
            tracing::debug!(ticket, query = %query, "Fetch superseded, result dropped");
            return Completion::Discarded;
        }
        match result {
            Ok(items) => {
                tracing::info!(query = %query, count = items.len(), "Gallery updated");
                self.state.update(|state| {
                    state.items = items;
                    state.query = query;
                });
                live.phase = FetchPhase::Applied;
                Completion::Applied
            }
            Err(e) => {
                tracing::error!(query = %query, error = %e, "Failed to fetch gallery items");
                live.phase = FetchPhase::Failed;
                Completion::Failed
            }
        }
    }
}

async fn follow_query(inner: Arc<Inner>, mut queries: Observed<String>) {
    while let Some(query) = queries.next().await {
        inner.start_fetch(query);
    }
}

async fn follow_polling(inner: Arc<Inner>, mut polling: Observed<bool>) {
    while let Some(is_polling) = polling.next().await {
        inner.state.update(|state| state.is_polling = is_polling);
    }
}

/// Owns the UI-facing gallery state. Must be created inside a tokio runtime.
pub struct GalleryController {
    inner: Arc<Inner>,
    tasks: Vec<JoinHandle<()>>,
}

impl GalleryController {
    pub fn new(store: Arc<PreferencesStore>, api: Arc<dyn GalleryApi>) -> Self {
        let queries = store.observe_stored_query();
        let polling = store.observe_is_polling_enabled();
        let inner = Arc::new(Inner {
            store,
            api,
            state: Observable::new(GalleryState::default()),
            live: Mutex::new(LiveFetch {
                ticket: 0,
                query: String::new(),
                phase: FetchPhase::Idle,
                handle: None,
            }),
        });
        let tasks = vec![
            tokio::spawn(follow_query(inner.clone(), queries)),
            tokio::spawn(follow_polling(inner.clone(), polling)),
        ];
        GalleryController { inner, tasks }
    }

    /// Current snapshot first, then every change.
    pub fn observe_gallery_state(&self) -> Observed<GalleryState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> GalleryState {
        self.inner.state.get()
    }

    pub fn fetch_phase(&self) -> FetchPhase {
        self.inner.live().phase
    }

    /// Persist a new search term. The fetch it triggers runs in the background.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn set_query(&self, text: &str) -> Result<(), GalleryError> {
        self.inner.store.set_stored_query(text.to_string()).await?;
        Ok(())
    }

    /// Flip the persisted polling flag. Returns the value written.
    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn toggle_polling(&self) -> Result<bool, GalleryError> {
        let enabled = !self.inner.state.get().is_polling;
        self.inner.store.set_polling_enabled(enabled).await?;
        tracing::info!(enabled, "Polling toggled");
        Ok(enabled)
    }

    /// Stop following the store and drop any in-flight fetch.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(handle) = self.inner.live().handle.take() {
            handle.abort();
        }
    }
}

impl Drop for GalleryController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
