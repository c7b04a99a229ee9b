//! Persistent preferences for the photo gallery.
//!
//! Three independent fields live in a small SQLite table. Every field keeps its
//! current value in memory and hands out change streams; a write completes only
//! after the row has been committed.

pub mod observable;

pub use observable::{Observable, Observed};

use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const SEARCH_QUERY_KEY: &str = "search_query";
pub const LAST_RESULT_ID_KEY: &str = "lastResultId";
pub const IS_POLLING_KEY: &str = "isPolling";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PrefsError {
    #[error("Storage Unavailable: {0}")]
    StorageUnavailable(String),
}

/// Scalar types that can be stored in the preferences table.
pub trait PrefValue: Clone + PartialEq + Send + Sync + 'static {
    fn encode(&self) -> String;
    fn decode(raw: &str) -> Option<Self>;
}

impl PrefValue for String {
    fn encode(&self) -> String {
        self.clone()
    }

    fn decode(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }
}

impl PrefValue for bool {
    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

/// All three preferences at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub stored_query: String,
    pub last_result_id: String,
    pub is_polling_enabled: bool,
}

type SharedConn = Arc<Mutex<Connection>>;

fn apply_migrations(conn: &mut Connection) -> Result<(), PrefsError> {
    let migrations = Migrations::new(vec![M::up(
        "CREATE TABLE IF NOT EXISTS preferences (\
             key TEXT PRIMARY KEY,\
             value TEXT NOT NULL\
         );",
    )]);
    migrations
        .to_latest(conn)
        .map_err(|e| PrefsError::StorageUnavailable(format!("Failed to apply migrations: {}", e)))?;
    Ok(())
}

fn lock_conn(conn: &SharedConn) -> Result<std::sync::MutexGuard<'_, Connection>, PrefsError> {
    conn.lock()
        .map_err(|_| PrefsError::StorageUnavailable("Poisoned lock".into()))
}

fn read_raw(conn: &SharedConn, key: &str) -> Result<Option<String>, PrefsError> {
    let conn = lock_conn(conn)?;
    conn.query_row(
        "SELECT value FROM preferences WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(|e| PrefsError::StorageUnavailable(format!("Failed to read {}: {}", key, e)))
}

fn write_raw(conn: &SharedConn, key: &str, value: &str) -> Result<(), PrefsError> {
    let conn = lock_conn(conn)?;
    conn.execute(
        "INSERT INTO preferences (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )
    .map_err(|e| PrefsError::StorageUnavailable(format!("Failed to write {}: {}", key, e)))?;
    Ok(())
}

fn decode_or_default<T: PrefValue>(key: &str, raw: Option<String>, default: &T) -> T {
    match raw {
        None => default.clone(),
        Some(raw) => T::decode(&raw).unwrap_or_else(|| {
            tracing::warn!(key, value = %raw, "Stored preference is not decodable, using default");
            default.clone()
        }),
    }
}

struct Field<T> {
    key: &'static str,
    default: T,
    value: Arc<Observable<T>>,
    // Held across commit and notify so observers see writes in commit order.
    write_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<T: PrefValue> Field<T> {
    fn load(conn: &SharedConn, key: &'static str, default: T) -> Self {
        let initial = match read_raw(conn, key) {
            Ok(raw) => decode_or_default(key, raw, &default),
            Err(e) => {
                tracing::warn!(key, error = %e, "Failed to load preference, using default");
                default.clone()
            }
        };
        Field {
            key,
            default,
            value: Arc::new(Observable::new(initial)),
            write_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    async fn read(&self, conn: &SharedConn) -> Result<T, PrefsError> {
        let conn = conn.clone();
        let key = self.key;
        let raw = tokio::task::spawn_blocking(move || read_raw(&conn, key))
            .await
            .map_err(|e| PrefsError::StorageUnavailable(e.to_string()))??;
        Ok(decode_or_default(key, raw, &self.default))
    }

    /// Commit and notify run in their own task, so dropping the caller's
    /// future cannot leave the observers behind the database.
    async fn write(&self, conn: &SharedConn, value: T) -> Result<(), PrefsError> {
        let guard = self.write_lock.clone().lock_owned().await;
        let conn = conn.clone();
        let key = self.key;
        let observable = self.value.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let raw = value.encode();
            tokio::task::spawn_blocking(move || write_raw(&conn, key, &raw))
                .await
                .map_err(|e| PrefsError::StorageUnavailable(e.to_string()))??;
            if observable.set(value) {
                tracing::debug!(key, "Preference changed");
            }
            Ok::<(), PrefsError>(())
        })
        .await
        .map_err(|e| PrefsError::StorageUnavailable(e.to_string()))?
    }
}

/// Durable store for the search query, the last seen result id and the polling flag.
///
/// Create one per process and share it behind an `Arc`.
pub struct PreferencesStore {
    conn: SharedConn,
    stored_query: Field<String>,
    last_result_id: Field<String>,
    is_polling: Field<bool>,
}

impl PreferencesStore {
    pub fn open(db_path: &Path) -> Result<Self, PrefsError> {
        let conn = Connection::open(db_path)
            .map_err(|e| PrefsError::StorageUnavailable(format!("Failed to open database: {}", e)))?;
        Self::from_connection(conn)
    }

    /// Store that lives only as long as the process.
    pub fn in_memory() -> Result<Self, PrefsError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| PrefsError::StorageUnavailable(format!("Failed to open database: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, PrefsError> {
        apply_migrations(&mut conn)?;
        let conn = Arc::new(Mutex::new(conn));
        let store = PreferencesStore {
            stored_query: Field::load(&conn, SEARCH_QUERY_KEY, String::new()),
            last_result_id: Field::load(&conn, LAST_RESULT_ID_KEY, String::new()),
            is_polling: Field::load(&conn, IS_POLLING_KEY, false),
            conn,
        };
        tracing::info!(
            query = %store.stored_query(),
            polling = store.is_polling_enabled(),
            "Preferences loaded"
        );
        Ok(store)
    }

    pub fn stored_query(&self) -> String {
        self.stored_query.value.get()
    }

    pub fn last_result_id(&self) -> String {
        self.last_result_id.value.get()
    }

    pub fn is_polling_enabled(&self) -> bool {
        self.is_polling.value.get()
    }

    pub fn snapshot(&self) -> Preferences {
        Preferences {
            stored_query: self.stored_query(),
            last_result_id: self.last_result_id(),
            is_polling_enabled: self.is_polling_enabled(),
        }
    }

    /// Read the query straight from the database.
    pub async fn read_stored_query(&self) -> Result<String, PrefsError> {
        self.stored_query.read(&self.conn).await
    }

    pub async fn read_last_result_id(&self) -> Result<String, PrefsError> {
        self.last_result_id.read(&self.conn).await
    }

    pub async fn read_is_polling_enabled(&self) -> Result<bool, PrefsError> {
        self.is_polling.read(&self.conn).await
    }

    pub fn observe_stored_query(&self) -> Observed<String> {
        self.stored_query.value.subscribe()
    }

    pub fn observe_last_result_id(&self) -> Observed<String> {
        self.last_result_id.value.subscribe()
    }

    pub fn observe_is_polling_enabled(&self) -> Observed<bool> {
        self.is_polling.value.subscribe()
    }

    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn set_stored_query(&self, query: String) -> Result<(), PrefsError> {
        self.stored_query.write(&self.conn, query).await
    }

    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn set_last_result_id(&self, id: String) -> Result<(), PrefsError> {
        self.last_result_id.write(&self.conn, id).await
    }

    #[cfg_attr(feature = "trace-spans", tracing::instrument(skip(self)))]
    pub async fn set_polling_enabled(&self, enabled: bool) -> Result<(), PrefsError> {
        self.is_polling.write(&self.conn, enabled).await
    }

    /// Reset every field to its default.
    pub async fn clear(&self) -> Result<(), PrefsError> {
        self.set_stored_query(String::new()).await?;
        self.set_last_result_id(String::new()).await?;
        self.set_polling_enabled(false).await
    }
}
