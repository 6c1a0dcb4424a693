//! Direct-write datastore transport.
//!
//! Inserts health records straight into a SQLite database with insert-one
//! semantics, for deployments where the agent shares storage with the
//! backend instead of going through its API. Success is signaled by the
//! generated row id, which becomes the surfaced resource locator.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::dispatch::{Accepted, Transport, TransportError};
use crate::types::{
    UploadRecord, READING_FAN, READING_FREQUENCY, READING_TEMPERATURE, READING_THROTTLED,
};

/// Maximum connections in the pool.
const MAX_CONNECTIONS: u32 = 2;

/// Pool acquire timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn default_url() -> String {
    "sqlite:sortwatch.db".to_string()
}

fn default_collection() -> String {
    "rpihealthlogs".to_string()
}

/// Configuration for the direct-write datastore transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatastoreTransportConfig {
    /// SQLite connection URL (default `sqlite:sortwatch.db`).
    #[serde(default = "default_url")]
    pub url: String,
    /// Target collection (table) name.
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for DatastoreTransportConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            collection: default_collection(),
        }
    }
}

/// Reject collection names that cannot be used as a bare SQL identifier.
fn validate_collection(name: &str) -> Result<(), TransportError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(TransportError::Config(format!(
            "invalid collection name: {name:?}"
        )))
    }
}

/// Direct-write transport into a SQLite datastore.
pub struct DatastoreTransport {
    pool: SqlitePool,
    collection: String,
}

impl DatastoreTransport {
    /// Connect to the datastore and ensure the collection exists.
    ///
    /// # Errors
    /// `TransportError::Config` for an invalid URL or collection name,
    /// `TransportError::Connection` when the database cannot be reached.
    pub async fn connect(config: &DatastoreTransportConfig) -> Result<Self, TransportError> {
        validate_collection(&config.collection)?;

        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| TransportError::Config(format!("invalid datastore url: {e}")))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                device_id TEXT NOT NULL,
                temperature REAL NOT NULL,
                fan_state TEXT NOT NULL,
                cpu_frequency REAL NOT NULL,
                throttle_status TEXT NOT NULL,
                payload TEXT
            )",
            config.collection
        ))
        .execute(&pool)
        .await
        .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            collection: config.collection.clone(),
        })
    }
}

impl std::fmt::Debug for DatastoreTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatastoreTransport")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Transport for DatastoreTransport {
    fn name(&self) -> &str {
        "datastore"
    }

    async fn send(&self, record: &UploadRecord) -> Result<Accepted, TransportError> {
        let Some(sample) = &record.sample else {
            return Err(TransportError::Rejected {
                status: None,
                diagnostic: Some("datastore transport carries health samples only".into()),
            });
        };

        let payload = serde_json::to_string(&sample.readings).ok();

        let result = sqlx::query(&format!(
            "INSERT INTO {} (ts, device_id, temperature, fan_state, cpu_frequency, throttle_status, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            self.collection
        ))
        .bind(sample.ts.to_rfc3339())
        .bind(&record.device_id)
        .bind(sample.number_or(READING_TEMPERATURE, 0.0))
        .bind(sample.text_or(READING_FAN, "N/A"))
        .bind(sample.number_or(READING_FREQUENCY, 0.0))
        .bind(sample.text_or(READING_THROTTLED, "0x0"))
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| TransportError::Connection(e.to_string()))?;

        let id = result.last_insert_rowid();
        if id == 0 {
            return Err(TransportError::Rejected {
                status: None,
                diagnostic: Some("datastore returned no record id".into()),
            });
        }

        Ok(Accepted {
            resource: Some(format!("{}/{}", self.collection, id)),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
