pub mod activity;
pub mod connection;
pub mod memory;
pub mod metric;
pub mod migration;
pub mod refresh_log;
pub mod sqlite;

use crate::cache::MetricKey;
use crate::models::{ActivitySignal, CacheEntry, RefreshLogPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Durable key → latest-value table shared across processes, plus the refresh audit log and
/// the activity data used for TTL estimation.
///
/// Implementations hold no business logic. Callers treat every error as a degraded store
/// and carry on from memory.
#[async_trait]
pub trait MetricStore: Send + Sync + 'static {
    /// Latest stored entry for the key.
    async fn load_latest(&self, key: &MetricKey) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace the entry for the key. An older `computed_at` never overwrites a newer one.
    async fn upsert(&self, key: &MetricKey, entry: &CacheEntry) -> Result<(), StoreError>;

    /// Append a `running` refresh log row, returning its id.
    async fn append_refresh_log(
        &self,
        key: &MetricKey,
        started_at: DateTime<Utc>,
    ) -> Result<i64, StoreError>;

    async fn update_refresh_log(&self, id: i64, patch: &RefreshLogPatch) -> Result<(), StoreError>;

    /// Event counts and recency for the key's underlying source, as of `now`.
    async fn read_activity_signal(
        &self,
        key: &MetricKey,
        now: DateTime<Utc>,
    ) -> Result<ActivitySignal, StoreError>;

    /// Precomputed TTL maintained by the data layer, if it keeps one.
    async fn recommended_ttl(&self, _key: &MetricKey) -> Result<Option<u64>, StoreError> {
        Ok(None)
    }
}

pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp out of range: {}", ms)))
}
