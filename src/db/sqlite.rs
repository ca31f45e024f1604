use crate::cache::MetricKey;
use crate::db::{activity, metric, refresh_log, MetricStore, StoreError};
use crate::models::{ActivitySignal, CacheEntry, RefreshLogPatch, RefreshLogRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

/// `MetricStore` backed by a SQLite database shared by every process of a deployment.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record one underlying source event for the key's subject and metric.
    pub async fn record_event(
        &self,
        key: &MetricKey,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        activity::record_event(&self.pool, key, occurred_at).await
    }

    pub async fn set_recommended_ttl(
        &self,
        key: &MetricKey,
        ttl_seconds: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        activity::set_recommended_ttl(&self.pool, key, ttl_seconds, updated_at).await
    }

    pub async fn recent_refresh_logs(
        &self,
        key: &MetricKey,
        limit: i64,
    ) -> Result<Vec<RefreshLogRecord>, StoreError> {
        refresh_log::recent_refresh_logs(&self.pool, key, limit).await
    }
}

#[async_trait]
impl MetricStore for SqliteStore {
    async fn load_latest(&self, key: &MetricKey) -> Result<Option<CacheEntry>, StoreError> {
        metric::load_latest_metric(&self.pool, key).await
    }

    async fn upsert(&self, key: &MetricKey, entry: &CacheEntry) -> Result<(), StoreError> {
        metric::upsert_metric(&self.pool, key, entry).await
    }

    async fn append_refresh_log(
        &self,
        key: &MetricKey,
        started_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        refresh_log::append_refresh_log(&self.pool, key, started_at).await
    }

    async fn update_refresh_log(&self, id: i64, patch: &RefreshLogPatch) -> Result<(), StoreError> {
        refresh_log::update_refresh_log(&self.pool, id, patch).await
    }

    async fn read_activity_signal(
        &self,
        key: &MetricKey,
        now: DateTime<Utc>,
    ) -> Result<ActivitySignal, StoreError> {
        activity::read_activity_signal(&self.pool, key, now).await
    }

    async fn recommended_ttl(&self, key: &MetricKey) -> Result<Option<u64>, StoreError> {
        activity::recommended_ttl(&self.pool, key).await
    }
}
