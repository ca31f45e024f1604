//! In-process `MetricStore`, for single-node deployments without a database and for tests.

use crate::cache::MetricKey;
use crate::db::{MetricStore, StoreError};
use crate::models::{ActivitySignal, CacheEntry, RefreshLogPatch, RefreshLogRecord, RefreshStatus};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    values: HashMap<MetricKey, CacheEntry>,
    refresh_log: Vec<RefreshLogRecord>,
    /// (subject, metric) → event timestamps
    events: HashMap<(String, String), Vec<DateTime<Utc>>>,
    ttl_hints: HashMap<(String, String), u64>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

fn source_of(key: &MetricKey) -> (String, String) {
    (key.subject.clone(), key.metric.clone())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_event(&self, key: &MetricKey, occurred_at: DateTime<Utc>) {
        self.tables()
            .events
            .entry(source_of(key))
            .or_default()
            .push(occurred_at);
    }

    pub fn set_recommended_ttl(&self, key: &MetricKey, ttl_seconds: u64) {
        self.tables().ttl_hints.insert(source_of(key), ttl_seconds);
    }

    /// All refresh log rows in insertion order.
    pub fn refresh_logs(&self) -> Vec<RefreshLogRecord> {
        self.tables().refresh_log.clone()
    }

    pub fn stored(&self, key: &MetricKey) -> Option<CacheEntry> {
        self.tables().values.get(key).cloned()
    }
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn load_latest(&self, key: &MetricKey) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.stored(key))
    }

    async fn upsert(&self, key: &MetricKey, entry: &CacheEntry) -> Result<(), StoreError> {
        let mut tables = self.tables();
        match tables.values.get(key) {
            Some(existing) if existing.computed_at > entry.computed_at => {}
            _ => {
                tables.values.insert(key.clone(), entry.clone());
            }
        }
        Ok(())
    }

    async fn append_refresh_log(
        &self,
        key: &MetricKey,
        started_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let mut tables = self.tables();
        let id = tables.refresh_log.len() as i64 + 1;
        tables.refresh_log.push(RefreshLogRecord {
            id,
            key: key.to_string(),
            started_at,
            completed_at: None,
            status: RefreshStatus::Running,
            ttl_used: None,
            error_message: None,
        });
        Ok(id)
    }

    async fn update_refresh_log(&self, id: i64, patch: &RefreshLogPatch) -> Result<(), StoreError> {
        let mut tables = self.tables();
        let record = tables
            .refresh_log
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| StoreError::Corrupt(format!("no refresh log with id {}", id)))?;
        record.completed_at = Some(patch.completed_at);
        record.status = patch.status;
        record.ttl_used = patch.ttl_used;
        record.error_message = patch.error_message.clone();
        Ok(())
    }

    async fn read_activity_signal(
        &self,
        key: &MetricKey,
        now: DateTime<Utc>,
    ) -> Result<ActivitySignal, StoreError> {
        let tables = self.tables();
        let Some(events) = tables.events.get(&source_of(key)) else {
            return Ok(ActivitySignal::default());
        };

        let day_ago = now - Duration::hours(24);
        let week_ago = now - Duration::days(7);
        Ok(ActivitySignal {
            events_last_24h: events.iter().filter(|at| **at >= day_ago).count() as u64,
            events_last_7d: events.iter().filter(|at| **at >= week_ago).count() as u64,
            last_event_at: events.iter().max().copied(),
        })
    }

    async fn recommended_ttl(&self, key: &MetricKey) -> Result<Option<u64>, StoreError> {
        Ok(self
            .tables()
            .ttl_hints
            .get(&source_of(key))
            .copied()
            .filter(|ttl| *ttl > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_keeps_newest_entry() {
        let store = MemoryStore::new();
        let key = MetricKey::new("AAPL", "quote");
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap();

        store.upsert(&key, &CacheEntry::new(json!(2), t0 + Duration::minutes(5), 60)).await.unwrap();
        store.upsert(&key, &CacheEntry::new(json!(1), t0, 60)).await.unwrap();

        let latest = store.load_latest(&key).await.unwrap().unwrap();
        assert_eq!(latest.value, json!(2));
    }

    #[tokio::test]
    async fn test_activity_signal_windows() {
        let store = MemoryStore::new();
        let key = MetricKey::new("AAPL", "insider-sentiment");
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 15, 0, 0).unwrap();
        store.record_event(&key, now - Duration::hours(1));
        store.record_event(&key, now - Duration::days(3));
        store.record_event(&key, now - Duration::days(30));

        let signal = store.read_activity_signal(&key, now).await.unwrap();
        assert_eq!(signal.events_last_24h, 1);
        assert_eq!(signal.events_last_7d, 2);
        assert_eq!(signal.last_event_at, Some(now - Duration::hours(1)));
    }
}
