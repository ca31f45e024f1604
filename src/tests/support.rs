//! Shared fixtures: a scripted compute engine, a store that always fails and a manual clock.

use crate::{
    cache::MetricKey,
    clock::ManualClock,
    config::CoordinatorConfig,
    db::{MemoryStore, MetricStore, StoreError},
    models::{ActivitySignal, CacheEntry, RefreshLogPatch},
    refresh::RefreshCoordinator,
    upstream::{ComputeEngine, ComputeError, Computed},
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wednesday 15:00 UTC, inside the default active hours.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 15, 0, 0).unwrap()
}

pub fn entry_aged(value: serde_json::Value, age_seconds: i64, ttl_seconds: u64) -> CacheEntry {
    CacheEntry::new(value, t0() - chrono::Duration::seconds(age_seconds), ttl_seconds)
}

/// Counts calls and tracks how many computations overlap.
pub struct ScriptedEngine {
    delay: Duration,
    failure: Option<fn() -> ComputeError>,
    ttl_hint: Option<u64>,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            failure: None,
            ttl_hint: None,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, failure: fn() -> ComputeError) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn with_ttl_hint(mut self, ttl_seconds: u64) -> Self {
        self.ttl_hint = Some(ttl_seconds);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeEngine for ScriptedEngine {
    async fn compute(&self, key: &MetricKey) -> Result<Computed, ComputeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        if let Some(failure) = self.failure {
            return Err(failure());
        }
        let mut computed = Computed::new(json!({ "subject": key.subject, "call": call }));
        if let Some(ttl) = self.ttl_hint {
            computed = computed.with_ttl_hint(ttl);
        }
        Ok(computed)
    }
}

/// Every operation fails as if the database were down.
pub struct UnavailableStore;

fn down() -> StoreError {
    StoreError::Unavailable("database is down".to_string())
}

#[async_trait]
impl MetricStore for UnavailableStore {
    async fn load_latest(&self, _key: &MetricKey) -> Result<Option<CacheEntry>, StoreError> {
        Err(down())
    }

    async fn upsert(&self, _key: &MetricKey, _entry: &CacheEntry) -> Result<(), StoreError> {
        Err(down())
    }

    async fn append_refresh_log(
        &self,
        _key: &MetricKey,
        _started_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        Err(down())
    }

    async fn update_refresh_log(&self, _id: i64, _patch: &RefreshLogPatch) -> Result<(), StoreError> {
        Err(down())
    }

    async fn read_activity_signal(
        &self,
        _key: &MetricKey,
        _now: DateTime<Utc>,
    ) -> Result<ActivitySignal, StoreError> {
        Err(down())
    }

    async fn recommended_ttl(&self, _key: &MetricKey) -> Result<Option<u64>, StoreError> {
        Err(down())
    }
}

pub struct Fixture {
    pub clock: ManualClock,
    pub store: Arc<MemoryStore>,
    pub coordinator: RefreshCoordinator,
}

impl Fixture {
    pub fn new(config: CoordinatorConfig) -> Self {
        let clock = ManualClock::new(t0());
        let store = Arc::new(MemoryStore::new());
        let coordinator =
            RefreshCoordinator::with_clock(config, store.clone(), Arc::new(clock.clone()))
                .expect("valid config");
        Self {
            clock,
            store,
            coordinator,
        }
    }

    pub async fn seed(&self, key: &MetricKey, entry: CacheEntry) {
        self.store.upsert(key, &entry).await.unwrap();
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new(CoordinatorConfig::default())
    }
}
