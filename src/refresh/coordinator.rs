//! Stale-while-revalidate coordination of computed metrics.
//!
//! A read goes memory → store → refresh:
//!
//! - a fresh memory entry is served as-is;
//! - otherwise the latest stored entry is classified: fresh entries are served, stale entries
//!   are served while one background refresh is scheduled, and expired or missing entries are
//!   recomputed synchronously;
//! - synchronous refreshes are deduplicated per key and bounded across keys, and a failed or
//!   timed-out refresh falls back to the last known value when there is one.

use crate::cache::{MemoryCache, MetricKey};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{ConfigError, CoordinatorConfig};
use crate::db::MetricStore;
use crate::models::{CacheEntry, Fetched, RefreshLogPatch, SourceTag};
use crate::refresh::error::CoordinatorError;
use crate::refresh::freshness::{Freshness, FreshnessClassifier, FreshnessWindow};
use crate::refresh::gate::ConcurrencyGate;
use crate::refresh::single_flight::{Flight, SingleFlight};
use crate::refresh::ttl::TtlEstimator;
use crate::upstream::{ComputeEngine, ComputeError, Computed, SharedEngine};
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Per-call options for [`RefreshCoordinator::get`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Skip the memory and store freshness checks and recompute now.
    pub force_refresh: bool,
    /// How long to wait on a synchronous refresh. Defaults to the configured request timeout.
    pub timeout: Option<Duration>,
}

impl GetOptions {
    pub fn forced() -> Self {
        Self {
            force_refresh: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
enum RefreshOutcome {
    Computed(CacheEntry),
    /// No refresh slot became free in time; nothing was computed.
    GateTimeout,
}

type RefreshResult = Result<RefreshOutcome, CoordinatorError>;

struct Inner {
    config: CoordinatorConfig,
    clock: SharedClock,
    memory: MemoryCache,
    store: Arc<dyn MetricStore>,
    classifier: FreshnessClassifier,
    ttl: TtlEstimator,
    gate: ConcurrencyGate,
    flights: SingleFlight<MetricKey, RefreshResult>,
    background: TaskTracker,
    background_slots: Arc<Semaphore>,
}

/// Serves computed metrics from memory, the persistent store or a fresh computation.
///
/// Cheap to clone; all clones share the same caches, gate and in-flight refreshes. Build one
/// per process and hand it to every call site.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

fn newest(a: Option<CacheEntry>, b: Option<CacheEntry>) -> Option<CacheEntry> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.computed_at > a.computed_at { b } else { a }),
        (a, b) => a.or(b),
    }
}

impl RefreshCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn MetricStore>,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: CoordinatorConfig,
        store: Arc<dyn MetricStore>,
        clock: SharedClock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let inner = Inner {
            memory: MemoryCache::new(config.memory_capacity, clock.clone()),
            classifier: FreshnessClassifier::from_config(&config),
            ttl: TtlEstimator::new(store.clone(), clock.clone(), &config),
            gate: ConcurrencyGate::new(config.max_concurrent_refreshes),
            flights: SingleFlight::new(),
            background: TaskTracker::new(),
            background_slots: Arc::new(Semaphore::new(config.max_background_refreshes.max(1))),
            config,
            clock,
            store,
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn freshness_window(&self, computed_at: DateTime<Utc>, ttl_seconds: u64) -> FreshnessWindow {
        self.inner.classifier.window(computed_at, ttl_seconds)
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.inner.gate
    }

    /// Number of keys with a refresh currently running.
    pub fn refreshes_in_flight(&self) -> usize {
        self.inner.flights.len()
    }

    /// Serve `key`, computing it with `engine` when nothing fresh enough is cached.
    pub async fn get(
        &self,
        key: &MetricKey,
        engine: SharedEngine,
        options: GetOptions,
    ) -> Result<Fetched, CoordinatorError> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let in_memory = inner.memory.get(key).await;

        if !options.force_refresh {
            if let Some(entry) = &in_memory {
                if inner.classifier.classify(entry, now) == Freshness::Fresh {
                    debug!(%key, "serving fresh value from memory");
                    return Ok(Fetched::from_entry(entry.clone(), SourceTag::Memory));
                }
            }
        }

        let stored = match inner.store.load_latest(key).await {
            Ok(stored) => stored,
            Err(e) => {
                let err = CoordinatorError::from(e);
                warn!(%key, error = %err, "store read failed, continuing from memory");
                None
            }
        };
        let known = newest(stored, in_memory);

        if !options.force_refresh {
            if let Some(entry) = &known {
                match inner.classifier.classify(entry, now) {
                    Freshness::Fresh => {
                        inner.memory.set(key.clone(), entry.clone()).await;
                        return Ok(Fetched::from_entry(entry.clone(), SourceTag::StoreFresh));
                    }
                    Freshness::Stale => {
                        inner
                            .memory
                            .set_with_ttl(key.clone(), entry.clone(), inner.config.stale_local_ttl)
                            .await;
                        self.spawn_background_refresh(key.clone(), engine);
                        return Ok(Fetched::from_entry(entry.clone(), SourceTag::StoreStale));
                    }
                    Freshness::Expired => debug!(%key, "cached value expired, refreshing"),
                }
            }
        }

        self.refresh_and_wait(key, engine, known, options.timeout)
            .await
    }

    /// Drop the in-memory entry for `key`. The stored value is untouched.
    pub async fn invalidate(&self, key: &MetricKey) {
        self.inner.memory.invalidate(key).await;
    }

    /// Wait for every background refresh spawned so far.
    pub async fn wait_for_background(&self) {
        let background = &self.inner.background;
        background.close();
        background.wait().await;
        background.reopen();
    }

    pub async fn shutdown(&self) {
        info!(
            pending = self.inner.background.len(),
            "waiting for background refreshes"
        );
        self.inner.background.close();
        self.inner.background.wait().await;
        info!("refresh coordinator stopped");
    }

    async fn refresh_and_wait(
        &self,
        key: &MetricKey,
        engine: SharedEngine,
        fallback: Option<CacheEntry>,
        timeout: Option<Duration>,
    ) -> Result<Fetched, CoordinatorError> {
        let flight = self.start_refresh(key.clone(), engine);
        let joined = flight.joined;
        let wait = timeout.unwrap_or(self.inner.config.request_timeout);

        // Giving up here leaves the refresh running for the other waiters
        let result = match tokio::time::timeout(wait, flight.wait()).await {
            Ok(Ok(result)) => result,
            Ok(Err(aborted)) => Err(CoordinatorError::UpstreamCompute {
                key: key.to_string(),
                message: aborted.to_string(),
            }),
            Err(_elapsed) => {
                warn!(%key, waited_ms = wait.as_millis() as u64, "gave up waiting for refresh");
                Ok(RefreshOutcome::GateTimeout)
            }
        };

        match result {
            Ok(RefreshOutcome::Computed(entry)) => {
                let source = if joined {
                    SourceTag::ComputeLocked
                } else {
                    SourceTag::ComputeFresh
                };
                Ok(Fetched::from_entry(entry, source))
            }
            Ok(RefreshOutcome::GateTimeout) => self.fall_back(
                key,
                fallback,
                CoordinatorError::GateTimeout {
                    key: key.to_string(),
                },
            ),
            Err(err) => self.fall_back(key, fallback, err),
        }
    }

    fn fall_back(
        &self,
        key: &MetricKey,
        fallback: Option<CacheEntry>,
        err: CoordinatorError,
    ) -> Result<Fetched, CoordinatorError> {
        let Some(entry) = fallback else {
            return Err(match err {
                CoordinatorError::UpstreamCompute { key, message } => {
                    CoordinatorError::NoData { key, message }
                }
                other => other,
            });
        };

        warn!(%key, error = %err, computed_at = %entry.computed_at, "serving last known value");
        let source = match self.inner.classifier.classify(&entry, self.inner.clock.now()) {
            Freshness::Fresh => SourceTag::StoreFresh,
            Freshness::Stale => SourceTag::StoreStale,
            Freshness::Expired => SourceTag::StoreExpiredFallback,
        };
        Ok(Fetched::from_entry(entry, source))
    }

    fn start_refresh(&self, key: MetricKey, engine: SharedEngine) -> Flight<RefreshResult> {
        let this = self.clone();
        let task_key = key.clone();
        self.inner
            .flights
            .run_exclusive(key, async move { this.refresh(&task_key, engine).await })
    }

    fn spawn_background_refresh(&self, key: MetricKey, engine: SharedEngine) {
        if self.inner.flights.is_in_flight(&key) {
            debug!(%key, "refresh already in flight");
            return;
        }

        let Ok(slot) = Arc::clone(&self.inner.background_slots).try_acquire_owned() else {
            warn!(%key, "background refresh pool is full, dropping refresh");
            return;
        };

        debug!(%key, "spawning background refresh");
        let flight = self.start_refresh(key.clone(), engine);
        self.inner.background.spawn(async move {
            let _slot = slot;
            match flight.wait().await {
                Ok(Ok(RefreshOutcome::Computed(_))) => debug!(%key, "background refresh finished"),
                Ok(Ok(RefreshOutcome::GateTimeout)) => {
                    warn!(%key, "background refresh found no free slot")
                }
                Ok(Err(err)) => warn!(%key, error = %err, "background refresh failed"),
                Err(err) => warn!(%key, error = %err, "background refresh aborted"),
            }
        });
    }

    /// Runs inside the single-flight task for `key`.
    async fn refresh(&self, key: &MetricKey, engine: SharedEngine) -> RefreshResult {
        let inner = &self.inner;
        let Some(_permit) = inner.gate.acquire(inner.config.gate_acquire_timeout).await else {
            warn!(%key, in_flight = inner.gate.in_flight(), "no refresh slot available");
            return Ok(RefreshOutcome::GateTimeout);
        };

        let started = Instant::now();
        let log_id = match inner.store.append_refresh_log(key, inner.clock.now()).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(%key, error = %e, "failed to append refresh log");
                None
            }
        };

        // A panicking engine must still close its log row and release the waiters
        let attempt = AssertUnwindSafe(self.compute_with_retry(key, engine.as_ref()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ComputeError::Failed("compute engine panicked".to_string())));

        match attempt {
            Ok(computed) => {
                let ttl = match computed.ttl_hint_seconds {
                    Some(hint) => inner.config.clamp_ttl(hint),
                    None => inner.ttl.estimate(key).await,
                };
                let entry = CacheEntry::new(computed.value, inner.clock.now(), ttl)
                    .with_metadata(computed.metadata);

                if let Err(e) = inner.store.upsert(key, &entry).await {
                    warn!(%key, error = %e, "failed to persist refreshed value, keeping it in memory only");
                }
                self.finish_log(key, log_id, RefreshLogPatch::success(inner.clock.now(), ttl))
                    .await;
                inner.memory.set(key.clone(), entry.clone()).await;

                info!(
                    %key,
                    ttl,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "refreshed metric"
                );
                Ok(RefreshOutcome::Computed(entry))
            }
            Err(err) => {
                self.finish_log(key, log_id, RefreshLogPatch::failed(inner.clock.now(), &err))
                    .await;
                error!(%key, error = %err, "metric compute failed");
                Err(CoordinatorError::UpstreamCompute {
                    key: key.to_string(),
                    message: err.to_string(),
                })
            }
        }
    }

    /// One compute call plus at most `compute_retries` (0 or 1) retries for retryable errors.
    async fn compute_with_retry(
        &self,
        key: &MetricKey,
        engine: &dyn ComputeEngine,
    ) -> Result<Computed, ComputeError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.inner.config.retry_delay)
            .with_max_times(self.inner.config.compute_retries);

        (move || async move { engine.compute(key).await })
            .retry(backoff)
            .when(ComputeError::is_retryable)
            .notify(|err: &ComputeError, dur: Duration| {
                warn!(%key, error = %err, retry_in_ms = dur.as_millis() as u64, "retrying compute");
            })
            .await
    }

    async fn finish_log(&self, key: &MetricKey, log_id: Option<i64>, patch: RefreshLogPatch) {
        let Some(id) = log_id else {
            return;
        };
        if let Err(e) = self.inner.store.update_refresh_log(id, &patch).await {
            warn!(%key, error = %e, "failed to update refresh log");
        }
    }
}
