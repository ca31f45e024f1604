//! Process-local metric cache implementation using Moka

use super::keys::MetricKey;
use crate::clock::{offset_millis, offset_seconds, SharedClock};
use crate::models::CacheEntry;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest moka keeps an item, whatever its TTL. Reads still decide liveness by deadline.
const MAX_RESIDENCY: Duration = Duration::from_secs(30 * 86_400);

/// An entry together with the moment it stops being served from memory.
#[derive(Debug, Clone)]
struct MemoryItem {
    entry: CacheEntry,
    deadline: DateTime<Utc>,
    /// Wall time left at insertion, used only to bound how long moka keeps the item around.
    evict_after: Duration,
}

/// Hands each item's own lifetime to moka so expired items are eventually dropped even
/// when nobody reads them again.
struct ItemExpiration;

impl moka::Expiry<MetricKey, MemoryItem> for ItemExpiration {
    fn expire_after_create(
        &self,
        _key: &MetricKey,
        value: &MemoryItem,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.evict_after)
    }

    fn expire_after_update(
        &self,
        _key: &MetricKey,
        value: &MemoryItem,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.evict_after)
    }
}

/// Process-local TTL-bounded cache of metric entries.
///
/// Expiry is decided lazily against the injected clock: an item past its deadline (or an
/// entry past its own TTL) is evicted on read and reported as absent.
#[derive(Clone)]
pub struct MemoryCache {
    cache: Cache<MetricKey, MemoryItem>,
    clock: SharedClock,
}

impl MemoryCache {
    /// Create a new memory cache
    pub fn new(capacity: u64, clock: SharedClock) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .expire_after(ItemExpiration)
            .build();

        Self { cache, clock }
    }

    /// Get a live entry, evicting it if it has expired
    pub async fn get(&self, key: &MetricKey) -> Option<CacheEntry> {
        let item = self.cache.get(key).await;
        let Some(item) = item else {
            debug!(%key, "memory cache miss");
            return None;
        };

        let now = self.clock.now();
        if now >= item.deadline || item.entry.is_past_ttl(now) {
            self.cache.invalidate(key).await;
            debug!(%key, "memory cache entry expired, evicted");
            return None;
        }

        debug!(%key, "memory cache hit");
        Some(item.entry)
    }

    /// Store an entry for the remainder of its own TTL
    pub async fn set(&self, key: MetricKey, entry: CacheEntry) {
        let deadline = offset_seconds(entry.computed_at, entry.ttl_seconds);
        self.insert(key, entry, deadline).await;
    }

    /// Store an entry for at most `local_ttl`, never beyond its own TTL
    pub async fn set_with_ttl(&self, key: MetricKey, entry: CacheEntry, local_ttl: Duration) {
        let own_deadline = offset_seconds(entry.computed_at, entry.ttl_seconds);
        let local_millis = i64::try_from(local_ttl.as_millis()).unwrap_or(i64::MAX);
        let local_deadline = offset_millis(self.clock.now(), local_millis);
        self.insert(key, entry, own_deadline.min(local_deadline)).await;
    }

    pub async fn invalidate(&self, key: &MetricKey) {
        self.cache.invalidate(key).await;
        debug!(%key, "invalidated memory cache entry");
    }

    async fn insert(&self, key: MetricKey, entry: CacheEntry, deadline: DateTime<Utc>) {
        let evict_after = (deadline - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(MAX_RESIDENCY);
        debug!(%key, ttl = ?evict_after, "cached metric in memory");
        self.cache
            .insert(
                key,
                MemoryItem {
                    entry,
                    deadline,
                    evict_after,
                },
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 15, 0, 0).unwrap()
    }

    fn cache_with_clock() -> (MemoryCache, ManualClock) {
        let clock = ManualClock::new(start());
        (MemoryCache::new(100, Arc::new(clock.clone())), clock)
    }

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let (cache, clock) = cache_with_clock();
        let key = MetricKey::new("AAPL", "quote");
        cache.set(key.clone(), CacheEntry::new(json!(187.2), start(), 600)).await;

        clock.advance(chrono::Duration::seconds(599));
        let entry = cache.get(&key).await.expect("entry should still be live");
        assert_eq!(entry.value, json!(187.2));
    }

    #[tokio::test]
    async fn test_entry_past_own_ttl_is_evicted_on_read() {
        let (cache, clock) = cache_with_clock();
        let key = MetricKey::new("AAPL", "quote");
        cache.set(key.clone(), CacheEntry::new(json!(1), start(), 600)).await;

        clock.advance(chrono::Duration::seconds(600));
        assert!(cache.get(&key).await.is_none());

        // Moving the clock back does not resurrect an evicted item.
        clock.set(start());
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_local_ttl_shortens_lifetime() {
        let (cache, clock) = cache_with_clock();
        let key = MetricKey::new("TSLA", "market-sentiment");
        cache
            .set_with_ttl(
                key.clone(),
                CacheEntry::new(json!(42), start(), 3600),
                Duration::from_secs(60),
            )
            .await;

        clock.advance(chrono::Duration::seconds(30));
        assert!(cache.get(&key).await.is_some());
        clock.advance(chrono::Duration::seconds(31));
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_unbounded_ttl_does_not_overflow() {
        let (cache, clock) = cache_with_clock();
        let key = MetricKey::new("BRK.A", "quote");
        let entry = CacheEntry::new(json!(1), start(), u64::MAX);
        cache.set(key.clone(), entry.clone()).await;
        cache
            .set_with_ttl(key.clone(), entry, Duration::from_secs(u64::MAX))
            .await;

        clock.advance(chrono::Duration::days(365));
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_removes_entry() {
        let (cache, _clock) = cache_with_clock();
        let key = MetricKey::new("NVDA", "quote");
        cache.set(key.clone(), CacheEntry::new(json!(1), start(), 600)).await;
        cache.invalidate(&key).await;
        assert!(cache.get(&key).await.is_none());
    }
}
