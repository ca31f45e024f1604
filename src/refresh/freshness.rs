//! Fresh / stale / expired classification of cached entries.

use crate::clock::{offset_millis, seconds_to_millis};
use crate::config::CoordinatorConfig;
use crate::models::CacheEntry;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Freshness {
    /// Serve as-is.
    Fresh,
    /// Serve, but schedule a background refresh.
    Stale,
    /// Must be recomputed before it is served (unless nothing better is available).
    Expired,
}

/// The derived freshness boundaries of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    pub fresh_until: DateTime<Utc>,
    pub stale_until: DateTime<Utc>,
    pub absolute_expiry: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct FreshnessClassifier {
    stale_fraction: f64,
    absolute_max_age_seconds: u64,
}

impl FreshnessClassifier {
    pub fn new(stale_fraction: f64, absolute_max_age_seconds: u64) -> Self {
        Self {
            stale_fraction,
            absolute_max_age_seconds,
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self::new(config.stale_fraction, config.absolute_max_age_seconds)
    }

    fn fresh_millis(&self, ttl_seconds: u64) -> i64 {
        (ttl_millis(ttl_seconds) as f64 * self.stale_fraction).floor() as i64
    }

    pub fn window(&self, computed_at: DateTime<Utc>, ttl_seconds: u64) -> FreshnessWindow {
        FreshnessWindow {
            fresh_until: offset_millis(computed_at, self.fresh_millis(ttl_seconds)),
            stale_until: offset_millis(computed_at, ttl_millis(ttl_seconds)),
            absolute_expiry: offset_millis(computed_at, ttl_millis(self.absolute_max_age_seconds)),
        }
    }

    pub fn classify(&self, entry: &CacheEntry, now: DateTime<Utc>) -> Freshness {
        self.classify_age(entry.age_millis(now), entry.ttl_seconds)
    }

    /// Classification as a pure function of the entry's age and TTL.
    pub fn classify_age(&self, age_millis: i64, ttl_seconds: u64) -> Freshness {
        let age = age_millis.max(0);
        if age >= ttl_millis(self.absolute_max_age_seconds) {
            Freshness::Expired
        } else if age < self.fresh_millis(ttl_seconds) {
            Freshness::Fresh
        } else if age < ttl_millis(ttl_seconds) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

fn ttl_millis(seconds: u64) -> i64 {
    seconds_to_millis(seconds)
}
