//! Per-key TTL estimation.
//!
//! The TTL is taken from the first source that is available:
//!
//! 1. a recommended TTL precomputed by the data layer,
//! 2. the recent activity of the key's underlying source (busier → shorter),
//! 3. the time of day and day of week (active hours → shorter).
//!
//! When the underlying source produced an event within the chosen TTL, the TTL is halved so
//! freshly active keys are rechecked sooner. Every result lies in `[min_ttl, max_ttl]`.

use crate::cache::MetricKey;
use crate::clock::SharedClock;
use crate::config::{ActiveHours, CoordinatorConfig};
use crate::db::MetricStore;
use crate::models::ActivitySignal;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use std::sync::Arc;
use tracing::{debug, warn};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// TTL for a given activity level. Thresholds are tunable; the only contract is that more
/// events in either window never produce a longer TTL.
pub fn ttl_from_activity(signal: &ActivitySignal) -> u64 {
    match (signal.events_last_24h, signal.events_last_7d) {
        (day, _) if day >= 20 => 15 * MINUTE,
        (day, _) if day >= 5 => 30 * MINUTE,
        (day, _) if day >= 1 => HOUR,
        (_, week) if week >= 10 => 4 * HOUR,
        (_, week) if week >= 1 => 6 * HOUR,
        _ => 12 * HOUR,
    }
}

/// TTL from the wall clock alone.
pub fn ttl_from_schedule(now: DateTime<Utc>, active_hours: ActiveHours) -> u64 {
    let weekend = matches!(now.weekday(), Weekday::Sat | Weekday::Sun);
    let hour = now.hour();
    if weekend {
        6 * HOUR
    } else if hour >= active_hours.start_hour && hour < active_hours.end_hour {
        15 * MINUTE
    } else {
        2 * HOUR
    }
}

/// Halve `ttl` (not below `min_ttl`) when the last event is younger than `ttl`.
pub fn shorten_for_recent_event(
    ttl: u64,
    last_event_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    min_ttl: u64,
) -> u64 {
    let Some(last_event_at) = last_event_at else {
        return ttl;
    };
    let age_seconds = (now - last_event_at).num_seconds().max(0) as u64;
    if age_seconds < ttl {
        (ttl / 2).max(min_ttl)
    } else {
        ttl
    }
}

#[derive(Clone)]
pub struct TtlEstimator {
    store: Arc<dyn MetricStore>,
    clock: SharedClock,
    min_ttl: u64,
    max_ttl: u64,
    active_hours: ActiveHours,
}

impl TtlEstimator {
    pub fn new(store: Arc<dyn MetricStore>, clock: SharedClock, config: &CoordinatorConfig) -> Self {
        Self {
            store,
            clock,
            min_ttl: config.min_ttl_seconds,
            max_ttl: config.max_ttl_seconds,
            active_hours: config.active_hours,
        }
    }

    fn clamp(&self, ttl: u64) -> u64 {
        ttl.clamp(self.min_ttl, self.max_ttl)
    }

    pub async fn estimate(&self, key: &MetricKey) -> u64 {
        match self.store.recommended_ttl(key).await {
            Ok(Some(ttl)) => {
                debug!(%key, ttl, "using recommended ttl from store");
                return self.clamp(ttl);
            }
            Ok(None) => {}
            Err(e) => warn!(%key, error = %e, "failed to read recommended ttl"),
        }

        let now = self.clock.now();
        let signal = match self.store.read_activity_signal(key, now).await {
            Ok(signal) => Some(signal).filter(|signal| !signal.is_empty()),
            Err(e) => {
                warn!(%key, error = %e, "failed to read activity signal");
                None
            }
        };

        let ttl = match &signal {
            Some(signal) => {
                let ttl = self.clamp(ttl_from_activity(signal));
                debug!(%key, ttl, events_24h = signal.events_last_24h, "ttl from activity");
                shorten_for_recent_event(ttl, signal.last_event_at, now, self.min_ttl)
            }
            None => {
                let ttl = self.clamp(ttl_from_schedule(now, self.active_hours));
                debug!(%key, ttl, "ttl from schedule");
                ttl
            }
        };

        self.clamp(ttl)
    }
}
