//! Sliding-window limiter shared by compute engines that call the same external source.

use crate::clock::SharedClock;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Shortest pause between re-checks, so a zero wait cannot spin.
const MIN_BACKOFF: Duration = Duration::from_millis(5);

pub struct UpstreamRateLimiter {
    max_requests: usize,
    window: chrono::Duration,
    clock: SharedClock,
    timestamps: Mutex<VecDeque<DateTime<Utc>>>,
}

impl UpstreamRateLimiter {
    pub fn new(max_requests: usize, window: Duration, clock: SharedClock) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(1)),
            clock,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Record a request at `now` if the window has room, otherwise return how long until
    /// the oldest recorded request leaves the window.
    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> Result<(), Duration> {
        let mut timestamps = self.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        let window_start = now - self.window;
        while timestamps.front().is_some_and(|ts| *ts <= window_start) {
            timestamps.pop_front();
        }

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            return Ok(());
        }

        let wait = timestamps
            .front()
            .map(|oldest| (*oldest + self.window - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(Duration::ZERO);
        Err(wait)
    }

    /// Wait until a request slot is available, then take it.
    pub async fn acquire_slot(&self) {
        loop {
            match self.try_acquire_at(self.clock.now()) {
                Ok(()) => return,
                Err(wait) => {
                    debug!(wait_ms = wait.as_millis() as u64, "upstream rate limit reached, waiting");
                    tokio::time::sleep(wait.max(MIN_BACKOFF)).await;
                }
            }
        }
    }

    /// Requests recorded in the window ending at `now`.
    pub fn in_window(&self, now: DateTime<Utc>) -> usize {
        let timestamps = self.timestamps.lock().unwrap_or_else(|e| e.into_inner());
        let window_start = now - self.window;
        timestamps.iter().filter(|ts| **ts > window_start).count()
    }
}
