// Cached metric values, refresh audit records and the response shape handed to callers.

use crate::clock::seconds_to_millis;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A computed metric value together with the moment it was produced and how long it stays valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Opaque payload produced by a compute engine.
    pub value: Value,
    pub computed_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl CacheEntry {
    pub fn new(value: Value, computed_at: DateTime<Utc>, ttl_seconds: u64) -> Self {
        Self {
            value,
            computed_at,
            ttl_seconds,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Age of the entry at `now` in milliseconds. Entries stamped in the future are age zero.
    pub fn age_millis(&self, now: DateTime<Utc>) -> i64 {
        (now - self.computed_at).num_milliseconds().max(0)
    }

    /// Whether the entry has outlived its own TTL.
    pub fn is_past_ttl(&self, now: DateTime<Utc>) -> bool {
        self.age_millis(now) >= seconds_to_millis(self.ttl_seconds)
    }
}

/// Recency and volume of the underlying source events for a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivitySignal {
    pub events_last_24h: u64,
    pub events_last_7d: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl ActivitySignal {
    /// A signal with no events at all carries no information.
    pub fn is_empty(&self) -> bool {
        self.events_last_24h == 0 && self.events_last_7d == 0 && self.last_event_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStatus {
    Running,
    Success,
    Failed,
}

impl RefreshStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Audit row describing one refresh attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshLogRecord {
    pub id: i64,
    pub key: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RefreshStatus,
    pub ttl_used: Option<u64>,
    pub error_message: Option<String>,
}

/// Completion details written onto a running refresh log row.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshLogPatch {
    pub completed_at: DateTime<Utc>,
    pub status: RefreshStatus,
    pub ttl_used: Option<u64>,
    pub error_message: Option<String>,
}

impl RefreshLogPatch {
    pub fn success(completed_at: DateTime<Utc>, ttl_used: u64) -> Self {
        Self {
            completed_at,
            status: RefreshStatus::Success,
            ttl_used: Some(ttl_used),
            error_message: None,
        }
    }

    pub fn failed(completed_at: DateTime<Utc>, error: impl fmt::Display) -> Self {
        Self {
            completed_at,
            status: RefreshStatus::Failed,
            ttl_used: None,
            error_message: Some(error.to_string()),
        }
    }
}

/// Where a served value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceTag {
    Memory,
    StoreFresh,
    StoreStale,
    StoreExpiredFallback,
    ComputeFresh,
    ComputeLocked,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::StoreFresh => "store-fresh",
            Self::StoreStale => "store-stale",
            Self::StoreExpiredFallback => "store-expired-fallback",
            Self::ComputeFresh => "compute-fresh",
            Self::ComputeLocked => "compute-locked",
        }
    }

    /// Degraded responses should be flagged as possibly delayed by the presentation layer.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::StoreStale | Self::StoreExpiredFallback)
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value returned by the coordinator, labeled with its source.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub value: Value,
    pub source: SourceTag,
    pub computed_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl Fetched {
    pub fn from_entry(entry: CacheEntry, source: SourceTag) -> Self {
        Self {
            value: entry.value,
            source,
            computed_at: entry.computed_at,
            ttl_seconds: entry.ttl_seconds,
        }
    }
}
