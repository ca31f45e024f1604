use crate::cache::MetricKey;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComputeError {
    #[error("Upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned status {status}")]
    Status { status: u16 },

    #[error("Rate limited by upstream")]
    RateLimited,

    #[error("Malformed upstream payload: {0}")]
    Parse(String),

    #[error("Compute failed: {0}")]
    Failed(String),
}

impl ComputeError {
    /// Whether a single immediate retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::RateLimited | Self::Failed(_) => true,
            Self::Status { status } => *status >= 500,
            Self::Parse(_) => false,
        }
    }
}

/// The output of one compute call.
#[derive(Debug, Clone, PartialEq)]
pub struct Computed {
    pub value: Value,
    /// Overrides the estimated TTL when present.
    pub ttl_hint_seconds: Option<u64>,
    pub metadata: Map<String, Value>,
}

impl Computed {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            ttl_hint_seconds: None,
            metadata: Map::new(),
        }
    }

    pub fn with_ttl_hint(mut self, ttl_seconds: u64) -> Self {
        self.ttl_hint_seconds = Some(ttl_seconds);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Produces a fresh value for a metric key. Opaque to the coordinator.
#[async_trait]
pub trait ComputeEngine: Send + Sync + 'static {
    async fn compute(&self, key: &MetricKey) -> Result<Computed, ComputeError>;
}

pub type SharedEngine = Arc<dyn ComputeEngine>;

/// Adapts an async closure into a [`ComputeEngine`].
pub struct FnEngine<F>(F);

#[async_trait]
impl<F, Fut> ComputeEngine for FnEngine<F>
where
    F: Fn(MetricKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Computed, ComputeError>> + Send + 'static,
{
    async fn compute(&self, key: &MetricKey) -> Result<Computed, ComputeError> {
        (self.0)(key.clone()).await
    }
}

pub fn compute_fn<F, Fut>(f: F) -> SharedEngine
where
    F: Fn(MetricKey) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Computed, ComputeError>> + Send + 'static,
{
    Arc::new(FnEngine(f))
}
