use crate::db::StoreError;
use thiserror::Error;

/// Failures of a coordinated metric read.
///
/// `Clone` so one refresh outcome can be delivered to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The compute engine failed. Recovered with the last persisted value when there is one.
    #[error("Upstream compute failed for {key}: {message}")]
    UpstreamCompute { key: String, message: String },

    /// The persistent store failed. Logged and degraded to memory-only, never returned by `get`.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// No refresh slot (or in-flight result) became available in time and nothing is cached.
    #[error("Timed out waiting for a refresh of {key}")]
    GateTimeout { key: String },

    /// Nothing cached and the compute failed.
    #[error("No data available for {key}: {message}")]
    NoData { key: String, message: String },
}

impl From<StoreError> for CoordinatorError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
