pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod db;
pub mod models;
pub mod refresh;
pub mod state;
pub mod upstream;
pub mod utils;
pub mod validation;

#[cfg(test)]
pub mod tests;

// Re-export specific items for convenience
pub use api::error::ApiError;
pub use api::route::create_router;
pub use cache::MetricKey;
pub use db::{connection, MemoryStore, MetricStore, SqliteStore, StoreError};
pub use models::{CacheEntry, Fetched, SourceTag};
pub use refresh::{CoordinatorError, GetOptions, RefreshCoordinator};
pub use upstream::{compute_fn, ComputeEngine, ComputeError, Computed, SharedEngine};
