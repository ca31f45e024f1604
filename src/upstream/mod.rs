pub mod engine;
pub mod http;
pub mod rate_limiter;

// Re-exports for convenience
pub use engine::{compute_fn, ComputeEngine, ComputeError, Computed, FnEngine, SharedEngine};
pub use http::HttpJsonEngine;
pub use rate_limiter::UpstreamRateLimiter;
