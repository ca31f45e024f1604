pub mod error;
pub mod response;
pub mod route;

pub use error::ApiError;
pub use response::{metric_response, MetricResponse, CACHE_SOURCE_HEADER};
pub use route::{create_router, MetricQuery};
