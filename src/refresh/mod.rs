pub mod coordinator;
pub mod error;
pub mod freshness;
pub mod gate;
pub mod single_flight;
pub mod ttl;

pub use coordinator::{GetOptions, RefreshCoordinator};
pub use error::CoordinatorError;
pub use freshness::{Freshness, FreshnessClassifier, FreshnessWindow};
pub use gate::ConcurrencyGate;
pub use single_flight::SingleFlight;
pub use ttl::TtlEstimator;
