pub mod keys;
pub mod memory;

pub use keys::MetricKey;
pub use memory::MemoryCache;
