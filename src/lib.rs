pub mod clock;
pub mod config;
pub mod env;
pub mod errors;
pub mod limiter;
pub mod metrics;
pub mod redis;
pub mod storage;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, MetricsConfig};
pub use env::Specification;
pub use errors::{RateLimitError, Result};
pub use limiter::client::RateLimitClient;
pub use limiter::registry::PolicyRegistry;
pub use limiter::{Algorithm, BucketConfig};
pub use storage::memory::MemoryStore;
pub use storage::{BucketSnapshot, BucketStore};

pub use crate::redis::RedisStore;
