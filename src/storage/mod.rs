pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::Result;
use crate::limiter::Algorithm;

/// Point-in-time view of one bucket's stored state, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketSnapshot {
    pub algorithm: Algorithm,
    /// Tokens available (token bucket) or in flight (leaky bucket)
    pub bucket_size: f64,
    /// Unix seconds of the last refill/leak event
    pub last_event_unix: i64,
}

/// Backend contract shared by the in-process and remote stores.
///
/// Each check call is one atomic admission decision: read the bucket state
/// for `key` (absent = cold path), run the algorithm, and commit the updated
/// state. Per key, calls are serialised by the backend; keys are opaque byte
/// strings to it.
///
/// `deadline` bounds the call's backend I/O. The remote store cancels the
/// round-trip once it elapses, surfacing a timeout error; the memory store
/// ignores it, since its critical sections are bounded and never await.
/// `None` leaves the backend's own default in force.
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn check_and_update_token_bucket(
        &self,
        key: &str,
        capacity: i64,
        refill_rate: f64,
        expires_in: Duration,
        deadline: Option<Duration>,
    ) -> Result<bool>;

    async fn check_and_update_leaky_bucket(
        &self,
        key: &str,
        capacity: i64,
        leak_rate: f64,
        expires_in: Duration,
        deadline: Option<Duration>,
    ) -> Result<bool>;

    /// Read a bucket's state without mutating it.
    async fn read_bucket(&self, key: &str) -> Result<Option<BucketSnapshot>>;

    /// Drop a bucket's state. Returns whether a bucket existed.
    async fn delete_bucket(&self, key: &str) -> Result<bool>;
}
