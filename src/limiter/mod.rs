pub mod bucket;
pub mod client;
pub mod registry;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{RateLimitError, Result};
use crate::storage::BucketStore;

/// Rate limiting algorithm kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    TokenBucket,
    LeakyBucket,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::TokenBucket => "token_bucket",
            Algorithm::LeakyBucket => "leaky_bucket",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = RateLimitError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "token_bucket" => Ok(Algorithm::TokenBucket),
            "leaky_bucket" => Ok(Algorithm::LeakyBucket),
            other => Err(RateLimitError::ConfigValidation(format!(
                "algorithm must be one of token_bucket, leaky_bucket (got {:?})",
                other
            ))),
        }
    }
}

/// One bucket of a policy, immutable after construction.
///
/// `rate` is tokens per second: the refill rate for a token bucket, the leak
/// rate for a leaky bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketConfig {
    /// Stable short name ("default", "rpm", "rph")
    pub id: String,
    pub algorithm: Algorithm,
    /// Maximum bucket fullness, > 0
    pub capacity: i64,
    /// Tokens per second, >= 0
    pub rate: f64,
    /// Idle buckets are reclaimed after this
    pub expires_in: Duration,
}

impl BucketConfig {
    /// Run one admission decision for `key` against the given backend.
    /// `deadline`, when given, bounds the backend round-trip.
    pub async fn allow<S: BucketStore + ?Sized>(
        &self,
        store: &S,
        key: &str,
        deadline: Option<Duration>,
    ) -> Result<bool> {
        match self.algorithm {
            Algorithm::TokenBucket => {
                store
                    .check_and_update_token_bucket(
                        key,
                        self.capacity,
                        self.rate,
                        self.expires_in,
                        deadline,
                    )
                    .await
            }
            Algorithm::LeakyBucket => {
                store
                    .check_and_update_leaky_bucket(
                        key,
                        self.capacity,
                        self.rate,
                        self.expires_in,
                        deadline,
                    )
                    .await
            }
        }
    }
}
