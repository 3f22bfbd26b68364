//! Decision client: policy lookup composed with backend calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::errors::{RateLimitError, Result};
use crate::limiter::registry::PolicyRegistry;
use crate::metrics;
use crate::storage::{BucketSnapshot, BucketStore};

/// Composes the policy registry with a storage backend.
///
/// A request is admitted only if every bucket of the policy admits it, in
/// order. There is no rollback: a request admitted by bucket *i* and denied
/// by bucket *i+1* has already consumed from bucket *i*. That over-count is
/// accepted; two-phase commit across buckets is not worth its complexity.
pub struct RateLimitClient<S> {
    registry: Arc<PolicyRegistry>,
    store: Arc<S>,
}

impl<S: BucketStore> RateLimitClient<S> {
    pub fn new(registry: Arc<PolicyRegistry>, store: Arc<S>) -> Self {
        Self { registry, store }
    }

    /// Decide whether the request identified by `composite_key` is admitted
    /// under `policy_id`. Returns the effective key prefix and the verdict.
    ///
    /// An empty key or policy id bypasses limiting entirely: such callers are
    /// gated elsewhere. An unknown policy is permissive; the enclosing
    /// middleware supplies the default policy where one applies.
    ///
    /// `deadline`, when given, is propagated to the remote backend and bounds
    /// each bucket round-trip; an elapsed deadline surfaces as a backend
    /// error and therefore denies. The memory backend does not observe it.
    pub async fn check_rate_limit(
        &self,
        composite_key: &str,
        policy_id: &str,
        deadline: Option<Duration>,
    ) -> (String, bool) {
        if composite_key.is_empty() || policy_id.is_empty() {
            return (String::new(), true);
        }

        let started = Instant::now();
        let prefix = format!("{}:{}", composite_key, policy_id);

        let buckets = self.registry.lookup(policy_id);
        if buckets.is_empty() {
            debug!(policy = policy_id, "no policy configured, allowing");
            return (prefix, true);
        }

        for bucket in &buckets {
            let sub_key = format!("{}:{}", prefix, bucket.id);
            debug!(key = %sub_key, policy = policy_id, "checking rate limit");

            match bucket.allow(self.store.as_ref(), &sub_key, deadline).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(key = %sub_key, policy = policy_id, bucket = %bucket.id, "request denied");
                    metrics::record_denial(policy_id, &bucket.id);
                    metrics::record_decision(policy_id, false, started.elapsed().as_secs_f64());
                    return (prefix, false);
                }
                Err(e) => {
                    // Failing open would let a backend outage defeat the
                    // limiter, so every backend error becomes a deny.
                    error!(key = %sub_key, policy = policy_id, error = %e, "backend error, denying");
                    metrics::record_backend_error(error_label(&e));
                    metrics::record_decision(policy_id, false, started.elapsed().as_secs_f64());
                    return (prefix, false);
                }
            }
        }

        metrics::record_decision(policy_id, true, started.elapsed().as_secs_f64());
        (prefix, true)
    }

    /// Read the stored state of one fully-composed bucket key without
    /// consuming from it. Diagnostic surface only.
    pub async fn get_rate(&self, key: &str) -> Result<Option<BucketSnapshot>> {
        self.store.read_bucket(key).await
    }
}

fn error_label(error: &RateLimitError) -> &'static str {
    match error {
        RateLimitError::Timeout(_) => "timeout",
        RateLimitError::Pool(_) => "pool",
        RateLimitError::RedisConnection(_) => "connection",
        RateLimitError::ScriptExecution(_) => "script",
        _ => "other",
    }
}
