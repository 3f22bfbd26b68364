//! Pure bucket decision functions.
//!
//! Both algorithms follow the same template: compute elapsed time since the
//! last event, advance the bucket continuously, then test-and-commit. The
//! functions are pure state-in/state-out so that the memory backend can run
//! them under its mutex and tests can drive them directly; the Redis backend
//! implements the same semantics server-side at seconds resolution.

use std::time::Duration;

use tracing::error;

/// Tokens consumed (token bucket) or added (leaky bucket) per admitted
/// request. Kept as a single constant so per-request cost weighting has one
/// place to land.
pub const REQUEST_COST: f64 = 1.0;

/// Token bucket state: `bucket_size` is tokens currently available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketState {
    pub last_refill_ns: i64,
    pub bucket_size: f64,
    pub expires_at_ns: i64,
}

/// Leaky bucket state: `bucket_size` is tokens currently held in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakyBucketState {
    pub last_leak_ns: i64,
    pub bucket_size: f64,
    pub expires_at_ns: i64,
}

/// Token bucket decision.
///
/// Returns the verdict and the state to write back; `None` means storage must
/// not be touched. A deny never consumes the refill credit accumulated since
/// `last_refill_ns`, but it does refresh the expiry deadline so an actively
/// denied key is not reclaimed while hot.
pub fn decide_token_bucket(
    state: Option<&TokenBucketState>,
    capacity: i64,
    refill_rate: f64,
    expires_in: Duration,
    now_ns: i64,
    cost: f64,
) -> (bool, Option<TokenBucketState>) {
    let capacity = capacity as f64;
    let expires_at_ns = expiry_deadline(now_ns, expires_in);

    let current = match state {
        None => {
            // Cold path. A cost above capacity can never be admitted; the
            // state is still created, clamped to empty, so the key stays
            // frozen rather than oscillating through cold paths.
            let bucket_size = capacity - cost;
            if bucket_size < 0.0 {
                return (
                    false,
                    Some(TokenBucketState {
                        last_refill_ns: now_ns,
                        bucket_size: 0.0,
                        expires_at_ns,
                    }),
                );
            }
            return (
                true,
                Some(TokenBucketState {
                    last_refill_ns: now_ns,
                    bucket_size: check_size_invariant(bucket_size, capacity, "token_bucket"),
                    expires_at_ns,
                }),
            );
        }
        Some(s) => s,
    };

    let (elapsed_s, last_refill_ns) = elapsed_since(current.last_refill_ns, now_ns);
    let refilled = elapsed_s * refill_rate;
    let new_size = capacity.min(current.bucket_size + refilled);

    if new_size >= cost {
        let bucket_size = check_size_invariant(new_size - cost, capacity, "token_bucket");
        (
            true,
            Some(TokenBucketState {
                last_refill_ns: now_ns,
                bucket_size,
                expires_at_ns,
            }),
        )
    } else {
        // Deny: bucket_size and last_refill_ns are preserved so the accrued
        // refill credit is not reset; only the expiry deadline moves.
        (
            false,
            Some(TokenBucketState {
                last_refill_ns,
                bucket_size: current.bucket_size,
                expires_at_ns,
            }),
        )
    }
}

/// Leaky bucket decision.
///
/// Same write-back contract as [`decide_token_bucket`].
pub fn decide_leaky_bucket(
    state: Option<&LeakyBucketState>,
    capacity: i64,
    leak_rate: f64,
    expires_in: Duration,
    now_ns: i64,
    cost: f64,
) -> (bool, Option<LeakyBucketState>) {
    let capacity = capacity as f64;
    let expires_at_ns = expiry_deadline(now_ns, expires_in);

    let current = match state {
        None => {
            if cost > capacity {
                return (false, None);
            }
            return (
                true,
                Some(LeakyBucketState {
                    last_leak_ns: now_ns,
                    bucket_size: check_size_invariant(cost, capacity, "leaky_bucket"),
                    expires_at_ns,
                }),
            );
        }
        Some(s) => s,
    };

    let (elapsed_s, last_leak_ns) = elapsed_since(current.last_leak_ns, now_ns);
    let leaked = elapsed_s * leak_rate;
    let drained = (current.bucket_size - leaked).max(0.0);

    let candidate = drained + cost;
    if candidate <= capacity {
        let bucket_size = check_size_invariant(candidate, capacity, "leaky_bucket");
        (
            true,
            Some(LeakyBucketState {
                last_leak_ns: now_ns,
                bucket_size,
                expires_at_ns,
            }),
        )
    } else {
        (
            false,
            Some(LeakyBucketState {
                last_leak_ns,
                bucket_size: current.bucket_size,
                expires_at_ns,
            }),
        )
    }
}

/// Elapsed seconds since `last_ns`, with backward clock movement treated as
/// zero elapsed. Returns the adjusted `last_*_ns` to store: it advances to
/// `now_ns` when the clock went backward so timestamps stay non-decreasing.
fn elapsed_since(last_ns: i64, now_ns: i64) -> (f64, i64) {
    let elapsed_ns = now_ns - last_ns;
    if elapsed_ns < 0 {
        (0.0, now_ns)
    } else {
        (elapsed_ns as f64 / 1e9, last_ns)
    }
}

fn expiry_deadline(now_ns: i64, expires_in: Duration) -> i64 {
    now_ns.saturating_add(i64::try_from(expires_in.as_nanos()).unwrap_or(i64::MAX))
}

/// A size outside `[0, capacity]` after a decision is an implementation bug.
fn check_size_invariant(size: f64, capacity: f64, algorithm: &str) -> f64 {
    debug_assert!(
        (0.0..=capacity).contains(&size),
        "{algorithm} bucket_size {size} outside [0, {capacity}]"
    );
    if size < 0.0 {
        error!(algorithm, size, capacity, "bucket size below zero, clamping");
        0.0
    } else if size > capacity {
        error!(algorithm, size, capacity, "bucket size above capacity, clamping");
        capacity
    } else {
        size
    }
}
