//! In-process storage backend.
//!
//! One coarse mutex guards both the primary bucket map and the expiry index
//! during every decision; critical sections are bounded and never await. A
//! background reaper task removes idle buckets once their expiry deadline
//! passes, so a reclaimed key behaves exactly like one that never existed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::clock::Clock;
use crate::errors::Result;
use crate::limiter::bucket::{
    decide_leaky_bucket, decide_token_bucket, LeakyBucketState, TokenBucketState, REQUEST_COST,
};
use crate::limiter::Algorithm;
use crate::metrics;
use crate::storage::{BucketSnapshot, BucketStore};

/// Fallback reaper period. The composition root should lower this to at most
/// the shortest configured `expires_in`.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
enum BucketEntry {
    Token(TokenBucketState),
    Leaky(LeakyBucketState),
}

impl BucketEntry {
    fn expires_at_ns(&self) -> i64 {
        match self {
            BucketEntry::Token(s) => s.expires_at_ns,
            BucketEntry::Leaky(s) => s.expires_at_ns,
        }
    }

    fn snapshot(&self) -> BucketSnapshot {
        match self {
            BucketEntry::Token(s) => BucketSnapshot {
                algorithm: Algorithm::TokenBucket,
                bucket_size: s.bucket_size,
                last_event_unix: s.last_refill_ns / 1_000_000_000,
            },
            BucketEntry::Leaky(s) => BucketSnapshot {
                algorithm: Algorithm::LeakyBucket,
                bucket_size: s.bucket_size,
                last_event_unix: s.last_leak_ns / 1_000_000_000,
            },
        }
    }
}

#[derive(Default)]
struct StoreInner {
    buckets: HashMap<String, BucketEntry>,
    /// Expiry deadline (ns) -> keys scheduled to expire at that instant.
    /// Entries go stale when a deadline is refreshed; the reaper checks the
    /// authoritative deadline in `buckets` before deleting.
    expirations: BTreeMap<i64, Vec<String>>,
}

impl StoreInner {
    fn write_entry(&mut self, key: &str, entry: BucketEntry) {
        let deadline = entry.expires_at_ns();
        self.buckets.insert(key.to_string(), entry);
        self.expirations
            .entry(deadline)
            .or_default()
            .push(key.to_string());
    }
}

/// Concurrent keyed bucket store with background expiry.
///
/// Constructors return fresh, independent handles; process-wide sharing is
/// the composition root's call. Dropping the store stops its reaper.
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
    clock: Arc<dyn Clock>,
    stop: watch::Sender<bool>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_reaper_interval(clock, DEFAULT_REAP_INTERVAL)
    }

    /// Create a store whose reaper wakes every `interval`.
    pub fn with_reaper_interval(clock: Arc<dyn Clock>, interval: Duration) -> Self {
        let inner = Arc::new(Mutex::new(StoreInner::default()));
        let (stop, stop_rx) = watch::channel(false);

        tokio::spawn(reap_loop(
            Arc::clone(&inner),
            Arc::clone(&clock),
            interval,
            stop_rx,
        ));

        Self { inner, clock, stop }
    }

    /// Signal the reaper task to exit. Dropping the store has the same
    /// effect; this is for callers that want a deterministic shutdown point.
    pub fn stop_reaper(&self) {
        let _ = self.stop.send(true);
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    // The deadline is ignored on this backend: the critical section is
    // bounded and never awaits, so there is nothing to cancel.
    async fn check_and_update_token_bucket(
        &self,
        key: &str,
        capacity: i64,
        refill_rate: f64,
        expires_in: Duration,
        _deadline: Option<Duration>,
    ) -> Result<bool> {
        let now_ns = self.clock.now_ns();
        let mut inner = self.inner.lock().unwrap();

        // A key previously holding the other bucket kind is treated as absent
        // and overwritten.
        let current = match inner.buckets.get(key) {
            Some(BucketEntry::Token(s)) => Some(*s),
            _ => None,
        };

        let (allowed, written) = decide_token_bucket(
            current.as_ref(),
            capacity,
            refill_rate,
            expires_in,
            now_ns,
            REQUEST_COST,
        );
        if let Some(state) = written {
            inner.write_entry(key, BucketEntry::Token(state));
        }

        debug!(key, allowed, "token bucket decision");
        Ok(allowed)
    }

    async fn check_and_update_leaky_bucket(
        &self,
        key: &str,
        capacity: i64,
        leak_rate: f64,
        expires_in: Duration,
        _deadline: Option<Duration>,
    ) -> Result<bool> {
        let now_ns = self.clock.now_ns();
        let mut inner = self.inner.lock().unwrap();

        let current = match inner.buckets.get(key) {
            Some(BucketEntry::Leaky(s)) => Some(*s),
            _ => None,
        };

        let (allowed, written) = decide_leaky_bucket(
            current.as_ref(),
            capacity,
            leak_rate,
            expires_in,
            now_ns,
            REQUEST_COST,
        );
        if let Some(state) = written {
            inner.write_entry(key, BucketEntry::Leaky(state));
        }

        debug!(key, allowed, "leaky bucket decision");
        Ok(allowed)
    }

    async fn read_bucket(&self, key: &str) -> Result<Option<BucketSnapshot>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.buckets.get(key).map(BucketEntry::snapshot))
    }

    async fn delete_bucket(&self, key: &str) -> Result<bool> {
        // The expiry index entry goes stale; the reaper discards it against
        // the now-absent bucket.
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.buckets.remove(key).is_some())
    }
}

async fn reap_loop(
    inner: Arc<Mutex<StoreInner>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = reap_expired(&inner, clock.now_ns());
                if removed > 0 {
                    debug!(removed, "reaped expired buckets");
                    metrics::record_reaped_keys(removed);
                }
            }
            changed = stop.changed() => {
                // Either an explicit stop or the store was dropped.
                if changed.is_err() || *stop.borrow() {
                    return;
                }
            }
        }
    }
}

/// Remove every bucket whose deadline is at or before `now_ns`. Returns the
/// number of keys deleted.
fn reap_expired(inner: &Mutex<StoreInner>, now_ns: i64) -> usize {
    let mut inner = inner.lock().unwrap();

    // Take all index entries scheduled at or before now; later deadlines stay.
    let later = inner.expirations.split_off(&(now_ns + 1));
    let due = std::mem::replace(&mut inner.expirations, later);

    let mut removed = 0;
    for keys in due.into_values() {
        for key in keys {
            // The index entry may be stale: the bucket's deadline is refreshed
            // on every operation and the key re-indexed under the new instant.
            let expired = inner
                .buckets
                .get(&key)
                .is_some_and(|entry| entry.expires_at_ns() <= now_ns);
            if expired {
                inner.buckets.remove(&key);
                removed += 1;
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, SystemClock};

    fn manual_store() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        // Long interval: these tests drive reaping explicitly.
        let store = MemoryStore::with_reaper_interval(clock.clone(), Duration::from_secs(3600));
        (store, clock)
    }

    #[tokio::test]
    async fn token_burst_then_recovery() {
        let (store, clock) = manual_store();
        let expires = Duration::from_secs(60);

        // capacity=5, refill 10/s: five back-to-back admits, then denials.
        let mut verdicts = Vec::new();
        for _ in 0..10 {
            verdicts.push(
                store
                    .check_and_update_token_bucket("burst", 5, 10.0, expires, None)
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(
            verdicts,
            vec![true, true, true, true, true, false, false, false, false, false]
        );

        // 500ms at 10/s refills 5 tokens.
        clock.advance(Duration::from_millis(500));
        assert!(store
            .check_and_update_token_bucket("burst", 5, 10.0, expires, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn leaky_fill_denies_third_call() {
        let (store, _clock) = manual_store();
        let expires = Duration::from_secs(60);

        let mut verdicts = Vec::new();
        for _ in 0..3 {
            verdicts.push(
                store
                    .check_and_update_leaky_bucket("fill", 2, 1.0, expires, None)
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(verdicts, vec![true, true, false]);
    }

    #[tokio::test]
    async fn zero_refill_rate_exhausts_permanently() {
        let (store, clock) = manual_store();
        let expires = Duration::from_secs(3600);

        for _ in 0..10 {
            assert!(store
                .check_and_update_token_bucket("frozen", 10, 0.0, expires, None)
                .await
                .unwrap());
        }

        // The eleventh call denies, and time does not help.
        assert!(!store
            .check_and_update_token_bucket("frozen", 10, 0.0, expires, None)
            .await
            .unwrap());
        clock.advance(Duration::from_secs(600));
        assert!(!store
            .check_and_update_token_bucket("frozen", 10, 0.0, expires, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn concurrent_admits_bounded_by_capacity() {
        let (store, _clock) = manual_store();
        let store = Arc::new(store);
        let expires = Duration::from_secs(60);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .check_and_update_token_bucket("contended", 10, 0.0, expires, None)
                    .await
                    .unwrap()
            }));
        }

        let mut admits = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admits += 1;
            }
        }
        assert_eq!(admits, 10);
    }

    #[tokio::test]
    async fn expired_bucket_is_reaped_and_recreated_cold() {
        let (store, clock) = manual_store();
        let expires = Duration::from_millis(50);

        // Exhaust a capacity-1 bucket so a warm call would deny.
        assert!(store
            .check_and_update_token_bucket("idle", 1, 0.0, expires, None)
            .await
            .unwrap());
        assert!(!store
            .check_and_update_token_bucket("idle", 1, 0.0, expires, None)
            .await
            .unwrap());

        // After expiry plus slack the deny refreshed the deadline, so wait it
        // out from the last touch.
        clock.advance(Duration::from_millis(200));
        let removed = reap_expired(&store.inner, clock.now_ns());
        assert_eq!(removed, 1);
        assert!(store.inner.lock().unwrap().buckets.is_empty());

        // Cold path again: identical to a never-existed bucket.
        assert!(store
            .check_and_update_token_bucket("idle", 1, 0.0, expires, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn deny_refreshes_expiry_deadline() {
        let (store, clock) = manual_store();
        let expires = Duration::from_secs(1);

        assert!(store
            .check_and_update_leaky_bucket("hot", 1, 0.0, expires, None)
            .await
            .unwrap());

        // Keep the key hot with denied traffic past its original deadline.
        for _ in 0..4 {
            clock.advance(Duration::from_millis(400));
            assert!(!store
                .check_and_update_leaky_bucket("hot", 1, 0.0, expires, None)
                .await
                .unwrap());
        }

        // 1.6s after creation the original deadline has passed, but the last
        // deny pushed it forward, so the reaper must keep the bucket.
        let removed = reap_expired(&store.inner, clock.now_ns());
        assert_eq!(removed, 0);
        assert!(store.inner.lock().unwrap().buckets.contains_key("hot"));

        // Once traffic stops, the key ages out.
        clock.advance(Duration::from_secs(2));
        let removed = reap_expired(&store.inner, clock.now_ns());
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn stale_expiry_index_entries_are_discarded() {
        let (store, clock) = manual_store();
        let expires = Duration::from_secs(1);

        assert!(store
            .check_and_update_token_bucket("refreshed", 5, 0.0, expires, None)
            .await
            .unwrap());
        // Second operation refreshes the deadline, leaving the first index
        // entry stale.
        clock.advance(Duration::from_millis(500));
        assert!(store
            .check_and_update_token_bucket("refreshed", 5, 0.0, expires, None)
            .await
            .unwrap());

        // At t0+1.2s only the stale entry is due; the bucket must survive.
        clock.advance(Duration::from_millis(700));
        let removed = reap_expired(&store.inner, clock.now_ns());
        assert_eq!(removed, 0);
        assert!(store.inner.lock().unwrap().buckets.contains_key("refreshed"));
    }

    #[tokio::test]
    async fn key_reused_across_algorithms_restarts_cold() {
        let (store, _clock) = manual_store();
        let expires = Duration::from_secs(60);

        assert!(store
            .check_and_update_token_bucket("mixed", 1, 0.0, expires, None)
            .await
            .unwrap());
        // A leaky call on the same key ignores the token state and starts
        // cold.
        assert!(store
            .check_and_update_leaky_bucket("mixed", 1, 0.0, expires, None)
            .await
            .unwrap());
        // And the key now holds leaky state: a second fill attempt denies.
        assert!(!store
            .check_and_update_leaky_bucket("mixed", 1, 0.0, expires, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn read_and_delete_bucket() {
        let (store, _clock) = manual_store();
        let expires = Duration::from_secs(60);

        assert_eq!(store.read_bucket("probe").await.unwrap(), None);

        assert!(store
            .check_and_update_token_bucket("probe", 5, 1.0, expires, None)
            .await
            .unwrap());

        let snapshot = store.read_bucket("probe").await.unwrap().unwrap();
        assert_eq!(snapshot.algorithm, Algorithm::TokenBucket);
        assert_eq!(snapshot.bucket_size, 4.0);

        assert!(store.delete_bucket("probe").await.unwrap());
        assert_eq!(store.read_bucket("probe").await.unwrap(), None);
        assert!(!store.delete_bucket("probe").await.unwrap());
    }

    #[tokio::test]
    async fn background_reaper_removes_idle_keys() {
        let clock = Arc::new(SystemClock::new());
        let store = MemoryStore::with_reaper_interval(clock, Duration::from_millis(100));

        assert!(store
            .check_and_update_token_bucket("bg", 5, 1.0, Duration::from_millis(50), None)
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.inner.lock().unwrap().buckets.is_empty());

        store.stop_reaper();
    }
}
