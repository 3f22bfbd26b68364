use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use crate::errors::{RateLimitError, Result};
use crate::limiter::BucketConfig;

/// Every registry must contain this policy.
pub const DEFAULT_POLICY_ID: &str = "default";

/// Bucket id for limits derived from requests-per-minute.
pub const RPM_BUCKET_ID: &str = "rpm";

/// Bucket id for limits derived from requests-per-hour.
pub const RPH_BUCKET_ID: &str = "rph";

/// Maps a policy id to its ordered bucket list.
///
/// Built once at startup from the validated configuration and immutable
/// afterwards; safe to share across threads without further synchronisation.
#[derive(Debug)]
pub struct PolicyRegistry {
    policies: DashMap<String, Arc<Vec<BucketConfig>>>,
}

impl PolicyRegistry {
    /// Build the registry. Fails unless a `"default"` policy is present.
    pub fn new(policies: HashMap<String, Vec<BucketConfig>>) -> Result<Self> {
        if !policies.contains_key(DEFAULT_POLICY_ID) {
            return Err(RateLimitError::ConfigValidation(format!(
                "policy registry must contain a {:?} policy",
                DEFAULT_POLICY_ID
            )));
        }

        let map = DashMap::new();
        for (policy_id, buckets) in policies {
            map.insert(policy_id, Arc::new(buckets));
        }

        Ok(Self { policies: map })
    }

    /// Ordered bucket list for a policy; empty when the policy is unknown.
    pub fn lookup(&self, policy_id: &str) -> Vec<BucketConfig> {
        self.policies
            .get(policy_id)
            .map(|entry| entry.value().as_ref().clone())
            .unwrap_or_default()
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Shortest `expires_in` across all configured buckets. The composition
    /// root uses this to size the memory backend's reaper interval.
    pub fn shortest_expiration(&self) -> Option<Duration> {
        self.policies
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .map(|bucket| bucket.expires_in)
                    .collect::<Vec<_>>()
            })
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::Algorithm;

    fn bucket(id: &str, capacity: i64, rate: f64, expires_secs: u64) -> BucketConfig {
        BucketConfig {
            id: id.to_string(),
            algorithm: Algorithm::TokenBucket,
            capacity,
            rate,
            expires_in: Duration::from_secs(expires_secs),
        }
    }

    #[test]
    fn requires_default_policy() {
        let mut policies = HashMap::new();
        policies.insert("free".to_string(), vec![bucket(RPM_BUCKET_ID, 10, 1.0, 60)]);

        let err = PolicyRegistry::new(policies).unwrap_err();
        assert!(matches!(err, RateLimitError::ConfigValidation(_)));
    }

    #[test]
    fn lookup_preserves_bucket_order() {
        let mut policies = HashMap::new();
        policies.insert(
            DEFAULT_POLICY_ID.to_string(),
            vec![bucket(DEFAULT_POLICY_ID, 100, 10.0, 60)],
        );
        policies.insert(
            "free".to_string(),
            vec![
                bucket(RPM_BUCKET_ID, 10, 1.0, 60),
                bucket(RPH_BUCKET_ID, 10, 10.0 / 36.0, 3600),
            ],
        );

        let registry = PolicyRegistry::new(policies).unwrap();
        let buckets = registry.lookup("free");
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].id, RPM_BUCKET_ID);
        assert_eq!(buckets[1].id, RPH_BUCKET_ID);
    }

    #[test]
    fn unknown_policy_yields_empty_list() {
        let mut policies = HashMap::new();
        policies.insert(
            DEFAULT_POLICY_ID.to_string(),
            vec![bucket(DEFAULT_POLICY_ID, 100, 10.0, 60)],
        );

        let registry = PolicyRegistry::new(policies).unwrap();
        assert!(registry.lookup("enterprise").is_empty());
    }

    #[test]
    fn shortest_expiration_spans_all_policies() {
        let mut policies = HashMap::new();
        policies.insert(
            DEFAULT_POLICY_ID.to_string(),
            vec![bucket(DEFAULT_POLICY_ID, 100, 10.0, 120)],
        );
        policies.insert(
            "free".to_string(),
            vec![bucket(RPM_BUCKET_ID, 10, 1.0, 60), bucket(RPH_BUCKET_ID, 10, 0.3, 3600)],
        );

        let registry = PolicyRegistry::new(policies).unwrap();
        assert_eq!(registry.shortest_expiration(), Some(Duration::from_secs(60)));
    }
}
