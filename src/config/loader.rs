use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::validator::validate_config;
use crate::config::{AppConfigRaw, Config, MetricsConfig, RateLimiterRaw};
use crate::errors::Result;
use crate::limiter::registry::{PolicyRegistry, DEFAULT_POLICY_ID, RPH_BUCKET_ID, RPM_BUCKET_ID};
use crate::limiter::{Algorithm, BucketConfig};

const MINUTE_IN_SECONDS: f64 = 60.0;
const HOUR_IN_SECONDS: f64 = 3600.0;

/// Load, validate and compile the configuration from a JSON file.
pub async fn load_config_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    info!("Loading configuration from: {}", path.display());

    let contents = tokio::fs::read_to_string(path).await?;
    let raw: AppConfigRaw = serde_json::from_str(&contents)?;

    let config = build_config(raw)?;
    info!("Configuration loaded and validated successfully");
    log_config_summary(&config);

    Ok(config)
}

/// Validate a raw configuration and compile it into the runtime form.
pub fn build_config(raw: AppConfigRaw) -> Result<Config> {
    validate_config(&raw)?;

    let mut policies = HashMap::new();
    policies.insert(
        DEFAULT_POLICY_ID.to_string(),
        vec![compile_default(&raw.rate_limits.default)?],
    );

    for (policy_id, item) in &raw.rate_limits.items {
        policies.insert(policy_id.clone(), compile_item(item)?);
    }

    let registry = PolicyRegistry::new(policies)?;
    let metrics = compile_metrics(&raw);

    Ok(Config {
        registry: Arc::new(registry),
        metrics,
    })
}

/// The default policy is a single bucket with an explicit rate.
fn compile_default(default: &RateLimiterRaw) -> Result<BucketConfig> {
    let algorithm: Algorithm = default.algorithm.parse()?;

    // Validation guarantees the rate matching the algorithm is present.
    let rate = match algorithm {
        Algorithm::TokenBucket => default.refill_rate.unwrap_or_default(),
        Algorithm::LeakyBucket => default.leak_rate.unwrap_or_default(),
    };

    Ok(BucketConfig {
        id: DEFAULT_POLICY_ID.to_string(),
        algorithm,
        capacity: default.capacity,
        rate,
        expires_in: Duration::from_secs(default.expiration as u64),
    })
}

/// Named policies derive one bucket per request-rate field, rpm before rph.
fn compile_item(item: &RateLimiterRaw) -> Result<Vec<BucketConfig>> {
    let algorithm: Algorithm = item.algorithm.parse()?;
    let expires_in = Duration::from_secs(item.expiration as u64);

    let mut buckets = Vec::new();

    if let Some(rpm) = item.requests_per_minute {
        buckets.push(BucketConfig {
            id: RPM_BUCKET_ID.to_string(),
            algorithm,
            capacity: item.capacity,
            rate: rpm as f64 / MINUTE_IN_SECONDS,
            expires_in,
        });
    }

    if let Some(rph) = item.requests_per_hour {
        buckets.push(BucketConfig {
            id: RPH_BUCKET_ID.to_string(),
            algorithm,
            capacity: item.capacity,
            rate: rph as f64 / HOUR_IN_SECONDS,
            expires_in,
        });
    }

    Ok(buckets)
}

fn compile_metrics(raw: &AppConfigRaw) -> MetricsConfig {
    match &raw.metrics {
        None => MetricsConfig::default(),
        Some(section) => MetricsConfig {
            enabled: section.enabled.unwrap_or(true),
            // Validation rejects an absent or empty path when the section is
            // present.
            path: section.path.clone().unwrap_or_default(),
        },
    }
}

fn log_config_summary(config: &Config) {
    info!("=== Configuration Summary ===");
    info!("Policies: {}", config.registry.policy_count());
    info!(
        "Metrics: enabled={} path={}",
        config.metrics.enabled, config.metrics.path
    );
    if let Some(shortest) = config.shortest_expiration() {
        debug!("Shortest bucket expiry: {:?}", shortest);
    }
    info!("=============================");
}
