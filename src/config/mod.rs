pub mod loader;
pub mod validator;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::limiter::registry::PolicyRegistry;

/// Raw application configuration, as parsed from the config file. Validation
/// happens in [`validator`], compilation into runtime types in [`loader`].
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfigRaw {
    pub rate_limits: RateLimitsRaw,

    #[serde(default)]
    pub metrics: Option<MetricsRaw>,
}

/// Rate limiting section: one required default policy plus named policies.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitsRaw {
    pub default: RateLimiterRaw,

    #[serde(default)]
    pub items: HashMap<String, RateLimiterRaw>,
}

/// One policy record before validation.
///
/// The default policy carries an explicit rate (`refill_rate` or `leak_rate`
/// depending on the algorithm); named policies derive their rates from
/// `requests_per_minute` / `requests_per_hour`.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimiterRaw {
    pub algorithm: String,

    /// Maximum bucket fullness
    pub capacity: i64,

    /// Idle expiry in seconds
    pub expiration: i64,

    #[serde(default)]
    pub refill_rate: Option<f64>,

    #[serde(default)]
    pub leak_rate: Option<f64>,

    #[serde(default)]
    pub requests_per_minute: Option<i64>,

    #[serde(default)]
    pub requests_per_hour: Option<i64>,
}

/// Metrics section before validation
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsRaw {
    #[serde(default)]
    pub enabled: Option<bool>,

    #[serde(default)]
    pub path: Option<String>,
}

/// Validated metrics configuration
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

/// Validated application configuration
#[derive(Debug)]
pub struct Config {
    pub registry: Arc<PolicyRegistry>,
    pub metrics: MetricsConfig,
}

impl Config {
    /// Shortest configured bucket expiry; the memory backend's reaper should
    /// run at least this often.
    pub fn shortest_expiration(&self) -> Option<Duration> {
        self.registry.shortest_expiration()
    }
}
