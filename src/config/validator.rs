use tracing::debug;

use crate::config::{AppConfigRaw, MetricsRaw, RateLimiterRaw};
use crate::errors::{RateLimitError, Result};
use crate::limiter::Algorithm;

/// Validate the entire raw configuration.
pub fn validate_config(config: &AppConfigRaw) -> Result<()> {
    debug!("Validating configuration...");

    validate_default(&config.rate_limits.default)?;

    for (policy_id, item) in &config.rate_limits.items {
        validate_item(policy_id, item)?;
    }

    if let Some(metrics) = &config.metrics {
        validate_metrics(metrics)?;
    }

    debug!("Configuration validation successful");
    Ok(())
}

/// The default policy must carry an explicit rate matching its algorithm.
fn validate_default(default: &RateLimiterRaw) -> Result<()> {
    let algorithm: Algorithm = default.algorithm.parse()?;
    validate_bounds("default", default)?;

    match algorithm {
        Algorithm::TokenBucket => match default.refill_rate {
            None => return Err(RateLimitError::MissingRefillRateInDefault),
            Some(rate) if rate <= 0.0 => {
                return Err(RateLimitError::ConfigValidation(format!(
                    "refill_rate must be positive for the default policy (got {})",
                    rate
                )))
            }
            Some(_) => {}
        },
        Algorithm::LeakyBucket => match default.leak_rate {
            None => return Err(RateLimitError::MissingLeakRateInDefault),
            Some(rate) if rate <= 0.0 => {
                return Err(RateLimitError::ConfigValidation(format!(
                    "leak_rate must be positive for the default policy (got {})",
                    rate
                )))
            }
            Some(_) => {}
        },
    }

    Ok(())
}

/// Named policies derive their rates, so at least one request-rate field must
/// be present.
fn validate_item(policy_id: &str, item: &RateLimiterRaw) -> Result<()> {
    if policy_id.is_empty() {
        return Err(RateLimitError::ConfigValidation(
            "policy id cannot be empty".to_string(),
        ));
    }

    let _: Algorithm = item.algorithm.parse()?;
    validate_bounds(policy_id, item)?;

    if item.requests_per_minute.is_none() && item.requests_per_hour.is_none() {
        return Err(RateLimitError::ConfigValidation(format!(
            "policy {:?} must set requests_per_minute or requests_per_hour",
            policy_id
        )));
    }

    for (name, value) in [
        ("requests_per_minute", item.requests_per_minute),
        ("requests_per_hour", item.requests_per_hour),
    ] {
        if let Some(v) = value {
            if v <= 0 {
                return Err(RateLimitError::ConfigValidation(format!(
                    "{} must be positive for policy {:?} (got {})",
                    name, policy_id, v
                )));
            }
        }
    }

    Ok(())
}

fn validate_bounds(policy_id: &str, record: &RateLimiterRaw) -> Result<()> {
    if record.capacity <= 0 {
        return Err(RateLimitError::ConfigValidation(format!(
            "capacity must be positive for policy {:?} (got {})",
            policy_id, record.capacity
        )));
    }

    if record.expiration <= 0 {
        return Err(RateLimitError::ConfigValidation(format!(
            "expiration must be positive for policy {:?} (got {})",
            policy_id, record.expiration
        )));
    }

    Ok(())
}

fn validate_metrics(metrics: &MetricsRaw) -> Result<()> {
    match &metrics.path {
        Some(path) if !path.is_empty() => Ok(()),
        _ => Err(RateLimitError::ConfigValidation(
            "metrics path cannot be empty".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::config::RateLimitsRaw;

    fn default_record() -> RateLimiterRaw {
        RateLimiterRaw {
            algorithm: "token_bucket".to_string(),
            capacity: 100,
            expiration: 60,
            refill_rate: Some(10.0),
            leak_rate: None,
            requests_per_minute: None,
            requests_per_hour: None,
        }
    }

    fn item_record() -> RateLimiterRaw {
        RateLimiterRaw {
            algorithm: "token_bucket".to_string(),
            capacity: 10,
            expiration: 60,
            refill_rate: None,
            leak_rate: None,
            requests_per_minute: Some(60),
            requests_per_hour: None,
        }
    }

    fn config_with(default: RateLimiterRaw, items: Vec<(&str, RateLimiterRaw)>) -> AppConfigRaw {
        AppConfigRaw {
            rate_limits: RateLimitsRaw {
                default,
                items: items
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect::<HashMap<_, _>>(),
            },
            metrics: None,
        }
    }

    #[test]
    fn accepts_valid_config() {
        let config = config_with(default_record(), vec![("free", item_record())]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let mut default = default_record();
        default.algorithm = "sliding_window".to_string();

        let err = validate_config(&config_with(default, vec![])).unwrap_err();
        assert!(matches!(err, RateLimitError::ConfigValidation(_)));
    }

    #[test]
    fn default_token_bucket_requires_refill_rate() {
        let mut default = default_record();
        default.refill_rate = None;

        let err = validate_config(&config_with(default, vec![])).unwrap_err();
        assert!(matches!(err, RateLimitError::MissingRefillRateInDefault));
    }

    #[test]
    fn default_leaky_bucket_requires_leak_rate() {
        let mut default = default_record();
        default.algorithm = "leaky_bucket".to_string();
        default.refill_rate = None;
        default.leak_rate = None;

        let err = validate_config(&config_with(default, vec![])).unwrap_err();
        assert!(matches!(err, RateLimitError::MissingLeakRateInDefault));
    }

    #[test]
    fn rejects_non_positive_capacity_and_expiration() {
        let mut default = default_record();
        default.capacity = 0;
        assert!(validate_config(&config_with(default, vec![])).is_err());

        let mut default = default_record();
        default.expiration = -1;
        assert!(validate_config(&config_with(default, vec![])).is_err());
    }

    #[test]
    fn item_requires_a_request_rate() {
        let mut item = item_record();
        item.requests_per_minute = None;
        item.requests_per_hour = None;

        let err =
            validate_config(&config_with(default_record(), vec![("free", item)])).unwrap_err();
        assert!(matches!(err, RateLimitError::ConfigValidation(_)));
    }

    #[test]
    fn item_rejects_non_positive_request_rate() {
        let mut item = item_record();
        item.requests_per_minute = Some(0);

        assert!(validate_config(&config_with(default_record(), vec![("free", item)])).is_err());
    }

    #[test]
    fn metrics_section_requires_path() {
        let mut config = config_with(default_record(), vec![]);
        config.metrics = Some(MetricsRaw {
            enabled: Some(true),
            path: None,
        });
        assert!(validate_config(&config).is_err());

        config.metrics = Some(MetricsRaw {
            enabled: Some(true),
            path: Some(String::new()),
        });
        assert!(validate_config(&config).is_err());

        config.metrics = Some(MetricsRaw {
            enabled: None,
            path: Some("/metrics".to_string()),
        });
        assert!(validate_config(&config).is_ok());
    }
}
