use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_counter, CounterVec, HistogramVec,
    IntCounter,
};

lazy_static! {
    // Decision metrics
    pub static ref DECISIONS_TOTAL: CounterVec = register_counter_vec!(
        "rate_limiter_decisions_total",
        "Total number of rate limit decisions",
        &["policy", "allowed"]
    ).unwrap();

    pub static ref DENIALS_TOTAL: CounterVec = register_counter_vec!(
        "rate_limiter_denials_total",
        "Total number of denied requests, labelled by the denying bucket",
        &["policy", "bucket"]
    ).unwrap();

    pub static ref DECISION_DURATION: HistogramVec = register_histogram_vec!(
        "rate_limiter_decision_duration_seconds",
        "Decision latency in seconds",
        &["policy", "allowed"],
        vec![0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5]
    ).unwrap();

    // Backend metrics
    pub static ref SCRIPT_EXECUTIONS_TOTAL: CounterVec = register_counter_vec!(
        "rate_limiter_script_executions_total",
        "Total number of server-side script executions",
        &["algorithm", "result"]
    ).unwrap();

    pub static ref BACKEND_ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "rate_limiter_backend_errors_total",
        "Total number of backend errors converted into denials",
        &["error_type"]
    ).unwrap();

    pub static ref REAPED_KEYS_TOTAL: IntCounter = register_int_counter!(
        "rate_limiter_reaped_keys_total",
        "Total number of expired bucket keys removed by the reaper"
    ).unwrap();
}

/// Record one rate limit decision
pub fn record_decision(policy: &str, allowed: bool, duration_secs: f64) {
    let allowed_str = if allowed { "true" } else { "false" };
    DECISIONS_TOTAL.with_label_values(&[policy, allowed_str]).inc();
    DECISION_DURATION
        .with_label_values(&[policy, allowed_str])
        .observe(duration_secs);
}

/// Record a denial attributed to the bucket that produced it
pub fn record_denial(policy: &str, bucket: &str) {
    DENIALS_TOTAL.with_label_values(&[policy, bucket]).inc();
}

/// Record a server-side script execution
pub fn record_script_execution(algorithm: &str, success: bool) {
    let result = if success { "ok" } else { "error" };
    SCRIPT_EXECUTIONS_TOTAL
        .with_label_values(&[algorithm, result])
        .inc();
}

/// Record a backend error that the decision client converted to deny
pub fn record_backend_error(error_type: &str) {
    BACKEND_ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Record keys removed by the memory backend's reaper
pub fn record_reaped_keys(count: usize) {
    REAPED_KEYS_TOTAL.inc_by(count as u64);
}
