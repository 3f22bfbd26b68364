use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateLimitError {
    #[error("config validation failed: {0}")]
    ConfigValidation(String),

    #[error("failed to read config file: {0}")]
    ConfigFileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("refill_rate is required for the default token bucket")]
    MissingRefillRateInDefault,

    #[error("leak_rate is required for the default leaky bucket")]
    MissingLeakRateInDefault,

    #[error("invalid environment: {0}")]
    Env(String),

    #[error("redis connection error: {0}")]
    RedisConnection(#[from] redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(String),

    #[error("script execution error: {0}")]
    ScriptExecution(String),

    #[error("backend deadline exceeded: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RateLimitError {
    /// True for errors that are fatal at startup rather than transient at
    /// decision time.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RateLimitError::ConfigValidation(_)
                | RateLimitError::ConfigFileRead(_)
                | RateLimitError::ConfigParse(_)
                | RateLimitError::MissingRefillRateInDefault
                | RateLimitError::MissingLeakRateInDefault
                | RateLimitError::Env(_)
        )
    }
}

/// Result type alias for rate limiter operations
pub type Result<T> = std::result::Result<T, RateLimitError>;
