use deadpool::managed::PoolConfig as DeadpoolPoolConfig;
use deadpool_redis::{Config as DeadpoolRedisConfig, Pool, Runtime};

use crate::env::Specification;
use crate::errors::{RateLimitError, Result};
use tracing::{debug, info};

/// Create a Redis connection pool from the process specification.
pub async fn create_redis_pool(spec: &Specification) -> Result<Pool> {
    info!("Creating Redis connection pool...");

    let mut cfg = DeadpoolRedisConfig::from_url(spec.redis_url()?);
    cfg.pool = Some(DeadpoolPoolConfig::new(spec.redis_pool_size));

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| RateLimitError::Pool(format!("pool creation failed: {}", e)))?;

    info!(pool_size = spec.redis_pool_size, "Redis connection pool created");

    // Test connection
    debug!("Testing Redis connection...");
    let mut conn = pool
        .get()
        .await
        .map_err(|e| RateLimitError::Pool(format!("failed to get connection: {}", e)))?;

    let _pong: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(RateLimitError::RedisConnection)?;

    info!("Redis connection test successful");

    Ok(pool)
}
