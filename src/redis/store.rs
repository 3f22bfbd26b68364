use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::{AsyncCommands, Script};
use tracing::{debug, error};

use crate::clock::Clock;
use crate::errors::{RateLimitError, Result};
use crate::limiter::Algorithm;
use crate::metrics;
use crate::redis::script::{leaky_bucket_script, load_scripts, token_bucket_script};
use crate::storage::{BucketSnapshot, BucketStore};

/// Applied to every scripted round-trip unless overridden.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Remote storage backend.
///
/// Each decision is one server-side script execution, so concurrent clients
/// cannot interleave read and write on a key; the store's single-threaded
/// scripting replaces the memory backend's mutex. Time is passed in as unix
/// seconds, so the remote resolution is deliberately coarser than the memory
/// backend's nanoseconds.
pub struct RedisStore {
    pool: Arc<Pool>,
    token_script: Script,
    leaky_script: Script,
    command_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RedisStore {
    /// Create a store over an existing pool and prime the script cache.
    pub async fn new(pool: Pool, clock: Arc<dyn Clock>) -> Result<Self> {
        let pool = Arc::new(pool);

        let mut conn = pool
            .get()
            .await
            .map_err(|e| RateLimitError::Pool(format!("failed to get connection for script loading: {}", e)))?;
        load_scripts(&mut *conn).await?;

        Ok(Self {
            pool,
            token_script: token_bucket_script(),
            leaky_script: leaky_bucket_script(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            clock,
        })
    }

    /// Override the per-call deadline for the scripted round-trip.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    async fn run_script(
        &self,
        script: &Script,
        algorithm: &str,
        key: &str,
        capacity: i64,
        rate: f64,
        expires_in: Duration,
        deadline: Option<Duration>,
    ) -> Result<bool> {
        let mut conn = self.checkout().await?;

        // The wire contract runs at seconds resolution; fractional expiries
        // round up so the remote TTL is never shorter than configured.
        let expires_secs = (expires_in.as_secs_f64().ceil() as i64).max(1);
        let now_unix = self.clock.now_unix();
        let timeout = deadline.unwrap_or(self.command_timeout);

        debug!(key, algorithm, capacity, rate, "executing bucket script");

        let invocation = tokio::time::timeout(timeout, async {
            let reply: Vec<redis::Value> = script
                .key(key)
                .arg(capacity)
                .arg(rate)
                .arg(expires_secs)
                .arg(now_unix)
                .invoke_async(&mut *conn)
                .await?;
            Ok::<_, redis::RedisError>(reply)
        })
        .await;

        let reply = match invocation {
            Err(_elapsed) => {
                metrics::record_script_execution(algorithm, false);
                return Err(RateLimitError::Timeout(format!(
                    "{} script exceeded {:?}",
                    algorithm, timeout
                )));
            }
            Ok(Err(e)) => {
                metrics::record_script_execution(algorithm, false);
                error!(key, algorithm, "script execution failed: {}", e);
                return Err(RateLimitError::ScriptExecution(format!(
                    "{} script failed: {}",
                    algorithm, e
                )));
            }
            Ok(Ok(reply)) => reply,
        };

        let (allowed, bucket_size) = parse_script_reply(&reply)?;
        metrics::record_script_execution(algorithm, true);
        debug!(key, algorithm, allowed, bucket_size, "script result");

        Ok(allowed)
    }

    async fn checkout(&self) -> Result<deadpool_redis::Connection> {
        self.pool.get().await.map_err(|e| {
            error!("failed to get Redis connection: {}", e);
            RateLimitError::Pool(format!("pool checkout failed: {}", e))
        })
    }
}

#[async_trait]
impl BucketStore for RedisStore {
    async fn check_and_update_token_bucket(
        &self,
        key: &str,
        capacity: i64,
        refill_rate: f64,
        expires_in: Duration,
        deadline: Option<Duration>,
    ) -> Result<bool> {
        self.run_script(
            &self.token_script,
            "token_bucket",
            key,
            capacity,
            refill_rate,
            expires_in,
            deadline,
        )
        .await
    }

    async fn check_and_update_leaky_bucket(
        &self,
        key: &str,
        capacity: i64,
        leak_rate: f64,
        expires_in: Duration,
        deadline: Option<Duration>,
    ) -> Result<bool> {
        self.run_script(
            &self.leaky_script,
            "leaky_bucket",
            key,
            capacity,
            leak_rate,
            expires_in,
            deadline,
        )
        .await
    }

    async fn read_bucket(&self, key: &str) -> Result<Option<BucketSnapshot>> {
        let mut conn = self.checkout().await?;

        let fields: HashMap<String, String> =
            tokio::time::timeout(self.command_timeout, conn.hgetall(key))
                .await
                .map_err(|_| {
                    RateLimitError::Timeout(format!("HGETALL exceeded {:?}", self.command_timeout))
                })?
                .map_err(RateLimitError::RedisConnection)?;

        parse_snapshot(&fields)
    }

    async fn delete_bucket(&self, key: &str) -> Result<bool> {
        let mut conn = self.checkout().await?;

        let removed: i64 = tokio::time::timeout(self.command_timeout, conn.del(key))
            .await
            .map_err(|_| {
                RateLimitError::Timeout(format!("DEL exceeded {:?}", self.command_timeout))
            })?
            .map_err(RateLimitError::RedisConnection)?;

        Ok(removed > 0)
    }
}

/// Parse the `[allowed, bucket_size]` integer pair returned by both scripts.
/// Only the verdict is consumed; the size is diagnostic.
fn parse_script_reply(reply: &[redis::Value]) -> Result<(bool, i64)> {
    if reply.len() != 2 {
        return Err(RateLimitError::ScriptExecution(format!(
            "invalid script response length: {}",
            reply.len()
        )));
    }

    let allowed = match &reply[0] {
        redis::Value::Int(v) => *v == 1,
        other => {
            return Err(RateLimitError::ScriptExecution(format!(
                "invalid allowed value type: {:?}",
                other
            )))
        }
    };

    let bucket_size = match &reply[1] {
        redis::Value::Int(v) => *v,
        other => {
            return Err(RateLimitError::ScriptExecution(format!(
                "invalid bucket_size value type: {:?}",
                other
            )))
        }
    };

    Ok((allowed, bucket_size))
}

/// Decode a bucket hash into a snapshot. The algorithm is identified by
/// which last-event field the hash carries.
fn parse_snapshot(fields: &HashMap<String, String>) -> Result<Option<BucketSnapshot>> {
    if fields.is_empty() {
        return Ok(None);
    }

    let bucket_size = fields
        .get("bucket_size")
        .ok_or_else(|| RateLimitError::Internal("bucket hash missing bucket_size".to_string()))?
        .parse::<f64>()
        .map_err(|e| RateLimitError::Internal(format!("malformed bucket_size: {}", e)))?;

    let (algorithm, last_event) = if let Some(last) = fields.get("last_refill_unix") {
        (Algorithm::TokenBucket, last)
    } else if let Some(last) = fields.get("last_leak_unix") {
        (Algorithm::LeakyBucket, last)
    } else {
        return Err(RateLimitError::Internal(
            "bucket hash missing last event field".to_string(),
        ));
    };

    let last_event_unix = last_event
        .parse::<i64>()
        .map_err(|e| RateLimitError::Internal(format!("malformed last event: {}", e)))?;

    Ok(Some(BucketSnapshot {
        algorithm,
        bucket_size,
        last_event_unix,
    }))
}
