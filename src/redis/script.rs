use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use crate::errors::{RateLimitError, Result};

/// Script handle for the token bucket algorithm
pub fn token_bucket_script() -> Script {
    Script::new(include_str!("../../scripts/token_bucket.lua"))
}

/// Script handle for the leaky bucket algorithm
pub fn leaky_bucket_script() -> Script {
    Script::new(include_str!("../../scripts/leaky_bucket.lua"))
}

/// Prime both script SHAs in the server's script cache so later invocations
/// take the EVALSHA fast path.
pub async fn load_scripts<C: AsyncCommands>(conn: &mut C) -> Result<()> {
    debug!("Loading bucket Lua scripts into Redis...");

    for (name, script) in [
        ("token_bucket", token_bucket_script()),
        ("leaky_bucket", leaky_bucket_script()),
    ] {
        let sha = script
            .prepare_invoke()
            .load_async(conn)
            .await
            .map_err(|e| {
                RateLimitError::ScriptExecution(format!("failed to load {} script: {}", name, e))
            })?;
        info!(script = name, sha = %sha, "Lua script loaded");
    }

    Ok(())
}
