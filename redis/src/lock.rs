//! Redis lock coordinator.
//!
//! Acquire is a single `SET key token NX PX ttl`. Release runs a Lua script
//! that deletes the key only if it still holds our token, so a holder whose TTL
//! lapsed can never delete a lock someone else has since taken.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use seatkeeper_core::lock::{LockCoordinator, LockError, LockKey, LockToken};
use std::time::Duration;

/// Returns 1 when deleted, 0 when the key is gone, -1 when another token holds it.
const RELEASE_SCRIPT: &str = r"
    local current = redis.call('GET', KEYS[1])
    if not current then
        return 0
    end
    if current ~= ARGV[1] then
        return -1
    end
    redis.call('DEL', KEYS[1])
    return 1
";

/// Lock coordinator shared by every service instance pointed at the same Redis.
#[derive(Clone)]
pub struct RedisLockCoordinator {
    conn: ConnectionManager,
    release_script: redis::Script,
}

impl RedisLockCoordinator {
    /// Create a coordinator on an existing connection.
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }
}

#[async_trait]
impl LockCoordinator for RedisLockCoordinator {
    async fn acquire(&self, key: &LockKey, ttl: Duration) -> Result<LockToken, LockError> {
        let mut conn = self.conn.clone();
        let name = key.to_string();
        let token = LockToken::generate();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(&name)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Unavailable(format!("SET {name}: {e}")))?;

        match reply {
            Some(_) => {
                tracing::debug!(lock = %name, ttl_ms, "Lock acquired");
                Ok(token)
            }
            None => Err(LockError::AlreadyLocked(name)),
        }
    }

    async fn release(&self, key: &LockKey, token: &LockToken) -> Result<(), LockError> {
        let mut conn = self.conn.clone();
        let name = key.to_string();

        let outcome: i64 = self
            .release_script
            .key(&name)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Unavailable(format!("release {name}: {e}")))?;

        match outcome {
            1 => Ok(()),
            0 => Err(LockError::Expired(name)),
            _ => Err(LockError::InvalidToken(name)),
        }
    }
}
