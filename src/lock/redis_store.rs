//! Redis coordination store.
//!
//! Uses `redis::aio::ConnectionManager` for multiplexed connections with
//! automatic reconnection. Acquisition is `SET key token NX PX ttl`; release
//! is a Lua compare-and-delete so it is atomic on the server.

use super::store::{CoordinationStore, SetOutcome};
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisCoordinationStore {
    connection_manager: redis::aio::ConnectionManager,
    compare_and_delete: redis::Script,
}

impl std::fmt::Debug for RedisCoordinationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCoordinationStore")
            .field("connection_manager", &"ConnectionManager")
            .finish()
    }
}

impl RedisCoordinationStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            SessionError::LockTransportUnavailable(format!("Failed to create Redis client: {e}"))
        })?;

        let connection_manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| {
                SessionError::LockTransportUnavailable(format!("Failed to connect to Redis: {e}"))
            })?;

        debug!(url = %redact_url(url), "Redis coordination store connected");

        Ok(Self {
            connection_manager,
            compare_and_delete: redis::Script::new(COMPARE_AND_DELETE),
        })
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<SetOutcome> {
        let mut conn = self.connection_manager.clone();
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::LockTransportUnavailable(format!("Redis SET NX failed: {e}")))?;

        if reply.is_some() {
            debug!(key = key, ttl_ms = ttl_ms, "Lock SET NX acquired");
            return Ok(SetOutcome::Acquired);
        }

        // -2 missing, -1 no expiry; neither gives a usable hint
        let pttl: i64 = redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::LockTransportUnavailable(format!("Redis PTTL failed: {e}")))?;

        let remaining = u64::try_from(pttl).ok().map(Duration::from_millis);
        debug!(key = key, remaining_ms = pttl, "Lock SET NX held by another owner");
        Ok(SetOutcome::Held { remaining })
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                SessionError::LockTransportUnavailable(format!("Redis compare-and-delete failed: {e}"))
            })?;

        debug!(key = key, deleted = deleted, "Lock compare-and-delete");
        Ok(deleted == 1)
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| SessionError::LockTransportUnavailable(format!("Redis PING failed: {e}")))?;

        Ok(pong == "PONG")
    }

    fn is_distributed(&self) -> bool {
        true
    }

    fn provider_name(&self) -> &'static str {
        "redis"
    }
}

/// Redact credentials from a Redis URL for logging
pub(crate) fn redact_url(url: &str) -> String {
    let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
    let rest = &url[scheme_end..];
    let authority = rest.split('/').next().unwrap_or(rest);
    // Userinfo only counts inside the authority; passwords may contain '@'
    let Some(at_pos) = authority.rfind('@').map(|p| p + scheme_end) else {
        return url.to_string();
    };

    let userinfo = &url[scheme_end..at_pos];
    match userinfo.find(':') {
        Some(colon) => format!("{}{}:***{}", &url[..scheme_end], &userinfo[..colon], &url[at_pos..]),
        None => format!("{}***{}", &url[..scheme_end], &url[at_pos..]),
    }
}
