//! Fixed-window rate limiter keyed by client identity.
//!
//! The first request in a window starts its expiry; every request increments
//! the counter; requests past `max_requests` are rejected until the window
//! lapses. Failures of the counting store are returned to the caller, never
//! treated as "allow".

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::Script;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;
use tokio::time::Instant;

use herald_common::error::AppError;

/// Increment and, for the first hit of a window, set the expiry, in one
/// atomic step. Also repairs a counter that somehow lost its TTL.
const INCR_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Requests allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u64,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new(20, Duration::from_secs(60))
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request for `client_key` and report whether it is within the limit.
    async fn allow(&self, client_key: &str) -> Result<bool, AppError>;
}

/// Redis-backed limiter shared by every API instance.
pub struct RedisRateLimiter {
    redis: ConnectionManager,
    policy: RateLimitPolicy,
    script: Script,
}

impl RedisRateLimiter {
    pub fn new(redis: ConnectionManager, policy: RateLimitPolicy) -> Self {
        Self {
            redis,
            policy,
            script: Script::new(INCR_WITH_EXPIRY),
        }
    }

    fn key(client_key: &str) -> String {
        format!("herald:ratelimit:{}", client_key)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn allow(&self, client_key: &str) -> Result<bool, AppError> {
        let mut redis = self.redis.clone();
        let window_ms = self.policy.window.as_millis().max(1) as u64;

        let count: u64 = self
            .script
            .key(Self::key(client_key))
            .arg(window_ms)
            .invoke_async(&mut redis)
            .await?;

        let allowed = count <= self.policy.max_requests;
        if !allowed {
            tracing::debug!(
                client = %client_key,
                count,
                limit = self.policy.max_requests,
                "Rate limit exceeded"
            );
        }

        Ok(allowed)
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u64,
}

/// Single-process limiter with the same windowing rules as `RedisRateLimiter`.
pub struct MemoryRateLimiter {
    policy: RateLimitPolicy,
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryRateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn allow(&self, client_key: &str) -> Result<bool, AppError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        let window = windows
            .entry(client_key.to_string())
            .or_insert(Window {
                started: now,
                count: 0,
            });

        if now.duration_since(window.started) >= self.policy.window {
            window.started = now;
            window.count = 0;
        }

        window.count += 1;
        Ok(window.count <= self.policy.max_requests)
    }
}
