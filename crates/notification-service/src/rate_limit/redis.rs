//! Redis 频控
//!
//! 每个用户一个有序集合，score 为发送时间（毫秒）。清理、计数、写入在
//! 同一个 Lua 脚本里完成，多个实例并发 dispatch 时共享同一份额度。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notify_shared::cache::{Cache, CacheKey};
use notify_shared::retry::{RetryPolicy, retry_with_policy};
use redis::Script;
use tracing::debug;
use uuid::Uuid;

use super::RateLimiter;
use crate::error::{NotificationError, Result};

const ADMIT_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local max_sends = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))
if redis.call('ZCARD', key) < max_sends then
    redis.call('ZADD', key, now, ARGV[4])
    redis.call('PEXPIRE', key, window)
    return 1
end
return 0
"#;

pub struct RedisRateLimiter {
    cache: Cache,
    max_sends: u32,
    window: Duration,
    script: Script,
    retry: RetryPolicy,
}

impl RedisRateLimiter {
    pub fn new(cache: Cache, max_sends: u32, window: Duration) -> Self {
        Self {
            cache,
            max_sends,
            window,
            script: Script::new(ADMIT_SCRIPT),
            retry: RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(500),
                multiplier: 2.0,
            },
        }
    }

    async fn try_admit(&self, key: &str, now_ms: i64) -> Result<bool> {
        let mut conn = self.cache.connection().await?;
        let admitted: i32 = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(self.window.as_millis() as i64)
            .arg(self.max_sends)
            .arg(format!("{}-{}", now_ms, Uuid::now_v7()))
            .invoke_async(&mut conn)
            .await?;
        Ok(admitted == 1)
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn admit(&self, user_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let key = CacheKey::rate_limit(self.cache.key_prefix(), user_id);
        let now_ms = now.timestamp_millis();

        let admitted = retry_with_policy(
            &self.retry,
            "rate_limit_admit",
            NotificationError::is_retryable,
            || self.try_admit(&key, now_ms),
        )
        .await?;

        debug!(user_id, admitted, "频控检查");
        Ok(admitted)
    }
}
