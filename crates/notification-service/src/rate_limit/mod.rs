//! 频控
//!
//! 按用户的滚动窗口：窗口内已放行次数小于上限时放行并记录本次时间。
//! 限制的是整次 dispatch，而不是单个渠道。

mod memory;
mod redis;

pub use memory::InMemoryRateLimiter;
pub use self::redis::RedisRateLimiter;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// 频控接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// 放行返回 true 并记录本次发送；拒绝时不记录
    async fn admit(&self, user_id: &str, now: DateTime<Utc>) -> Result<bool>;
}
