//! 进程内频控
//!
//! 重启即清零，也不在实例间共享，仅用于测试和单进程部署。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::RateLimiter;
use crate::error::Result;

pub struct InMemoryRateLimiter {
    max_sends: u32,
    window: chrono::Duration,
    sends: DashMap<String, VecDeque<DateTime<Utc>>>,
    admits: AtomicU64,
}

/// 每隔多少次 admit 清理一次窗口外的用户
const PRUNE_EVERY: u64 = 1024;

impl InMemoryRateLimiter {
    pub fn new(max_sends: u32, window: Duration) -> Self {
        Self {
            max_sends,
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::hours(1)),
            sends: DashMap::new(),
            admits: AtomicU64::new(0),
        }
    }

    /// 删除窗口内已无记录的用户，返回删除数
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let before = self.sends.len();
        self.sends.retain(|_, sends| {
            self.drop_expired(sends, now);
            !sends.is_empty()
        });
        before.saturating_sub(self.sends.len())
    }

    /// 当前跟踪的用户数
    pub fn tracked_users(&self) -> usize {
        self.sends.len()
    }

    // 超过窗口的时间戳释放额度，恰好等于窗口长度的仍计入
    fn drop_expired(&self, sends: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        while let Some(oldest) = sends.front() {
            if now - *oldest > self.window {
                sends.pop_front();
            } else {
                break;
            }
        }
    }

    /// 当前窗口内记录的次数（不做清理）
    pub fn recorded(&self, user_id: &str) -> usize {
        self.sends.get(user_id).map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn admit(&self, user_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let admitted = {
            let mut sends = self.sends.entry(user_id.to_string()).or_default();
            self.drop_expired(&mut sends, now);
            if sends.len() < self.max_sends as usize {
                sends.push_back(now);
                true
            } else {
                false
            }
        };

        // entry 锁释放后才能 retain
        if (self.admits.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            self.prune(now);
        }
        Ok(admitted)
    }
}
