//! 重试队列处理
//!
//! 每次调用 `process_queue` 处理一批到期条目：
//!
//! 1. 领取租约超时仍停在 processing 的条目退回 pending（处理进程崩溃或写回失败）
//! 2. 把已过期的 pending 条目标记为 failed
//! 3. 原子领取一批到期条目（pending -> processing）
//! 4. 对每个条目重跑流水线：用户 → 偏好 → 单渠道资格 → 免打扰 → 发送
//! 5. 写回结果：成功 sent；失败按 base * multiplier^attempts 退避重试，
//!    超过 max_attempts 进入终态 failed
//!
//! 队列重跑不经过频控。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use notify_shared::observability::metrics;
use notify_shared::retry::RetryPolicy;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::creator::NotificationCreator;
use crate::dispatcher::{DispatchContext, Dispatcher};
use crate::error::Result;
use crate::models::{DeliveryStatus, QueueItem, QueueItemUpdate, QueueStatus};
use crate::preference::PreferenceResolver;
use crate::repository::{QueueRepository, UserDirectory};
use crate::selector::ChannelSelector;

/// 单个条目的处理结论
#[derive(Debug, Clone, PartialEq, Eq)]
enum Attempt {
    Sent {
        notification_id: Uuid,
    },
    /// 计一次尝试，可能重试
    Failed {
        error: String,
        notification_id: Option<Uuid>,
    },
    /// 不再重试（用户不存在、已退订等），不计尝试
    Rejected {
        reason: String,
    },
    /// 免打扰顺延，不计尝试
    Deferred {
        until: DateTime<Utc>,
    },
}

/// 写回后的条目去向，用于指标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueItemResult {
    Sent,
    Retry,
    Failed,
    Deferred,
}

impl QueueItemResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Retry => "retry",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
        }
    }
}

#[derive(Clone)]
pub struct QueueProcessor {
    queue: Arc<dyn QueueRepository>,
    users: Arc<dyn UserDirectory>,
    resolver: Arc<PreferenceResolver>,
    selector: ChannelSelector,
    creator: Arc<NotificationCreator>,
    dispatcher: Arc<Dispatcher>,
    backoff: RetryPolicy,
    batch_size: i64,
    concurrency: usize,
    claim_lease: Duration,
}

/// 默认领取租约
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(600);

impl QueueProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn QueueRepository>,
        users: Arc<dyn UserDirectory>,
        resolver: Arc<PreferenceResolver>,
        creator: Arc<NotificationCreator>,
        dispatcher: Arc<Dispatcher>,
        backoff: RetryPolicy,
        batch_size: i64,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            users,
            resolver,
            selector: ChannelSelector::new(),
            creator,
            dispatcher,
            backoff,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    /// 设置领取租约，应明显长于单渠道发送超时
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// 处理一批到期条目，返回领取到的条目数
    #[instrument(skip(self), fields(batch_size = self.batch_size))]
    pub async fn process_queue(&self, now: DateTime<Utc>) -> Result<usize> {
        let started = Instant::now();

        let stale_before = chrono::Duration::from_std(self.claim_lease)
            .ok()
            .and_then(|lease| now.checked_sub_signed(lease));
        if let Some(stale_before) = stale_before {
            let reclaimed = self.queue.reclaim_stale(stale_before, now).await?;
            if reclaimed > 0 {
                warn!(reclaimed, "领取租约超时，条目已退回 pending");
                for _ in 0..reclaimed {
                    metrics::record_queue_item("reclaimed");
                }
            }
        }

        let expired = self.queue.expire_due(now).await?;
        if expired > 0 {
            info!(expired, "过期条目已标记为失败");
            for _ in 0..expired {
                metrics::record_queue_item("expired");
            }
        }

        let items = self.queue.claim_due(now, self.batch_size).await?;
        let claimed = items.len();
        if claimed == 0 {
            debug!("没有到期的队列条目");
            metrics::set_queue_last_run(now.timestamp() as f64);
            return Ok(0);
        }

        let results: Vec<QueueItemResult> = futures::stream::iter(items)
            .map(|item| self.process_item(item, now))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let sent = results.iter().filter(|r| **r == QueueItemResult::Sent).count();
        info!(
            claimed,
            sent,
            duration_ms = started.elapsed().as_millis() as u64,
            "队列批次处理完成"
        );
        metrics::set_queue_last_run(now.timestamp() as f64);
        Ok(claimed)
    }

    async fn process_item(&self, item: QueueItem, now: DateTime<Utc>) -> QueueItemResult {
        let attempt = match self.attempt(&item, now).await {
            Ok(attempt) => attempt,
            Err(e) => {
                error!(queue_item_id = %item.id, error = %e, "队列条目处理异常");
                Attempt::Failed {
                    error: e.to_string(),
                    notification_id: None,
                }
            }
        };

        let (update, result) = self.plan_update(&item, attempt, now);
        if let Err(e) = self.queue.finish(item.id, &update).await {
            warn!(queue_item_id = %item.id, error = %e, "队列条目结果写回失败");
        }

        debug!(
            queue_item_id = %item.id,
            channel = %item.channel,
            status = %update.status,
            attempts = update.attempts,
            "队列条目处理完成"
        );
        metrics::record_queue_item(result.as_str());
        result
    }

    async fn attempt(&self, item: &QueueItem, now: DateTime<Utc>) -> Result<Attempt> {
        let Some(user) = self.users.get_user(&item.user_id).await? else {
            return Ok(Attempt::Rejected {
                reason: format!("user not found: {}", item.user_id),
            });
        };

        let prefs = self.resolver.get_or_create(&user.id, now).await?;
        if !self
            .selector
            .eligible(item.notification_type, item.channel, &prefs)
        {
            info!(
                queue_item_id = %item.id,
                channel = %item.channel,
                "用户已关闭该渠道，条目不再重试"
            );
            return Ok(Attempt::Rejected {
                reason: format!("channel {} no longer permitted", item.channel),
            });
        }

        if item.channel.is_intrusive() && !item.priority.is_critical() {
            if let Some(until) = PreferenceResolver::quiet_hours_end_after(&prefs, now) {
                return Ok(Attempt::Deferred { until });
            }
        }

        let notification = self.creator.for_queue_item(item, now).await?;
        let ctx = DispatchContext {
            notification: &notification,
            user: &user,
            prefs: &prefs,
            now,
        };
        let result = self.dispatcher.dispatch_channel(&ctx, item.channel).await;

        Ok(match result.status {
            DeliveryStatus::Sent => Attempt::Sent {
                notification_id: notification.id,
            },
            DeliveryStatus::Cancelled => Attempt::Rejected {
                reason: result.error.unwrap_or_else(|| "cancelled".to_string()),
            },
            _ => Attempt::Failed {
                error: result
                    .error
                    .unwrap_or_else(|| format!("{} send failed", item.channel)),
                notification_id: Some(notification.id),
            },
        })
    }

    /// 把处理结论换算成写回字段
    fn plan_update(
        &self,
        item: &QueueItem,
        attempt: Attempt,
        now: DateTime<Utc>,
    ) -> (QueueItemUpdate, QueueItemResult) {
        let base = QueueItemUpdate {
            status: QueueStatus::Failed,
            attempts: item.attempts,
            next_attempt_at: None,
            last_error: None,
            notification_id: None,
            at: now,
        };

        match attempt {
            Attempt::Sent { notification_id } => (
                QueueItemUpdate {
                    status: QueueStatus::Sent,
                    attempts: item.attempts + 1,
                    notification_id: Some(notification_id),
                    ..base
                },
                QueueItemResult::Sent,
            ),
            Attempt::Deferred { until } => (
                QueueItemUpdate {
                    status: QueueStatus::Pending,
                    next_attempt_at: Some(until),
                    ..base
                },
                QueueItemResult::Deferred,
            ),
            Attempt::Rejected { reason } => (
                QueueItemUpdate {
                    last_error: Some(reason),
                    ..base
                },
                QueueItemResult::Failed,
            ),
            Attempt::Failed {
                error,
                notification_id,
            } => {
                let attempts = item.attempts + 1;
                if attempts < item.max_attempts {
                    let delay = self.backoff.delay_for_attempt(attempts as u32);
                    let next = chrono::Duration::from_std(delay)
                        .ok()
                        .and_then(|d| now.checked_add_signed(d))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    (
                        QueueItemUpdate {
                            status: QueueStatus::Pending,
                            attempts,
                            next_attempt_at: Some(next),
                            last_error: Some(error),
                            notification_id,
                            ..base
                        },
                        QueueItemResult::Retry,
                    )
                } else {
                    warn!(
                        queue_item_id = %item.id,
                        attempts,
                        max_attempts = item.max_attempts,
                        "已达最大尝试次数，条目进入终态"
                    );
                    (
                        QueueItemUpdate {
                            status: QueueStatus::Failed,
                            attempts,
                            last_error: Some(error),
                            notification_id,
                            ..base
                        },
                        QueueItemResult::Failed,
                    )
                }
            }
        }
    }
}
