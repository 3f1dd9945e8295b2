//! 投递日志状态机
//!
//! 所有状态变更都先按 `DeliveryStatus::can_transition_to` 校验，再由仓储做
//! 带期望状态的条件更新，保证状态只前进不后退。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::models::{Channel, DeliveryLogEntry, DeliveryStatus, DeliveryTransition};
use crate::repository::DeliveryLogRepository;

pub struct DeliveryLogger {
    repo: Arc<dyn DeliveryLogRepository>,
}

impl DeliveryLogger {
    pub fn new(repo: Arc<dyn DeliveryLogRepository>) -> Self {
        Self { repo }
    }

    /// 写入 pending 日志
    pub async fn start(
        &self,
        notification_id: Uuid,
        channel: Channel,
        now: DateTime<Utc>,
    ) -> Result<DeliveryLogEntry> {
        let entry = DeliveryLogEntry::pending(notification_id, channel, now);
        self.repo.create(&entry).await?;
        debug!(
            log_id = %entry.id,
            notification_id = %notification_id,
            channel = %channel,
            "投递日志已创建"
        );
        Ok(entry)
    }

    pub async fn mark_processing(
        &self,
        entry: &DeliveryLogEntry,
        recipient: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DeliveryLogEntry> {
        let transition =
            DeliveryTransition::to(DeliveryStatus::Processing, now).with_recipient(recipient);
        self.advance(entry, transition).await
    }

    pub async fn mark_sent(
        &self,
        entry: &DeliveryLogEntry,
        provider_message_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<DeliveryLogEntry> {
        let transition = DeliveryTransition::to(DeliveryStatus::Sent, now)
            .with_provider_message_id(provider_message_id);
        self.advance(entry, transition).await
    }

    pub async fn mark_failed(
        &self,
        entry: &DeliveryLogEntry,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<DeliveryLogEntry> {
        let transition = DeliveryTransition::to(DeliveryStatus::Failed, now).with_error(error);
        self.advance(entry, transition).await
    }

    pub async fn mark_cancelled(
        &self,
        entry: &DeliveryLogEntry,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<DeliveryLogEntry> {
        let transition = DeliveryTransition::to(DeliveryStatus::Cancelled, now).with_error(reason);
        self.advance(entry, transition).await
    }

    /// 写一条直接取消的日志（pending → cancelled），用于免打扰剔除渠道的审计
    pub async fn record_cancelled(
        &self,
        notification_id: Uuid,
        channel: Channel,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<DeliveryLogEntry> {
        let entry = self.start(notification_id, channel, now).await?;
        self.mark_cancelled(&entry, reason, now).await
    }

    /// 服务商回执：sent → delivered / opened，delivered → opened
    ///
    /// 回执只能推进状态，重复或过期的回执返回 InvalidTransition
    pub async fn record_provider_callback(
        &self,
        provider_message_id: &str,
        status: DeliveryStatus,
        now: DateTime<Utc>,
    ) -> Result<DeliveryLogEntry> {
        if !matches!(status, DeliveryStatus::Delivered | DeliveryStatus::Opened) {
            return Err(NotificationError::Validation(format!(
                "回执状态只能是 delivered 或 opened，收到 {status}"
            )));
        }

        let entry = self
            .repo
            .find_by_provider_message_id(provider_message_id)
            .await?
            .ok_or_else(|| {
                NotificationError::Validation(format!(
                    "未找到服务商消息: {provider_message_id}"
                ))
            })?;

        let updated = self
            .advance(&entry, DeliveryTransition::to(status, now))
            .await?;
        info!(
            log_id = %updated.id,
            provider_message_id,
            status = %status,
            "服务商回执已记录"
        );
        Ok(updated)
    }

    pub async fn list_for_notification(&self, notification_id: Uuid) -> Result<Vec<DeliveryLogEntry>> {
        self.repo.list_by_notification(notification_id).await
    }

    async fn advance(
        &self,
        entry: &DeliveryLogEntry,
        transition: DeliveryTransition,
    ) -> Result<DeliveryLogEntry> {
        if !entry.status.can_transition_to(transition.status) {
            warn!(
                log_id = %entry.id,
                from = %entry.status,
                to = %transition.status,
                "拒绝非法的投递状态流转"
            );
            return Err(NotificationError::InvalidTransition {
                entity: "delivery_log",
                from: entry.status.to_string(),
                to: transition.status.to_string(),
            });
        }
        self.repo.transition(entry.id, entry.status, &transition).await
    }
}
