//! 投递日志
//!
//! 每个渠道每次尝试一条，状态沿 `DeliveryStatus` 状态机单向推进

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Channel, DeliveryStatus};

/// 投递日志记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryLogEntry {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub channel: Channel,
    #[sqlx(default)]
    pub recipient: Option<String>,
    pub status: DeliveryStatus,
    #[sqlx(default)]
    pub error_message: Option<String>,
    #[sqlx(default)]
    pub provider_message_id: Option<String>,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    #[sqlx(default)]
    pub sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryLogEntry {
    /// 新建 pending 状态的日志
    pub fn pending(notification_id: Uuid, channel: Channel, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            notification_id,
            channel,
            recipient: None,
            status: DeliveryStatus::Pending,
            error_message: None,
            provider_message_id: None,
            attempts: 0,
            created_at: now,
            sent_at: None,
            updated_at: now,
        }
    }
}

/// 一次状态流转携带的字段
///
/// 为 None 的字段保持原值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTransition {
    pub status: DeliveryStatus,
    pub recipient: Option<String>,
    pub error_message: Option<String>,
    pub provider_message_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl DeliveryTransition {
    pub fn to(status: DeliveryStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            recipient: None,
            error_message: None,
            provider_message_id: None,
            at,
        }
    }

    pub fn with_recipient(mut self, recipient: Option<String>) -> Self {
        self.recipient = recipient;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_provider_message_id(mut self, id: Option<String>) -> Self {
        self.provider_message_id = id;
        self
    }

    /// 应用到日志记录上（内存仓储使用，SQL 版本按同样规则写 COALESCE）
    ///
    /// 进入 processing 计一次尝试，进入 sent 记录发送时间
    pub fn apply(&self, entry: &mut DeliveryLogEntry) {
        entry.status = self.status;
        if self.recipient.is_some() {
            entry.recipient = self.recipient.clone();
        }
        if self.error_message.is_some() {
            entry.error_message = self.error_message.clone();
        }
        if self.provider_message_id.is_some() {
            entry.provider_message_id = self.provider_message_id.clone();
        }
        if self.status == DeliveryStatus::Processing {
            entry.attempts += 1;
        }
        if self.status == DeliveryStatus::Sent {
            entry.sent_at = Some(self.at);
        }
        entry.updated_at = self.at;
    }
}
