//! 重试队列条目
//!
//! 独立于 Notification 的持久化任务，可以比发起它的那次 dispatch 活得更久

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::enums::{Channel, NotificationType, Priority, QueueStatus};
use super::notification::Notification;

/// 重新投递时需要的内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueuePayload {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// 队列条目
///
/// 不变量：`attempts <= max_attempts`；`next_attempt_at` 为空当且仅当条目已到终态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueItem {
    pub id: Uuid,
    pub user_id: String,
    /// 关联的站内通知，首次处理时惰性创建
    #[sqlx(default)]
    pub notification_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub priority: Priority,
    pub scheduled_at: DateTime<Utc>,
    #[sqlx(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub status: QueueStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    #[sqlx(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub last_error: Option<String>,
    #[sqlx(json)]
    pub payload: QueuePayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// 是否到期可领取
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending
            && self.scheduled_at <= now
            && self.next_attempt_at.unwrap_or(self.scheduled_at) <= now
            && !self.is_expired(now)
    }
}

/// 入队请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub user_id: String,
    #[serde(default)]
    pub notification_id: Option<Uuid>,
    pub notification_type: NotificationType,
    pub channel: Channel,
    #[serde(default)]
    pub priority: Priority,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// None 时使用配置的默认值
    #[serde(default)]
    pub max_attempts: Option<i32>,
    pub payload: QueuePayload,
}

impl NewQueueItem {
    pub fn new(
        user_id: impl Into<String>,
        notification_type: NotificationType,
        channel: Channel,
        payload: QueuePayload,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            notification_id: None,
            notification_type,
            channel,
            priority: Priority::Normal,
            scheduled_at,
            expires_at: None,
            max_attempts: None,
            payload,
        }
    }

    /// 为一次即时发送失败的渠道创建重试条目，复用原通知记录
    pub fn retry_of(notification: &Notification, channel: Channel, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            user_id: notification.user_id.clone(),
            notification_id: Some(notification.id),
            notification_type: notification.notification_type,
            channel,
            priority: notification.priority,
            scheduled_at,
            expires_at: notification.expires_at,
            max_attempts: None,
            payload: QueuePayload {
                title: notification.title.clone(),
                message: notification.message.clone(),
                data: notification.data.clone(),
            },
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// 物化为 pending 条目，next_attempt_at 初始等于 scheduled_at
    pub fn into_item(self, default_max_attempts: i32, now: DateTime<Utc>) -> QueueItem {
        QueueItem {
            id: Uuid::now_v7(),
            user_id: self.user_id,
            notification_id: self.notification_id,
            notification_type: self.notification_type,
            channel: self.channel,
            priority: self.priority,
            scheduled_at: self.scheduled_at,
            expires_at: self.expires_at,
            status: QueueStatus::Pending,
            attempts: 0,
            max_attempts: self.max_attempts.unwrap_or(default_max_attempts),
            next_attempt_at: Some(self.scheduled_at),
            last_error: None,
            payload: self.payload,
            created_at: now,
            updated_at: now,
        }
    }
}

/// 处理完成后写回的字段，只允许作用于 processing 状态的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItemUpdate {
    pub status: QueueStatus,
    pub attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub notification_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

impl QueueItemUpdate {
    pub fn apply(&self, item: &mut QueueItem) {
        item.status = self.status;
        item.attempts = self.attempts;
        item.next_attempt_at = self.next_attempt_at;
        if self.last_error.is_some() {
            item.last_error = self.last_error.clone();
        }
        if self.notification_id.is_some() {
            item.notification_id = self.notification_id;
        }
        item.updated_at = self.at;
    }
}
