//! 站内通知记录
//!
//! 每次 dispatch 恰好创建一条，独立于外部渠道的发送结果

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::enums::{Channel, NotificationType, Priority};

/// 通知记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    /// 业务数据，同时作为模板变量来源
    #[sqlx(json)]
    pub data: Map<String, Value>,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[sqlx(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[sqlx(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 通知发送请求
///
/// 由触发方（预订、支付等业务）构造，交给 `NotificationService::dispatch`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub user_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub priority: Priority,
    /// 调用方限定的渠道，None 表示不限定
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl DispatchRequest {
    pub fn new(
        user_id: impl Into<String>,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            notification_type,
            title: title.into(),
            message: message.into(),
            data: Map::new(),
            priority: Priority::Normal,
            channels: None,
            expires_at: None,
        }
    }

    /// 添加业务数据
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// 批量添加业务数据
    pub fn with_data_map(mut self, data: Map<String, Value>) -> Self {
        self.data.extend(data);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// 限定渠道
    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_request_builder() {
        let request = DispatchRequest::new(
            "u1",
            NotificationType::BookingAccepted,
            "Booking accepted",
            "Your booking was accepted",
        )
        .with_data("booking_id", json!("b-1"))
        .with_priority(Priority::Critical)
        .with_channels(vec![Channel::Email]);

        assert_eq!(request.data.get("booking_id"), Some(&json!("b-1")));
        assert!(request.priority.is_critical());
        assert_eq!(request.channels, Some(vec![Channel::Email]));
    }

    #[test]
    fn test_dispatch_request_deserialize_defaults() {
        let request: DispatchRequest = serde_json::from_value(json!({
            "user_id": "u1",
            "notification_type": "new_message",
            "title": "t",
            "message": "m"
        }))
        .unwrap();

        assert_eq!(request.priority, Priority::Normal);
        assert!(request.channels.is_none());
        assert!(request.data.is_empty());
    }
}
