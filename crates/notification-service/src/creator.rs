//! 站内通知记录创建
//!
//! 每次 dispatch 恰好写一条 Notification，与外部渠道成败无关。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::{NotificationError, Result};
use crate::models::{DispatchRequest, FALLBACK_BODY, FALLBACK_TITLE, Notification, QueueItem};
use crate::repository::NotificationRepository;

pub struct NotificationCreator {
    repo: Arc<dyn NotificationRepository>,
}

impl NotificationCreator {
    pub fn new(repo: Arc<dyn NotificationRepository>) -> Self {
        Self { repo }
    }

    /// 请求校验，dispatch 在频控之前调用，避免无效请求占用额度
    pub fn validate(request: &DispatchRequest) -> Result<()> {
        if request.user_id.trim().is_empty() {
            return Err(NotificationError::Validation("user_id 不能为空".into()));
        }
        if request.title.trim().is_empty() && request.message.trim().is_empty() {
            return Err(NotificationError::Validation(
                "title 与 message 不能同时为空".into(),
            ));
        }
        if request.channels.as_ref().is_some_and(|c| c.is_empty()) {
            return Err(NotificationError::Validation("指定的渠道列表为空".into()));
        }
        Ok(())
    }

    pub async fn create(&self, request: &DispatchRequest, now: DateTime<Utc>) -> Result<Notification> {
        Self::validate(request)?;

        let notification = Notification {
            id: Uuid::now_v7(),
            user_id: request.user_id.clone(),
            notification_type: request.notification_type,
            title: request.title.clone(),
            message: request.message.clone(),
            data: request.data.clone(),
            priority: request.priority,
            created_at: now,
            read_at: None,
            expires_at: request.expires_at,
        };
        self.insert(notification).await
    }

    /// 队列条目对应的通知：已关联则复用，否则按载荷新建
    ///
    /// 载荷缺标题或正文时用通用文案补齐，不因此让条目失败
    pub async fn for_queue_item(&self, item: &QueueItem, now: DateTime<Utc>) -> Result<Notification> {
        if let Some(id) = item.notification_id {
            if let Some(existing) = self.repo.get(id).await? {
                return Ok(existing);
            }
            debug!(queue_item_id = %item.id, notification_id = %id, "关联的通知已不存在，重新创建");
        }

        let or_default = |text: &str, fallback: &str| {
            if text.trim().is_empty() {
                fallback.to_string()
            } else {
                text.to_string()
            }
        };
        let notification = Notification {
            id: Uuid::now_v7(),
            user_id: item.user_id.clone(),
            notification_type: item.notification_type,
            title: or_default(&item.payload.title, FALLBACK_TITLE),
            message: or_default(&item.payload.message, FALLBACK_BODY),
            data: item.payload.data.clone(),
            priority: item.priority,
            created_at: now,
            read_at: None,
            expires_at: item.expires_at,
        };
        self.insert(notification).await
    }

    async fn insert(&self, notification: Notification) -> Result<Notification> {
        self.repo.create(&notification).await?;
        debug!(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            notification_type = %notification.notification_type,
            "站内通知已创建"
        );
        Ok(notification)
    }
}
