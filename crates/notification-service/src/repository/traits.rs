//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Channel, DeliveryLogEntry, DeliveryStatus, DeliveryTransition, Notification,
    NotificationPreference, NotificationType, QueueItem, QueueItemUpdate, Template, User,
};

/// 用户偏好仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PreferenceRepository: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<NotificationPreference>>;

    /// 不存在时插入，存在时返回已有记录（并发创建只保留一条）
    async fn insert_if_absent(
        &self,
        preference: &NotificationPreference,
    ) -> Result<NotificationPreference>;

    async fn update(&self, preference: &NotificationPreference) -> Result<NotificationPreference>;
}

/// 站内通知仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Notification>>;

    /// 标记已读，重复调用保留首次已读时间；返回是否命中该用户的通知
    async fn mark_read(&self, id: Uuid, user_id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// 按创建时间倒序列出，过滤已过期通知
    async fn list_by_user(
        &self,
        user_id: &str,
        unread_only: bool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>>;

    async fn count_unread(&self, user_id: &str, now: DateTime<Utc>) -> Result<i64>;
}

/// 投递日志仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryLogRepository: Send + Sync {
    async fn create(&self, entry: &DeliveryLogEntry) -> Result<()>;

    /// 仅当当前状态等于 `from` 时流转，否则返回 ConcurrencyConflict
    async fn transition(
        &self,
        id: Uuid,
        from: DeliveryStatus,
        transition: &DeliveryTransition,
    ) -> Result<DeliveryLogEntry>;

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<DeliveryLogEntry>>;

    async fn list_by_notification(&self, notification_id: Uuid) -> Result<Vec<DeliveryLogEntry>>;
}

/// 重试队列仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn enqueue(&self, item: &QueueItem) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>>;

    /// 原子领取到期条目（pending -> processing），按优先级降序、计划时间升序
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>>;

    /// 写回处理结果，条目必须处于 processing，否则返回 ConcurrencyConflict
    async fn finish(&self, id: Uuid, update: &QueueItemUpdate) -> Result<()>;

    /// 把已过期的 pending 条目标记为 failed，返回条目数
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64>;

    /// 领取时间早于 `stale_before` 仍处于 processing 的条目退回 pending，返回条目数
    async fn reclaim_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64>;
}

/// 模板仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find(
        &self,
        notification_type: NotificationType,
        channel: Channel,
        language: &str,
    ) -> Result<Option<Template>>;

    async fn upsert(&self, template: &Template) -> Result<()>;
}

/// 用户资料查询接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>>;
}
