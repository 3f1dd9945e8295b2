//! 内存仓储实现
//!
//! 单进程场景和测试使用。队列领取与状态流转在锁内完成比较并交换，
//! 语义与 PostgreSQL 版本一致。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::{
    DeliveryLogRepository, NotificationRepository, PreferenceRepository, QueueRepository,
    TemplateRepository, UserDirectory,
};
use crate::error::{NotificationError, Result};
use crate::models::{
    Channel, DeliveryLogEntry, DeliveryStatus, DeliveryTransition, Notification,
    NotificationPreference, NotificationType, QueueItem, QueueItemUpdate, QueueStatus, Template,
    User,
};

type TemplateKey = (NotificationType, Channel, String);

/// 内存存储，实现全部仓储接口
#[derive(Default)]
pub struct InMemoryStore {
    users: DashMap<String, User>,
    preferences: DashMap<String, NotificationPreference>,
    notifications: DashMap<Uuid, Notification>,
    logs: DashMap<Uuid, DeliveryLogEntry>,
    queue: Mutex<Vec<QueueItem>>,
    templates: DashMap<TemplateKey, Template>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入用户资料
    pub fn put_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    /// 所有站内通知（测试断言用）
    pub fn notifications_for(&self, user_id: &str) -> Vec<Notification> {
        let mut list: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .map(|n| n.value().clone())
            .collect();
        list.sort_by_key(|n| n.created_at);
        list
    }

    /// 队列快照（测试断言用）
    pub fn queue_snapshot(&self) -> Vec<QueueItem> {
        self.queue.lock().clone()
    }

    /// 全部投递日志数（测试断言用）
    pub fn log_count(&self) -> usize {
        self.logs.len()
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        Ok(self.users.get(user_id).map(|u| u.value().clone()))
    }
}

#[async_trait]
impl PreferenceRepository for InMemoryStore {
    async fn get(&self, user_id: &str) -> Result<Option<NotificationPreference>> {
        Ok(self.preferences.get(user_id).map(|p| p.value().clone()))
    }

    async fn insert_if_absent(
        &self,
        preference: &NotificationPreference,
    ) -> Result<NotificationPreference> {
        let entry = self
            .preferences
            .entry(preference.user_id.clone())
            .or_insert_with(|| preference.clone());
        Ok(entry.value().clone())
    }

    async fn update(&self, preference: &NotificationPreference) -> Result<NotificationPreference> {
        let mut stored = preference.clone();
        if let Some(existing) = self.preferences.get(&preference.user_id) {
            stored.created_at = existing.created_at;
        }
        self.preferences
            .insert(preference.user_id.clone(), stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl NotificationRepository for InMemoryStore {
    async fn create(&self, notification: &Notification) -> Result<()> {
        self.notifications
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        Ok(self.notifications.get(&id).map(|n| n.value().clone()))
    }

    async fn mark_read(&self, id: Uuid, user_id: &str, at: DateTime<Utc>) -> Result<bool> {
        match self.notifications.get_mut(&id) {
            Some(mut n) if n.user_id == user_id => {
                if n.read_at.is_none() {
                    n.read_at = Some(at);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        unread_only: bool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let mut list: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .filter(|n| !unread_only || !n.is_read())
            .filter(|n| !n.is_expired(now))
            .map(|n| n.value().clone())
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        list.truncate(limit.max(0) as usize);
        Ok(list)
    }

    async fn count_unread(&self, user_id: &str, now: DateTime<Utc>) -> Result<i64> {
        let count = self
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read() && !n.is_expired(now))
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl DeliveryLogRepository for InMemoryStore {
    async fn create(&self, entry: &DeliveryLogEntry) -> Result<()> {
        self.logs.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: DeliveryStatus,
        transition: &DeliveryTransition,
    ) -> Result<DeliveryLogEntry> {
        let mut entry = self
            .logs
            .get_mut(&id)
            .ok_or(NotificationError::ConcurrencyConflict)?;
        if entry.status != from {
            return Err(NotificationError::ConcurrencyConflict);
        }
        transition.apply(&mut entry);
        Ok(entry.clone())
    }

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<DeliveryLogEntry>> {
        Ok(self
            .logs
            .iter()
            .filter(|e| e.provider_message_id.as_deref() == Some(provider_message_id))
            .max_by_key(|e| e.created_at)
            .map(|e| e.value().clone()))
    }

    async fn list_by_notification(&self, notification_id: Uuid) -> Result<Vec<DeliveryLogEntry>> {
        let mut entries: Vec<DeliveryLogEntry> = self
            .logs
            .iter()
            .filter(|e| e.notification_id == notification_id)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }
}

#[async_trait]
impl QueueRepository for InMemoryStore {
    async fn enqueue(&self, item: &QueueItem) -> Result<()> {
        self.queue.lock().push(item.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        Ok(self.queue.lock().iter().find(|i| i.id == id).cloned())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>> {
        let mut queue = self.queue.lock();
        let mut due: Vec<QueueItem> = queue.iter().filter(|i| i.is_due(now)).cloned().collect();
        super::sort_for_processing(&mut due);
        due.truncate(limit.max(0) as usize);

        for claimed in due.iter_mut() {
            claimed.status = QueueStatus::Processing;
            claimed.updated_at = now;
            if let Some(stored) = queue.iter_mut().find(|i| i.id == claimed.id) {
                stored.status = QueueStatus::Processing;
                stored.updated_at = now;
            }
        }
        Ok(due)
    }

    async fn finish(&self, id: Uuid, update: &QueueItemUpdate) -> Result<()> {
        let mut queue = self.queue.lock();
        let item = queue
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(NotificationError::QueueItemNotFound(id))?;
        if item.status != QueueStatus::Processing {
            return Err(NotificationError::ConcurrencyConflict);
        }
        update.apply(item);
        Ok(())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut queue = self.queue.lock();
        let mut expired = 0;
        for item in queue
            .iter_mut()
            .filter(|i| i.status == QueueStatus::Pending && i.is_expired(now))
        {
            item.status = QueueStatus::Failed;
            item.next_attempt_at = None;
            item.last_error = Some("expired".to_string());
            item.updated_at = now;
            expired += 1;
        }
        Ok(expired)
    }

    async fn reclaim_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        let mut queue = self.queue.lock();
        let mut reclaimed = 0;
        for item in queue
            .iter_mut()
            .filter(|i| i.status == QueueStatus::Processing && i.updated_at <= stale_before)
        {
            item.status = QueueStatus::Pending;
            item.next_attempt_at = Some(item.next_attempt_at.unwrap_or(now));
            item.updated_at = now;
            reclaimed += 1;
        }
        Ok(reclaimed)
    }
}

#[async_trait]
impl TemplateRepository for InMemoryStore {
    async fn find(
        &self,
        notification_type: NotificationType,
        channel: Channel,
        language: &str,
    ) -> Result<Option<Template>> {
        let key = (notification_type, channel, language.to_string());
        Ok(self.templates.get(&key).map(|t| t.value().clone()))
    }

    async fn upsert(&self, template: &Template) -> Result<()> {
        let key = (
            template.notification_type,
            template.channel,
            template.language.clone(),
        );
        self.templates.insert(key, template.clone());
        Ok(())
    }
}
