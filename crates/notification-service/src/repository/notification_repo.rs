//! 站内通知仓储（PostgreSQL）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::traits::NotificationRepository;
use crate::error::Result;
use crate::models::Notification;

/// 站内通知仓储
pub struct PgNotificationRepository {
    pool: PgPool,
}

impl PgNotificationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, notification_type, title, message, data,
                                       priority, created_at, read_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(notification.id)
        .bind(&notification.user_id)
        .bind(notification.notification_type)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(Json(&notification.data))
        .bind(notification.priority)
        .bind(notification.created_at)
        .bind(notification.read_at)
        .bind(notification.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, user_id, notification_type, title, message, data,
                   priority, created_at, read_at, expires_at
            FROM notifications
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(notification)
    }

    /// 标记已读，保留首次已读时间
    pub async fn mark_read(&self, id: Uuid, user_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET read_at = COALESCE(read_at, $3)
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_by_user(
        &self,
        user_id: &str,
        unread_only: bool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, user_id, notification_type, title, message, data,
                   priority, created_at, read_at, expires_at
            FROM notifications
            WHERE user_id = $1
              AND ($2 = false OR read_at IS NULL)
              AND (expires_at IS NULL OR expires_at > $3)
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(unread_only)
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(notifications)
    }

    pub async fn count_unread(&self, user_id: &str, now: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM notifications
            WHERE user_id = $1
              AND read_at IS NULL
              AND (expires_at IS NULL OR expires_at > $2)
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn create(&self, notification: &Notification) -> Result<()> {
        self.create(notification).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notification>> {
        self.get(id).await
    }

    async fn mark_read(&self, id: Uuid, user_id: &str, at: DateTime<Utc>) -> Result<bool> {
        self.mark_read(id, user_id, at).await
    }

    async fn list_by_user(
        &self,
        user_id: &str,
        unread_only: bool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        self.list_by_user(user_id, unread_only, now, limit).await
    }

    async fn count_unread(&self, user_id: &str, now: DateTime<Utc>) -> Result<i64> {
        self.count_unread(user_id, now).await
    }
}
