//! 投递日志仓储（PostgreSQL）

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::DeliveryLogRepository;
use crate::error::{NotificationError, Result};
use crate::models::{DeliveryLogEntry, DeliveryStatus, DeliveryTransition};

/// 投递日志仓储
pub struct PgDeliveryLogRepository {
    pool: PgPool,
}

impl PgDeliveryLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, entry: &DeliveryLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_logs (id, notification_id, channel, recipient, status,
                                           error_message, provider_message_id, attempts,
                                           created_at, sent_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(entry.notification_id)
        .bind(entry.channel)
        .bind(&entry.recipient)
        .bind(entry.status)
        .bind(&entry.error_message)
        .bind(&entry.provider_message_id)
        .bind(entry.attempts)
        .bind(entry.created_at)
        .bind(entry.sent_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 带前置状态校验的流转
    ///
    /// `WHERE status = $from` 保证并发回执或重复处理不会把状态拉回
    pub async fn transition(
        &self,
        id: Uuid,
        from: DeliveryStatus,
        transition: &DeliveryTransition,
    ) -> Result<DeliveryLogEntry> {
        let updated = sqlx::query_as::<_, DeliveryLogEntry>(
            r#"
            UPDATE notification_logs
            SET status = $3,
                recipient = COALESCE($4, recipient),
                error_message = COALESCE($5, error_message),
                provider_message_id = COALESCE($6, provider_message_id),
                attempts = CASE WHEN $3 = 'processing' THEN attempts + 1 ELSE attempts END,
                sent_at = CASE WHEN $3 = 'sent' THEN $7 ELSE sent_at END,
                updated_at = $7
            WHERE id = $1 AND status = $2
            RETURNING id, notification_id, channel, recipient, status, error_message,
                      provider_message_id, attempts, created_at, sent_at, updated_at
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(transition.status)
        .bind(&transition.recipient)
        .bind(&transition.error_message)
        .bind(&transition.provider_message_id)
        .bind(transition.at)
        .fetch_optional(&self.pool)
        .await?;

        updated.ok_or(NotificationError::ConcurrencyConflict)
    }

    pub async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<DeliveryLogEntry>> {
        let entry = sqlx::query_as::<_, DeliveryLogEntry>(
            r#"
            SELECT id, notification_id, channel, recipient, status, error_message,
                   provider_message_id, attempts, created_at, sent_at, updated_at
            FROM notification_logs
            WHERE provider_message_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(provider_message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    pub async fn list_by_notification(&self, notification_id: Uuid) -> Result<Vec<DeliveryLogEntry>> {
        let entries = sqlx::query_as::<_, DeliveryLogEntry>(
            r#"
            SELECT id, notification_id, channel, recipient, status, error_message,
                   provider_message_id, attempts, created_at, sent_at, updated_at
            FROM notification_logs
            WHERE notification_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(notification_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[async_trait]
impl DeliveryLogRepository for PgDeliveryLogRepository {
    async fn create(&self, entry: &DeliveryLogEntry) -> Result<()> {
        self.create(entry).await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: DeliveryStatus,
        transition: &DeliveryTransition,
    ) -> Result<DeliveryLogEntry> {
        self.transition(id, from, transition).await
    }

    async fn find_by_provider_message_id(
        &self,
        provider_message_id: &str,
    ) -> Result<Option<DeliveryLogEntry>> {
        self.find_by_provider_message_id(provider_message_id).await
    }

    async fn list_by_notification(&self, notification_id: Uuid) -> Result<Vec<DeliveryLogEntry>> {
        self.list_by_notification(notification_id).await
    }
}
