//! 重试队列仓储（PostgreSQL）
//!
//! 领取使用 `FOR UPDATE SKIP LOCKED`：已被其他实例锁定的行直接跳过，
//! 多个处理器并发运行时同一条目不会被领取两次。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::traits::QueueRepository;
use crate::error::{NotificationError, Result};
use crate::models::{QueueItem, QueueItemUpdate};

const QUEUE_COLUMNS: &str = r#"
    id, user_id, notification_id, notification_type, channel, priority, scheduled_at,
    expires_at, status, attempts, max_attempts, next_attempt_at, last_error, payload,
    created_at, updated_at
"#;

/// 重试队列仓储
pub struct PgQueueRepository {
    pool: PgPool,
}

impl PgQueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(&self, item: &QueueItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_queue (id, user_id, notification_id, notification_type,
                                            channel, priority, scheduled_at, expires_at, status,
                                            attempts, max_attempts, next_attempt_at, last_error,
                                            payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(item.id)
        .bind(&item.user_id)
        .bind(item.notification_id)
        .bind(item.notification_type)
        .bind(item.channel)
        .bind(item.priority)
        .bind(item.scheduled_at)
        .bind(item.expires_at)
        .bind(item.status)
        .bind(item.attempts)
        .bind(item.max_attempts)
        .bind(item.next_attempt_at)
        .bind(&item.last_error)
        .bind(Json(&item.payload))
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        let sql = format!("SELECT {} FROM notification_queue WHERE id = $1", QUEUE_COLUMNS);
        let item = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    /// 领取到期条目
    ///
    /// 子查询锁定候选行，外层 UPDATE 在同一语句内完成 pending -> processing
    pub async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>> {
        let sql = format!(
            r#"
            UPDATE notification_queue
            SET status = 'processing', updated_at = $1
            WHERE id IN (
                SELECT id
                FROM notification_queue
                WHERE status = 'pending'
                  AND scheduled_at <= $1
                  AND COALESCE(next_attempt_at, scheduled_at) <= $1
                  AND (expires_at IS NULL OR expires_at > $1)
                ORDER BY CASE priority WHEN 'critical' THEN 1 ELSE 0 END DESC,
                         scheduled_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            QUEUE_COLUMNS
        );
        let mut items = sqlx::query_as::<_, QueueItem>(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        // RETURNING 不保证顺序
        super::sort_for_processing(&mut items);
        Ok(items)
    }

    pub async fn finish(&self, id: Uuid, update: &QueueItemUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = $2,
                attempts = $3,
                next_attempt_at = $4,
                last_error = COALESCE($5, last_error),
                notification_id = COALESCE($6, notification_id),
                updated_at = $7
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(update.status)
        .bind(update.attempts)
        .bind(update.next_attempt_at)
        .bind(&update.last_error)
        .bind(update.notification_id)
        .bind(update.at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get(id).await? {
            Some(_) => Err(NotificationError::ConcurrencyConflict),
            None => Err(NotificationError::QueueItemNotFound(id)),
        }
    }

    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = 'failed',
                next_attempt_at = NULL,
                last_error = 'expired',
                updated_at = $1
            WHERE status = 'pending'
              AND expires_at IS NOT NULL
              AND expires_at <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// 领取租约超时的条目退回 pending
    ///
    /// 处理进程在写回前退出时条目会停在 processing，这里按 updated_at 判断租约
    pub async fn reclaim_stale(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = 'pending',
                next_attempt_at = COALESCE(next_attempt_at, $2),
                updated_at = $2
            WHERE status = 'processing'
              AND updated_at <= $1
            "#,
        )
        .bind(stale_before)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl QueueRepository for PgQueueRepository {
    async fn enqueue(&self, item: &QueueItem) -> Result<()> {
        self.enqueue(item).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        self.get(id).await
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<QueueItem>> {
        self.claim_due(now, limit).await
    }

    async fn finish(&self, id: Uuid, update: &QueueItemUpdate) -> Result<()> {
        self.finish(id, update).await
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<u64> {
        self.expire_due(now).await
    }

    async fn reclaim_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> Result<u64> {
        self.reclaim_stale(stale_before, now).await
    }
}
