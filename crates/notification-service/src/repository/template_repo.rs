//! 模板仓储（PostgreSQL）

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;

use super::traits::TemplateRepository;
use crate::error::Result;
use crate::models::{Channel, NotificationType, Template};

/// 模板仓储
pub struct PgTemplateRepository {
    pool: PgPool,
}

impl PgTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find(
        &self,
        notification_type: NotificationType,
        channel: Channel,
        language: &str,
    ) -> Result<Option<Template>> {
        let template = sqlx::query_as::<_, Template>(
            r#"
            SELECT notification_type, channel, language, fields, updated_at
            FROM notification_templates
            WHERE notification_type = $1 AND channel = $2 AND language = $3
            "#,
        )
        .bind(notification_type)
        .bind(channel)
        .bind(language)
        .fetch_optional(&self.pool)
        .await?;

        Ok(template)
    }

    pub async fn upsert(&self, template: &Template) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_templates (notification_type, channel, language, fields, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (notification_type, channel, language)
            DO UPDATE SET fields = EXCLUDED.fields, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(template.notification_type)
        .bind(template.channel)
        .bind(&template.language)
        .bind(Json(&template.fields))
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TemplateRepository for PgTemplateRepository {
    async fn find(
        &self,
        notification_type: NotificationType,
        channel: Channel,
        language: &str,
    ) -> Result<Option<Template>> {
        self.find(notification_type, channel, language).await
    }

    async fn upsert(&self, template: &Template) -> Result<()> {
        self.upsert(template).await
    }
}
