//! 用户偏好仓储（PostgreSQL）

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;

use super::traits::PreferenceRepository;
use crate::error::Result;
use crate::models::NotificationPreference;

const PREFERENCE_COLUMNS: &str = r#"
    user_id, push_enabled, email_enabled, sms_enabled, in_app_enabled, marketing_enabled,
    categories, quiet_hours_enabled, quiet_hours_start, quiet_hours_end,
    timezone, language, created_at, updated_at
"#;

/// 用户偏好仓储
pub struct PgPreferenceRepository {
    pool: PgPool,
}

impl PgPreferenceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按用户查询偏好
    pub async fn get(&self, user_id: &str) -> Result<Option<NotificationPreference>> {
        let sql = format!(
            "SELECT {} FROM user_notification_preferences WHERE user_id = $1",
            PREFERENCE_COLUMNS
        );
        let preference = sqlx::query_as::<_, NotificationPreference>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(preference)
    }

    /// 插入默认偏好
    ///
    /// 并发首次访问时以先写入者为准，后到者读回已有记录
    pub async fn insert_if_absent(
        &self,
        preference: &NotificationPreference,
    ) -> Result<NotificationPreference> {
        sqlx::query(
            r#"
            INSERT INTO user_notification_preferences (
                user_id, push_enabled, email_enabled, sms_enabled, in_app_enabled,
                marketing_enabled, categories, quiet_hours_enabled, quiet_hours_start,
                quiet_hours_end, timezone, language, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(&preference.user_id)
        .bind(preference.push_enabled)
        .bind(preference.email_enabled)
        .bind(preference.sms_enabled)
        .bind(preference.in_app_enabled)
        .bind(preference.marketing_enabled)
        .bind(Json(&preference.categories))
        .bind(preference.quiet_hours_enabled)
        .bind(preference.quiet_hours_start)
        .bind(preference.quiet_hours_end)
        .bind(&preference.timezone)
        .bind(&preference.language)
        .bind(preference.created_at)
        .bind(preference.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(self
            .get(&preference.user_id)
            .await?
            .unwrap_or_else(|| preference.clone()))
    }

    /// 更新偏好（整条覆盖）
    pub async fn update(&self, preference: &NotificationPreference) -> Result<NotificationPreference> {
        let sql = format!(
            r#"
            INSERT INTO user_notification_preferences (
                user_id, push_enabled, email_enabled, sms_enabled, in_app_enabled,
                marketing_enabled, categories, quiet_hours_enabled, quiet_hours_start,
                quiet_hours_end, timezone, language, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
            ON CONFLICT (user_id) DO UPDATE SET
                push_enabled = EXCLUDED.push_enabled,
                email_enabled = EXCLUDED.email_enabled,
                sms_enabled = EXCLUDED.sms_enabled,
                in_app_enabled = EXCLUDED.in_app_enabled,
                marketing_enabled = EXCLUDED.marketing_enabled,
                categories = EXCLUDED.categories,
                quiet_hours_enabled = EXCLUDED.quiet_hours_enabled,
                quiet_hours_start = EXCLUDED.quiet_hours_start,
                quiet_hours_end = EXCLUDED.quiet_hours_end,
                timezone = EXCLUDED.timezone,
                language = EXCLUDED.language,
                updated_at = EXCLUDED.updated_at
            RETURNING {}
            "#,
            PREFERENCE_COLUMNS
        );
        let updated = sqlx::query_as::<_, NotificationPreference>(&sql)
            .bind(&preference.user_id)
            .bind(preference.push_enabled)
            .bind(preference.email_enabled)
            .bind(preference.sms_enabled)
            .bind(preference.in_app_enabled)
            .bind(preference.marketing_enabled)
            .bind(Json(&preference.categories))
            .bind(preference.quiet_hours_enabled)
            .bind(preference.quiet_hours_start)
            .bind(preference.quiet_hours_end)
            .bind(&preference.timezone)
            .bind(&preference.language)
            .bind(preference.updated_at)
            .fetch_one(&self.pool)
            .await?;

        Ok(updated)
    }
}

#[async_trait]
impl PreferenceRepository for PgPreferenceRepository {
    async fn get(&self, user_id: &str) -> Result<Option<NotificationPreference>> {
        self.get(user_id).await
    }

    async fn insert_if_absent(
        &self,
        preference: &NotificationPreference,
    ) -> Result<NotificationPreference> {
        self.insert_if_absent(preference).await
    }

    async fn update(&self, preference: &NotificationPreference) -> Result<NotificationPreference> {
        self.update(preference).await
    }
}
