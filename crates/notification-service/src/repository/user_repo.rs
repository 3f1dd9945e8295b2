//! 用户资料查询（PostgreSQL）
//!
//! 读取宿主系统同步过来的 notification_recipients 投影表

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::UserDirectory;
use crate::error::Result;
use crate::models::User;

/// 用户资料查询
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, timezone, language, email, phone, push_token
            FROM notification_recipients
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        self.get_user(user_id).await
    }
}
