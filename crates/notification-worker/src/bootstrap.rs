//! 服务装配：数据库、Redis、仓储、渠道与频控

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use notification_service::{ChannelRegistry, NotificationService, RedisRateLimiter, Repositories};
use notify_shared::{cache::Cache, config::AppConfig, database::Database};
use tracing::info;

/// 装配生产用的 NotificationService
///
/// 返回的 Database 由调用方持有，退出时负责关闭连接池
pub async fn build_service(config: &AppConfig) -> Result<(NotificationService, Database)> {
    // 1. 数据库与迁移
    let db = Database::connect(&config.database).await?;
    let migrations_dir =
        std::env::var("MIGRATIONS_DIR").unwrap_or_else(|_| "migrations".to_string());
    db.run_migrations(Path::new(&migrations_dir)).await?;
    info!("Database connection established");

    // 2. Redis，频控计数放在这里以便多实例共享
    let cache = Cache::new(&config.redis)?;
    cache.health_check().await?;
    info!("Redis connection established");

    // 3. 仓储与渠道
    let repos = Repositories::postgres(db.pool().clone());
    let registry = ChannelRegistry::with_simulated_providers();

    let notification = &config.notification;
    let rate_limiter = Arc::new(RedisRateLimiter::new(
        cache,
        notification.rate_limit_max_sends,
        notification.rate_limit_window(),
    ));

    let service = NotificationService::new(repos, registry, rate_limiter, notification)?;
    Ok((service, db))
}
