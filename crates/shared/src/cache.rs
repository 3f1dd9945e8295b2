//! Redis 连接管理模块
//!
//! 提供 Redis 连接管理和 key 命名约定。频控等需要原子操作的场景
//! 直接拿多路复用连接执行脚本。

use crate::config::RedisConfig;
use crate::error::{NotifyError, Result};
use redis::Client;
use redis::aio::MultiplexedConnection;
use tracing::info;

/// Redis 缓存客户端
#[derive(Clone)]
pub struct Cache {
    client: Client,
    key_prefix: String,
}

impl Cache {
    /// 创建 Redis 客户端
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// 获取多路复用连接
    pub async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(NotifyError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(NotifyError::from)
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }
}

/// 缓存键生成器
pub struct CacheKey;

impl CacheKey {
    /// 用户发送频控窗口（有序集合，score 为发送时间毫秒）
    pub fn rate_limit(prefix: &str, user_id: &str) -> String {
        format!("{}:rate:{}", prefix, user_id)
    }
}
