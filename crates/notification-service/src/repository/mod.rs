//! 数据访问层
//!
//! 提供所有实体的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 仓储只负责数据持久化，不包含业务逻辑
//! - 状态流转在 SQL 层带前置状态条件，丢失竞争时返回 ConcurrencyConflict
//! - 定义 trait 接口以支持 mock 测试，并提供内存实现

mod delivery_log_repo;
mod memory;
mod notification_repo;
mod preference_repo;
mod queue_repo;
mod template_repo;
mod traits;
mod user_repo;

use std::sync::Arc;

use sqlx::PgPool;

pub use delivery_log_repo::PgDeliveryLogRepository;
pub use memory::InMemoryStore;
pub use notification_repo::PgNotificationRepository;
pub use preference_repo::PgPreferenceRepository;
pub use queue_repo::PgQueueRepository;
pub use template_repo::PgTemplateRepository;
pub use traits::*;
pub use user_repo::PgUserDirectory;

use crate::models::QueueItem;

/// 服务层依赖的全部仓储
#[derive(Clone)]
pub struct Repositories {
    pub preferences: Arc<dyn PreferenceRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub delivery_logs: Arc<dyn DeliveryLogRepository>,
    pub queue: Arc<dyn QueueRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub users: Arc<dyn UserDirectory>,
}

impl Repositories {
    /// PostgreSQL 实现
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            preferences: Arc::new(PgPreferenceRepository::new(pool.clone())),
            notifications: Arc::new(PgNotificationRepository::new(pool.clone())),
            delivery_logs: Arc::new(PgDeliveryLogRepository::new(pool.clone())),
            queue: Arc::new(PgQueueRepository::new(pool.clone())),
            templates: Arc::new(PgTemplateRepository::new(pool.clone())),
            users: Arc::new(PgUserDirectory::new(pool)),
        }
    }

    /// 共享同一个内存存储
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            preferences: store.clone(),
            notifications: store.clone(),
            delivery_logs: store.clone(),
            queue: store.clone(),
            templates: store.clone(),
            users: store,
        }
    }
}

/// 队列处理顺序：紧急优先，其次按计划时间先后
pub(crate) fn sort_for_processing(items: &mut [QueueItem]) {
    items.sort_by(|a, b| {
        b.priority
            .is_critical()
            .cmp(&a.priority.is_critical())
            .then(a.scheduled_at.cmp(&b.scheduled_at))
    });
}
