//! 通知投递编排服务
//!
//! 负责把平台事件（预订、支付、行程、安全）投递到用户的各个触达渠道
//! （推送、邮件、短信、站内信）。
//!
//! ## 核心功能
//!
//! - **渠道选择**：按用户偏好、分类开关与免打扰时段计算本次使用的渠道
//! - **频控**：每个用户滚动一小时内最多发送 3 次
//! - **模板渲染**：按 类型 + 渠道 + 语言 解析模板，缺失时回退
//! - **投递审计**：每个渠道一次尝试一条日志，状态只前进不后退
//! - **重试队列**：失败条目按 5^attempts 分钟退避重试
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `repository`: 数据访问层（PostgreSQL 与内存实现）
//! - `preference`: 偏好解析与免打扰判断
//! - `selector`: 渠道选择
//! - `rate_limit`: 频控
//! - `template`: 模板解析与渲染
//! - `channels`: 渠道适配器与注册表
//! - `delivery`: 投递日志状态机
//! - `dispatcher`: 单渠道发送
//! - `creator`: 站内通知记录创建
//! - `service`: 对外的 dispatch 入口
//! - `queue`: 重试队列处理

pub mod channels;
pub mod creator;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod preference;
pub mod queue;
pub mod rate_limit;
pub mod repository;
pub mod selector;
pub mod service;
pub mod template;

pub use channels::{
    ChannelAdapter, ChannelRegistry, InAppAdapter, SendOutcome, SendRequest, SimulatedAdapter,
};
pub use creator::NotificationCreator;
pub use delivery::DeliveryLogger;
pub use dispatcher::{ChannelResult, DispatchContext, Dispatcher};
pub use error::{NotificationError, Result};
pub use models::*;
pub use preference::PreferenceResolver;
pub use queue::{QueueItemResult, QueueProcessor};
pub use rate_limit::{InMemoryRateLimiter, RateLimiter, RedisRateLimiter};
pub use repository::{
    DeliveryLogRepository, InMemoryStore, NotificationRepository, PreferenceRepository,
    QueueRepository, Repositories, TemplateRepository, UserDirectory,
};
pub use selector::{ChannelSelection, ChannelSelector};
pub use service::{DispatchOutcome, NotificationService};
pub use template::TemplateCatalog;
