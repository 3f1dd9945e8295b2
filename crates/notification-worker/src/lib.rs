//! 通知后台 Worker
//!
//! 定时驱动重试队列：领取到期条目，按单渠道重新投递，
//! 失败时按退避策略重新排期。

pub mod bootstrap;
pub mod scheduler;

pub use bootstrap::build_service;
pub use scheduler::QueueScheduler;
