//! 通知服务错误类型
//!
//! 定义服务层的业务错误和系统错误。
//! 频控拒绝与无可用渠道属于 dispatch 的结果而非错误，见 `service::DispatchOutcome`。

use notify_shared::error::NotifyError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::Channel;

/// 通知服务错误类型
#[derive(Debug, Error)]
pub enum NotificationError {
    // === 用户与偏好 ===
    #[error("用户不存在: {0}")]
    UserNotFound(String),

    // === 模板与渠道 ===
    #[error("模板不存在: type={notification_type}, channel={channel}, language={language}")]
    TemplateMissing {
        notification_type: String,
        channel: Channel,
        language: String,
    },

    #[error("渠道适配器未注册: {0}")]
    AdapterNotRegistered(Channel),

    #[error("send timed out after {timeout_ms} ms")]
    SendTimeout { channel: Channel, timeout_ms: u64 },

    // === 状态流转 ===
    #[error("非法状态流转: {entity} {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("通知不存在: {0}")]
    NotificationNotFound(Uuid),

    #[error("队列条目不存在: {0}")]
    QueueItemNotFound(Uuid),

    #[error("并发冲突，请重试")]
    ConcurrencyConflict,

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Shared(#[from] NotifyError),

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 通知服务 Result 类型别名
pub type Result<T> = std::result::Result<T, NotificationError>;

impl NotificationError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_)
            | Self::Redis(_)
            | Self::ConcurrencyConflict
            | Self::SendTimeout { .. } => true,
            Self::Shared(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UserNotFound(_) => "USER_NOT_FOUND",
            Self::TemplateMissing { .. } => "TEMPLATE_MISSING",
            Self::AdapterNotRegistered(_) => "ADAPTER_NOT_REGISTERED",
            Self::SendTimeout { .. } => "SEND_TIMEOUT",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::NotificationNotFound(_) => "NOTIFICATION_NOT_FOUND",
            Self::QueueItemNotFound(_) => "QUEUE_ITEM_NOT_FOUND",
            Self::ConcurrencyConflict => "CONCURRENCY_CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Shared(e) => e.code(),
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            NotificationError::UserNotFound("u1".into()).error_code(),
            "USER_NOT_FOUND"
        );
        assert_eq!(
            NotificationError::AdapterNotRegistered(Channel::Sms).error_code(),
            "ADAPTER_NOT_REGISTERED"
        );
        assert_eq!(
            NotificationError::Shared(NotifyError::Validation("x".into())).error_code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(NotificationError::ConcurrencyConflict.is_retryable());
        assert!(
            NotificationError::SendTimeout {
                channel: Channel::Push,
                timeout_ms: 100
            }
            .is_retryable()
        );
        assert!(!NotificationError::Validation("bad".into()).is_retryable());
        assert!(!NotificationError::AdapterNotRegistered(Channel::Email).is_retryable());
    }

    #[test]
    fn test_display_contains_context() {
        let err = NotificationError::TemplateMissing {
            notification_type: "booking_accepted".into(),
            channel: Channel::Email,
            language: "fr".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("booking_accepted"));
        assert!(msg.contains("email"));
        assert!(msg.contains("fr"));
    }
}
