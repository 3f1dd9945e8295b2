//! 通知服务枚举类型定义
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化，统一使用 snake_case

use std::fmt;

use serde::{Deserialize, Serialize};

/// 触达渠道
///
/// 渠道集合是封闭的，新增渠道需要同时补充适配器和偏好开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Channel {
    /// 站内信
    InApp,
    /// App 推送
    Push,
    /// 邮件
    Email,
    /// 短信
    Sms,
}

impl Channel {
    /// 按选择顺序排列的全部渠道
    pub const ALL: [Channel; 4] = [Channel::InApp, Channel::Push, Channel::Email, Channel::Sms];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InApp => "in_app",
            Self::Push => "push",
            Self::Email => "email",
            Self::Sms => "sms",
        }
    }

    /// 免打扰期间对非紧急通知屏蔽的渠道
    pub fn is_intrusive(&self) -> bool {
        matches!(self, Self::Push | Self::Sms)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通知优先级
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    /// 紧急 - 不受免打扰限制
    Critical,
}

impl Priority {
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Critical => "critical",
        }
    }
}

/// 投递日志状态
///
/// ```text
/// pending -> processing -> sent -> delivered -> opened
///    |            |-> failed
///    |            `-> cancelled
///    `-> cancelled（免打扰屏蔽，不调用适配器）
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Processing,
    Sent,
    Delivered,
    Opened,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Opened => "opened",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// 状态只允许向前流转
    pub fn can_transition_to(&self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Sent)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Sent, Delivered)
                | (Sent, Opened)
                | (Delivered, Opened)
        )
    }

    /// 发送路径上的终态（回执推进不算）
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending | Self::Processing)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 重试队列条目状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum QueueStatus {
    #[default]
    Pending,
    Processing,
    Sent,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 通知分类
///
/// 用户可以按分类、按渠道单独关闭通知
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    BookingUpdates,
    PaymentUpdates,
    TripUpdates,
    SecurityAlerts,
    /// 营销 - 额外受 marketing_enabled 总开关控制
    Marketing,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingUpdates => "booking_updates",
            Self::PaymentUpdates => "payment_updates",
            Self::TripUpdates => "trip_updates",
            Self::SecurityAlerts => "security_alerts",
            Self::Marketing => "marketing",
        }
    }
}

/// 通知类型
///
/// 每个类型归属至多一个分类，并声明是否可走邮件、短信
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum NotificationType {
    // 预订
    BookingRequested,
    BookingAccepted,
    BookingRejected,
    BookingCancelled,
    // 支付
    PaymentReceived,
    PaymentFailed,
    RefundIssued,
    PayoutSent,
    // 行程
    TripStarted,
    TripCompleted,
    TripReminder,
    PickupCode,
    DeliveryCode,
    // 安全
    SecurityAlert,
    VerificationCode,
    PasswordChanged,
    // 营销
    Promotion,
    // 无分类
    NewMessage,
    ReviewReceived,
}

impl NotificationType {
    pub const ALL: [NotificationType; 19] = [
        Self::BookingRequested,
        Self::BookingAccepted,
        Self::BookingRejected,
        Self::BookingCancelled,
        Self::PaymentReceived,
        Self::PaymentFailed,
        Self::RefundIssued,
        Self::PayoutSent,
        Self::TripStarted,
        Self::TripCompleted,
        Self::TripReminder,
        Self::PickupCode,
        Self::DeliveryCode,
        Self::SecurityAlert,
        Self::VerificationCode,
        Self::PasswordChanged,
        Self::Promotion,
        Self::NewMessage,
        Self::ReviewReceived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BookingRequested => "booking_requested",
            Self::BookingAccepted => "booking_accepted",
            Self::BookingRejected => "booking_rejected",
            Self::BookingCancelled => "booking_cancelled",
            Self::PaymentReceived => "payment_received",
            Self::PaymentFailed => "payment_failed",
            Self::RefundIssued => "refund_issued",
            Self::PayoutSent => "payout_sent",
            Self::TripStarted => "trip_started",
            Self::TripCompleted => "trip_completed",
            Self::TripReminder => "trip_reminder",
            Self::PickupCode => "pickup_code",
            Self::DeliveryCode => "delivery_code",
            Self::SecurityAlert => "security_alert",
            Self::VerificationCode => "verification_code",
            Self::PasswordChanged => "password_changed",
            Self::Promotion => "promotion",
            Self::NewMessage => "new_message",
            Self::ReviewReceived => "review_received",
        }
    }

    /// 所属分类，None 表示不受分类开关约束
    pub fn category(&self) -> Option<Category> {
        match self {
            Self::BookingRequested
            | Self::BookingAccepted
            | Self::BookingRejected
            | Self::BookingCancelled => Some(Category::BookingUpdates),
            Self::PaymentReceived | Self::PaymentFailed | Self::RefundIssued | Self::PayoutSent => {
                Some(Category::PaymentUpdates)
            }
            Self::TripStarted
            | Self::TripCompleted
            | Self::TripReminder
            | Self::PickupCode
            | Self::DeliveryCode => Some(Category::TripUpdates),
            Self::SecurityAlert | Self::VerificationCode | Self::PasswordChanged => {
                Some(Category::SecurityAlerts)
            }
            Self::Promotion => Some(Category::Marketing),
            Self::NewMessage | Self::ReviewReceived => None,
        }
    }

    /// 结果性事件才发邮件：预订接受/拒绝/取消、支付类、安全类
    pub fn is_email_eligible(&self) -> bool {
        matches!(
            self,
            Self::BookingAccepted
                | Self::BookingRejected
                | Self::BookingCancelled
                | Self::PaymentReceived
                | Self::PaymentFailed
                | Self::RefundIssued
                | Self::PayoutSent
                | Self::SecurityAlert
                | Self::PasswordChanged
        )
    }

    /// 短信只用于各类验证码和安全告警
    pub fn is_sms_eligible(&self) -> bool {
        matches!(
            self,
            Self::PickupCode | Self::DeliveryCode | Self::VerificationCode | Self::SecurityAlert
        )
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
