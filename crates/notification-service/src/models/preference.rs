//! 用户通知偏好
//!
//! 每个用户一条记录，首次使用时按默认值惰性创建

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{Category, Channel};
use super::user::User;

/// 默认免打扰开始时间 22:00
pub fn default_quiet_hours_start() -> NaiveTime {
    NaiveTime::from_hms_opt(22, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// 默认免打扰结束时间 07:00
pub fn default_quiet_hours_end() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn allowed() -> bool {
    true
}

/// 单个分类下各渠道的开关
///
/// 缺省字段一律视为允许，避免新增的分类/渠道被静默拦截
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryChannels {
    #[serde(default = "allowed")]
    pub push: bool,
    #[serde(default = "allowed")]
    pub email: bool,
    #[serde(default = "allowed")]
    pub sms: bool,
    #[serde(default = "allowed")]
    pub in_app: bool,
}

impl Default for CategoryChannels {
    fn default() -> Self {
        Self {
            push: true,
            email: true,
            sms: true,
            in_app: true,
        }
    }
}

impl CategoryChannels {
    pub fn allows(&self, channel: Channel) -> bool {
        match channel {
            Channel::Push => self.push,
            Channel::Email => self.email,
            Channel::Sms => self.sms,
            Channel::InApp => self.in_app,
        }
    }

    pub fn set(&mut self, channel: Channel, enabled: bool) {
        match channel {
            Channel::Push => self.push = enabled,
            Channel::Email => self.email = enabled,
            Channel::Sms => self.sms = enabled,
            Channel::InApp => self.in_app = enabled,
        }
    }
}

/// 分类 × 渠道开关，对应 `{category}_{channel}` 一组布尔值
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorySettings {
    pub booking_updates: CategoryChannels,
    pub payment_updates: CategoryChannels,
    pub trip_updates: CategoryChannels,
    pub security_alerts: CategoryChannels,
    pub marketing: CategoryChannels,
}

impl CategorySettings {
    pub fn for_category(&self, category: Category) -> &CategoryChannels {
        match category {
            Category::BookingUpdates => &self.booking_updates,
            Category::PaymentUpdates => &self.payment_updates,
            Category::TripUpdates => &self.trip_updates,
            Category::SecurityAlerts => &self.security_alerts,
            Category::Marketing => &self.marketing,
        }
    }

    pub fn for_category_mut(&mut self, category: Category) -> &mut CategoryChannels {
        match category {
            Category::BookingUpdates => &mut self.booking_updates,
            Category::PaymentUpdates => &mut self.payment_updates,
            Category::TripUpdates => &mut self.trip_updates,
            Category::SecurityAlerts => &mut self.security_alerts,
            Category::Marketing => &mut self.marketing,
        }
    }

    pub fn allows(&self, category: Category, channel: Channel) -> bool {
        self.for_category(category).allows(channel)
    }
}

/// 用户通知偏好
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct NotificationPreference {
    pub user_id: String,
    pub push_enabled: bool,
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub in_app_enabled: bool,
    pub marketing_enabled: bool,
    /// 分类级渠道开关（JSONB）
    #[sqlx(json)]
    pub categories: CategorySettings,
    pub quiet_hours_enabled: bool,
    /// 本地时间
    pub quiet_hours_start: NaiveTime,
    /// 本地时间
    pub quiet_hours_end: NaiveTime,
    /// IANA 时区名
    pub timezone: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationPreference {
    /// 默认偏好
    ///
    /// - 站内信、推送、邮件开启
    /// - 短信、营销关闭
    /// - 免打扰关闭（保留 22:00-07:00 作为开启后的默认窗口）
    /// - 时区和语言取自用户资料，缺失时为 UTC / en
    pub fn defaults_for(user_id: &str, user: Option<&User>, now: DateTime<Utc>) -> Self {
        let timezone = user
            .and_then(|u| u.timezone.clone())
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| "UTC".to_string());
        let language = user
            .and_then(|u| u.language.clone())
            .filter(|lang| !lang.is_empty())
            .unwrap_or_else(|| "en".to_string());

        Self {
            user_id: user_id.to_string(),
            push_enabled: true,
            email_enabled: true,
            sms_enabled: false,
            in_app_enabled: true,
            marketing_enabled: false,
            categories: CategorySettings::default(),
            quiet_hours_enabled: false,
            quiet_hours_start: default_quiet_hours_start(),
            quiet_hours_end: default_quiet_hours_end(),
            timezone,
            language,
            created_at: now,
            updated_at: now,
        }
    }

    /// 渠道总开关
    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Push => self.push_enabled,
            Channel::Email => self.email_enabled,
            Channel::Sms => self.sms_enabled,
            Channel::InApp => self.in_app_enabled,
        }
    }

    pub fn set_channel_enabled(&mut self, channel: Channel, enabled: bool) {
        match channel {
            Channel::Push => self.push_enabled = enabled,
            Channel::Email => self.email_enabled = enabled,
            Channel::Sms => self.sms_enabled = enabled,
            Channel::InApp => self.in_app_enabled = enabled,
        }
    }

    /// 开启免打扰
    pub fn with_quiet_hours(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.quiet_hours_enabled = true;
        self.quiet_hours_start = start;
        self.quiet_hours_end = end;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }
}
