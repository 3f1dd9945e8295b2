//! 通知模板
//!
//! 以 (类型, 渠道, 语言) 为键，字段按渠道形状组织：
//! 推送/站内信/短信使用 title + body，邮件使用 subject + content

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{Channel, NotificationType};

pub const FALLBACK_TITLE: &str = "Notification";
pub const FALLBACK_BODY: &str = "You have a new notification";

/// 通知模板
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Template {
    pub notification_type: NotificationType,
    pub channel: Channel,
    pub language: String,
    /// 字段名 -> 含 `{{var}}` 占位符的文本
    #[sqlx(json)]
    pub fields: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn new(
        notification_type: NotificationType,
        channel: Channel,
        language: impl Into<String>,
    ) -> Self {
        Self {
            notification_type,
            channel,
            language: language.into(),
            fields: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.fields.insert(name.into(), text.into());
        self
    }

    /// 内置通用模板
    pub fn fallback(notification_type: NotificationType, channel: Channel, language: &str) -> Self {
        let (headline, body) = field_names(channel);
        Self::new(notification_type, channel, language)
            .with_field(headline, FALLBACK_TITLE)
            .with_field(body, FALLBACK_BODY)
    }
}

/// 渠道对应的 (标题字段, 正文字段)
pub fn field_names(channel: Channel) -> (&'static str, &'static str) {
    match channel {
        Channel::Email => ("subject", "content"),
        Channel::Push | Channel::Sms | Channel::InApp => ("title", "body"),
    }
}

/// 渲染后的渠道内容
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub channel: Option<Channel>,
    pub fields: BTreeMap<String, String>,
}

impl RenderedMessage {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// 标题（邮件为 subject）
    pub fn headline(&self) -> &str {
        self.get("title").or_else(|| self.get("subject")).unwrap_or_default()
    }

    /// 正文（邮件为 content）
    pub fn body(&self) -> &str {
        self.get("body").or_else(|| self.get("content")).unwrap_or_default()
    }
}
