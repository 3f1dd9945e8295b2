//! 模板目录
//!
//! 按 (类型, 渠道, 语言) 解析模板：请求语言 → 默认语言 → 内置通用模板。
//! 渲染只做 `{{variable}}` 替换，缺失变量替换为空串，不报错。
//!
//! ```ignore
//! let catalog = TemplateCatalog::new(repo, "en", true)?;
//! let template = catalog.resolve(NotificationType::BookingAccepted, Channel::Push, "fr").await?;
//! let rendered = catalog.render(&template, &TemplateCatalog::variables_for(&notification));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{NotificationError, Result};
use crate::models::{Channel, Notification, NotificationType, RenderedMessage, Template};
use crate::repository::TemplateRepository;

pub struct TemplateCatalog {
    repo: Arc<dyn TemplateRepository>,
    default_language: String,
    fallback_enabled: bool,
    /// 匹配 {{variable_name}}
    variable_regex: Regex,
}

impl TemplateCatalog {
    pub fn new(
        repo: Arc<dyn TemplateRepository>,
        default_language: impl Into<String>,
        fallback_enabled: bool,
    ) -> Result<Self> {
        let variable_regex = Regex::new(r"\{\{(\w+)\}\}")
            .map_err(|e| NotificationError::Internal(format!("模板变量正则无效: {e}")))?;
        Ok(Self {
            repo,
            default_language: default_language.into(),
            fallback_enabled,
            variable_regex,
        })
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    /// 解析模板
    ///
    /// 只有在关闭内置回退且两种语言都没有模板时才返回 TemplateMissing，
    /// 调用方把它当作该渠道的失败处理。
    pub async fn resolve(
        &self,
        notification_type: NotificationType,
        channel: Channel,
        language: &str,
    ) -> Result<Template> {
        if let Some(template) = self.repo.find(notification_type, channel, language).await? {
            return Ok(template);
        }

        if language != self.default_language {
            if let Some(template) = self
                .repo
                .find(notification_type, channel, &self.default_language)
                .await?
            {
                debug!(
                    notification_type = %notification_type,
                    channel = %channel,
                    language,
                    "使用默认语言模板"
                );
                return Ok(template);
            }
        }

        if self.fallback_enabled {
            warn!(
                notification_type = %notification_type,
                channel = %channel,
                language,
                "模板缺失，使用内置通用模板"
            );
            return Ok(Template::fallback(notification_type, channel, language));
        }

        Err(NotificationError::TemplateMissing {
            notification_type: notification_type.to_string(),
            channel,
            language: language.to_string(),
        })
    }

    /// 渲染全部字段
    pub fn render(&self, template: &Template, variables: &HashMap<String, String>) -> RenderedMessage {
        let fields = template
            .fields
            .iter()
            .map(|(name, text)| (name.clone(), self.render_text(text, variables)))
            .collect();
        RenderedMessage {
            channel: Some(template.channel),
            fields,
        }
    }

    /// 替换单段文本中的变量，未提供的变量替换为空串
    pub fn render_text(&self, text: &str, variables: &HashMap<String, String>) -> String {
        self.variable_regex
            .replace_all(text, |caps: &regex::Captures| {
                let name = &caps[1];
                match variables.get(name) {
                    Some(value) => value.clone(),
                    None => {
                        debug!(variable = name, "模板变量未提供，替换为空");
                        String::new()
                    }
                }
            })
            .into_owned()
    }

    /// 提取模板文本中的变量名
    pub fn extract_variables(&self, text: &str) -> Vec<String> {
        self.variable_regex
            .captures_iter(text)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    /// 通知的模板变量：业务数据 + title / message
    ///
    /// 字符串原样使用，其它 JSON 值取其文本形式；null 视为空串。
    pub fn variables_for(notification: &Notification) -> HashMap<String, String> {
        let mut variables: HashMap<String, String> = notification
            .data
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect();
        variables
            .entry("title".to_string())
            .or_insert_with(|| notification.title.clone());
        variables
            .entry("message".to_string())
            .or_insert_with(|| notification.message.clone());
        variables
    }
}
