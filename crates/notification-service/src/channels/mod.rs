//! 渠道适配器
//!
//! 每个触达渠道一个适配器，负责取接收地址和实际发送。
//!
//! ## 内置适配器
//!
//! - **InApp**: 站内信，通知记录本身即是投递结果
//! - **Simulated**: 推送/邮件/短信的模拟实现，只记录日志并返回消息 ID
//!
//! 真实的推送、邮件、短信服务通过实现 [`ChannelAdapter`] 接入。

mod in_app;
mod simulated;

pub use in_app::InAppAdapter;
pub use simulated::SimulatedAdapter;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::{Channel, RenderedMessage, User};

/// 单次发送请求
#[derive(Debug, Clone, Copy)]
pub struct SendRequest<'a> {
    pub notification_id: Uuid,
    pub user: &'a User,
    /// 已由 `get_recipient` 解析出的接收地址
    pub recipient: &'a str,
    pub message: &'a RenderedMessage,
    pub data: &'a Map<String, Value>,
}

/// 发送结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub provider_message_id: Option<String>,
}

impl SendOutcome {
    pub fn delivered(provider_message_id: Option<String>) -> Self {
        Self {
            success: true,
            error: None,
            provider_message_id,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            provider_message_id: None,
        }
    }
}

/// 渠道适配器 trait
///
/// 发送失败返回 `SendOutcome::failed` 而非 Err，由调用方记入投递日志。
/// 适配器应当无状态，便于并发调用。
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// 接收地址（推送 token、邮箱、手机号等），缺失时返回 None
    fn get_recipient(&self, user: &User) -> Option<String>;

    async fn send(&self, request: &SendRequest<'_>) -> SendOutcome;
}

/// 渠道注册表
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册适配器，同一渠道后注册的覆盖先注册的
    pub fn register(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(adapter.channel(), adapter);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(&channel).cloned()
    }

    /// 已注册的渠道，按选择顺序排列
    pub fn channels(&self) -> Vec<Channel> {
        Channel::ALL
            .into_iter()
            .filter(|c| self.adapters.contains_key(c))
            .collect()
    }

    /// 站内信 + 三个模拟外部渠道
    pub fn with_simulated_providers() -> Self {
        Self::new()
            .register(Arc::new(InAppAdapter))
            .register(Arc::new(SimulatedAdapter::new(Channel::Push)))
            .register(Arc::new(SimulatedAdapter::new(Channel::Email)))
            .register(Arc::new(SimulatedAdapter::new(Channel::Sms)))
    }
}

/// 空白字符串视为缺失
pub(crate) fn non_blank(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}
