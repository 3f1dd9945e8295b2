//! 模拟外部渠道
//!
//! 推送/邮件/短信的占位实现：按渠道取接收地址，记录一条日志后返回成功。
//! 生产环境替换为接入真实服务商的适配器。

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::{ChannelAdapter, SendOutcome, SendRequest, non_blank};
use crate::models::{Channel, User};

#[derive(Debug, Clone)]
pub struct SimulatedAdapter {
    channel: Channel,
    latency: Duration,
}

impl SimulatedAdapter {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            latency: Duration::ZERO,
        }
    }

    /// 模拟网络延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl ChannelAdapter for SimulatedAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn get_recipient(&self, user: &User) -> Option<String> {
        match self.channel {
            Channel::Push => non_blank(user.push_token.as_ref()),
            Channel::Email => non_blank(user.email.as_ref()),
            Channel::Sms => non_blank(user.phone.as_ref()),
            Channel::InApp => (!user.id.is_empty()).then(|| user.id.clone()),
        }
    }

    async fn send(&self, request: &SendRequest<'_>) -> SendOutcome {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let message_id = format!("sim-{}", Uuid::now_v7());
        info!(
            channel = %self.channel,
            notification_id = %request.notification_id,
            recipient = %request.recipient,
            title = %request.message.headline(),
            message_id = %message_id,
            "模拟渠道发送成功"
        );
        SendOutcome::delivered(Some(message_id))
    }
}
