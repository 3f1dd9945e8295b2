//! 站内信渠道
//!
//! 通知记录在 dispatch 开始时已经写入，这里只确认投递，消息 ID 即通知 ID。

use async_trait::async_trait;
use tracing::debug;

use super::{ChannelAdapter, SendOutcome, SendRequest};
use crate::models::{Channel, User};

#[derive(Debug, Clone, Copy, Default)]
pub struct InAppAdapter;

#[async_trait]
impl ChannelAdapter for InAppAdapter {
    fn channel(&self) -> Channel {
        Channel::InApp
    }

    fn get_recipient(&self, user: &User) -> Option<String> {
        (!user.id.is_empty()).then(|| user.id.clone())
    }

    async fn send(&self, request: &SendRequest<'_>) -> SendOutcome {
        debug!(
            notification_id = %request.notification_id,
            user_id = %request.recipient,
            "站内信已投递"
        );
        SendOutcome::delivered(Some(request.notification_id.to_string()))
    }
}
