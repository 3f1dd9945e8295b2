//! 渠道选择
//!
//! 依据通知类型、优先级和用户偏好计算本次要走的渠道，顺序固定为
//! in_app → push → email → sms。

use chrono::{DateTime, Utc};

use crate::models::{Channel, NotificationPreference, NotificationType, Priority};
use crate::preference::PreferenceResolver;

/// 选择结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSelection {
    /// 最终投递渠道
    pub channels: Vec<Channel>,
    /// 因免打扰被剔除的渠道（已按调用方指定渠道过滤）
    pub suppressed: Vec<Channel>,
}

impl ChannelSelection {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.channels.contains(&channel)
    }
}

/// 渠道选择器，无状态
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelSelector;

impl ChannelSelector {
    pub fn new() -> Self {
        Self
    }

    /// 单渠道资格判断，不考虑免打扰
    ///
    /// 四个渠道都受总开关和分类开关约束，email / sms 另有类型限制
    pub fn eligible(
        &self,
        notification_type: NotificationType,
        channel: Channel,
        prefs: &NotificationPreference,
    ) -> bool {
        let type_allows = match channel {
            Channel::InApp | Channel::Push => true,
            Channel::Email => notification_type.is_email_eligible(),
            Channel::Sms => notification_type.is_sms_eligible(),
        };
        type_allows && PreferenceResolver::can_receive(notification_type, channel, prefs)
    }

    /// 计算渠道集合
    ///
    /// 非紧急通知在免打扰时段只保留 email / in_app；指定了渠道时再取交集。
    /// 结果为空时由调用方返回明确的“无可用渠道”结果。
    pub fn select(
        &self,
        notification_type: NotificationType,
        priority: Priority,
        prefs: &NotificationPreference,
        requested: Option<&[Channel]>,
        now: DateTime<Utc>,
    ) -> ChannelSelection {
        let mut channels: Vec<Channel> = Channel::ALL
            .into_iter()
            .filter(|c| self.eligible(notification_type, *c, prefs))
            .collect();

        let mut suppressed = Vec::new();
        if !priority.is_critical() && PreferenceResolver::is_in_quiet_hours(prefs, now) {
            channels.retain(|c| {
                if c.is_intrusive() {
                    suppressed.push(*c);
                    false
                } else {
                    true
                }
            });
        }

        if let Some(requested) = requested {
            channels.retain(|c| requested.contains(c));
            suppressed.retain(|c| requested.contains(c));
        }

        ChannelSelection {
            channels,
            suppressed,
        }
    }
}
