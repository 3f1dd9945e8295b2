//! 单渠道发送
//!
//! 对一个渠道执行完整的一次投递：写日志、免打扰拦截、取接收地址、
//! 渲染模板、带超时调用适配器、回写状态。任何错误都收敛为该渠道的
//! 失败结果，不会影响同一事件的其它渠道。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use notify_shared::observability::metrics;
use notify_shared::observability::tracing::current_trace_id;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channels::{ChannelRegistry, SendOutcome, SendRequest};
use crate::delivery::DeliveryLogger;
use crate::error::{NotificationError, Result};
use crate::models::{
    Channel, DeliveryLogEntry, DeliveryStatus, Notification, NotificationPreference, User,
};
use crate::preference::PreferenceResolver;
use crate::template::TemplateCatalog;

/// 免打扰拦截时写入日志的原因
pub const QUIET_HOURS_REASON: &str = "quiet_hours";
pub const NO_RECIPIENT: &str = "no recipient available";

/// 一次 dispatch 的共享上下文
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    pub notification: &'a Notification,
    pub user: &'a User,
    pub prefs: &'a NotificationPreference,
    pub now: DateTime<Utc>,
}

/// 单渠道发送结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelResult {
    pub channel: Channel,
    /// sent / failed / cancelled
    pub status: DeliveryStatus,
    pub log_id: Option<Uuid>,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl ChannelResult {
    pub fn sent(channel: Channel, log_id: Uuid, provider_message_id: Option<String>) -> Self {
        Self {
            channel,
            status: DeliveryStatus::Sent,
            log_id: Some(log_id),
            provider_message_id,
            error: None,
        }
    }

    pub fn failed(channel: Channel, log_id: Option<Uuid>, error: impl Into<String>) -> Self {
        Self {
            channel,
            status: DeliveryStatus::Failed,
            log_id,
            provider_message_id: None,
            error: Some(error.into()),
        }
    }

    pub fn cancelled(channel: Channel, log_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            channel,
            status: DeliveryStatus::Cancelled,
            log_id: Some(log_id),
            provider_message_id: None,
            error: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Sent
    }
}

pub struct Dispatcher {
    registry: ChannelRegistry,
    templates: Arc<TemplateCatalog>,
    logger: Arc<DeliveryLogger>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: ChannelRegistry,
        templates: Arc<TemplateCatalog>,
        logger: Arc<DeliveryLogger>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            templates,
            logger,
            send_timeout,
        }
    }

    pub fn logger(&self) -> &Arc<DeliveryLogger> {
        &self.logger
    }

    pub fn registered_channels(&self) -> Vec<Channel> {
        self.registry.channels()
    }

    /// 发送到单个渠道，从不返回错误
    pub async fn dispatch_channel(&self, ctx: &DispatchContext<'_>, channel: Channel) -> ChannelResult {
        let started = Instant::now();

        let result = match self.run(ctx, channel).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    notification_id = %ctx.notification.id,
                    channel = %channel,
                    error = %e,
                    "渠道投递异常"
                );
                ChannelResult::failed(channel, None, e.to_string())
            }
        };

        metrics::record_channel_send(
            channel.as_str(),
            result.status.as_str(),
            started.elapsed().as_secs_f64(),
        );
        result
    }

    /// 非紧急通知在免打扰时段不走推送和短信
    fn suppressed_by_quiet_hours(&self, ctx: &DispatchContext<'_>, channel: Channel) -> bool {
        channel.is_intrusive()
            && !ctx.notification.priority.is_critical()
            && PreferenceResolver::is_in_quiet_hours(ctx.prefs, ctx.now)
    }

    async fn run(&self, ctx: &DispatchContext<'_>, channel: Channel) -> Result<ChannelResult> {
        let notification = ctx.notification;
        let entry = self.logger.start(notification.id, channel, ctx.now).await?;

        if self.suppressed_by_quiet_hours(ctx, channel) {
            let entry = self
                .logger
                .mark_cancelled(&entry, QUIET_HOURS_REASON, ctx.now)
                .await?;
            info!(
                notification_id = %notification.id,
                channel = %channel,
                "免打扰时段，渠道已取消"
            );
            return Ok(ChannelResult::cancelled(channel, entry.id, QUIET_HOURS_REASON));
        }

        let adapter = self.registry.get(channel);
        let recipient = adapter.as_ref().and_then(|a| a.get_recipient(ctx.user));
        let entry = self
            .logger
            .mark_processing(&entry, recipient.clone(), ctx.now)
            .await?;

        let (adapter, recipient) = match (adapter, recipient) {
            (Some(adapter), Some(recipient)) => (adapter, recipient),
            (None, _) => {
                let reason = NotificationError::AdapterNotRegistered(channel).to_string();
                return self.fail(&entry, &reason, ctx.now).await;
            }
            (Some(_), None) => return self.fail(&entry, NO_RECIPIENT, ctx.now).await,
        };

        let template = match self
            .templates
            .resolve(notification.notification_type, channel, &ctx.prefs.language)
            .await
        {
            Ok(template) => template,
            Err(e) => return self.fail(&entry, &e.to_string(), ctx.now).await,
        };
        let message = self
            .templates
            .render(&template, &TemplateCatalog::variables_for(notification));

        let request = SendRequest {
            notification_id: notification.id,
            user: ctx.user,
            recipient: &recipient,
            message: &message,
            data: &notification.data,
        };
        // 超时后 future 被丢弃，适配器内的请求随之取消
        let outcome = match tokio::time::timeout(self.send_timeout, adapter.send(&request)).await {
            Ok(outcome) => outcome,
            Err(_) => SendOutcome::failed(
                NotificationError::SendTimeout {
                    channel,
                    timeout_ms: self.send_timeout.as_millis() as u64,
                }
                .to_string(),
            ),
        };

        if outcome.success {
            let entry = self
                .logger
                .mark_sent(&entry, outcome.provider_message_id.clone(), ctx.now)
                .await?;
            debug!(
                notification_id = %notification.id,
                channel = %channel,
                log_id = %entry.id,
                "渠道发送成功"
            );
            Ok(ChannelResult::sent(channel, entry.id, outcome.provider_message_id))
        } else {
            let reason = outcome
                .error
                .unwrap_or_else(|| format!("{channel} send failed"));
            self.fail(&entry, &reason, ctx.now).await
        }
    }

    async fn fail(
        &self,
        entry: &DeliveryLogEntry,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<ChannelResult> {
        let entry = self.logger.mark_failed(entry, reason, now).await?;
        warn!(
            notification_id = %entry.notification_id,
            channel = %entry.channel,
            error = reason,
            trace_id = current_trace_id().as_deref(),
            "渠道发送失败"
        );
        Ok(ChannelResult::failed(entry.channel, Some(entry.id), reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{ChannelAdapter, InAppAdapter, SimulatedAdapter};
    use crate::models::{NotificationType, Priority};
    use crate::repository::InMemoryStore;
    use async_trait::async_trait;
    use chrono::{NaiveTime, TimeZone};
    use serde_json::Map;

    struct FailingAdapter;

    #[async_trait]
    impl ChannelAdapter for FailingAdapter {
        fn channel(&self) -> Channel {
            Channel::Email
        }

        fn get_recipient(&self, user: &User) -> Option<String> {
            user.email.clone()
        }

        async fn send(&self, _request: &SendRequest<'_>) -> SendOutcome {
            SendOutcome::failed("mailbox unavailable")
        }
    }

    struct SlowAdapter;

    #[async_trait]
    impl ChannelAdapter for SlowAdapter {
        fn channel(&self) -> Channel {
            Channel::Push
        }

        fn get_recipient(&self, _user: &User) -> Option<String> {
            Some("tok".into())
        }

        async fn send(&self, _request: &SendRequest<'_>) -> SendOutcome {
            tokio::time::sleep(Duration::from_millis(500)).await;
            SendOutcome::delivered(None)
        }
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 5, 12, 0, 0).unwrap()
    }

    fn notification(priority: Priority) -> Notification {
        Notification {
            id: Uuid::now_v7(),
            user_id: "u1".into(),
            notification_type: NotificationType::BookingAccepted,
            title: "Accepted".into(),
            message: "Your booking was accepted".into(),
            data: Map::new(),
            priority,
            created_at: noon(),
            read_at: None,
            expires_at: None,
        }
    }

    fn dispatcher(store: &Arc<InMemoryStore>, registry: ChannelRegistry) -> Dispatcher {
        let templates = Arc::new(TemplateCatalog::new(store.clone(), "en", true).unwrap());
        let logger = Arc::new(DeliveryLogger::new(store.clone()));
        Dispatcher::new(registry, templates, logger, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_sent_through_simulated_adapter() {
        let store = Arc::new(InMemoryStore::new());
        let d = dispatcher(&store, ChannelRegistry::with_simulated_providers());
        let user = User::new("u1").with_email("u1@example.com");
        let prefs = NotificationPreference::defaults_for("u1", Some(&user), noon());
        let n = notification(Priority::Normal);
        let ctx = DispatchContext { notification: &n, user: &user, prefs: &prefs, now: noon() };

        let result = d.dispatch_channel(&ctx, Channel::Email).await;
        assert!(result.is_success());
        assert!(result.provider_message_id.unwrap().starts_with("sim-"));
    }

    #[tokio::test]
    async fn test_missing_recipient_fails_without_send() {
        let store = Arc::new(InMemoryStore::new());
        let d = dispatcher(&store, ChannelRegistry::with_simulated_providers());
        let user = User::new("u1");
        let prefs = NotificationPreference::defaults_for("u1", None, noon());
        let n = notification(Priority::Normal);
        let ctx = DispatchContext { notification: &n, user: &user, prefs: &prefs, now: noon() };

        let result = d.dispatch_channel(&ctx, Channel::Push).await;
        assert_eq!(result.status, DeliveryStatus::Failed);
        assert_eq!(result.error.as_deref(), Some(NO_RECIPIENT));

        let logs = d.logger().list_for_notification(n.id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
        assert_eq!(logs[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_adapter_failure_is_recorded() {
        let store = Arc::new(InMemoryStore::new());
        let registry = ChannelRegistry::new()
            .register(Arc::new(InAppAdapter))
            .register(Arc::new(FailingAdapter));
        let d = dispatcher(&store, registry);
        let user = User::new("u1").with_email("u1@example.com");
        let prefs = NotificationPreference::defaults_for("u1", None, noon());
        let n = notification(Priority::Normal);
        let ctx = DispatchContext { notification: &n, user: &user, prefs: &prefs, now: noon() };

        let email = d.dispatch_channel(&ctx, Channel::Email).await;
        let in_app = d.dispatch_channel(&ctx, Channel::InApp).await;
        assert_eq!(email.error.as_deref(), Some("mailbox unavailable"));
        assert!(in_app.is_success());
    }

    #[tokio::test]
    async fn test_push_cancelled_in_quiet_hours() {
        let store = Arc::new(InMemoryStore::new());
        let registry = ChannelRegistry::new().register(Arc::new(SimulatedAdapter::new(Channel::Push)));
        let d = dispatcher(&store, registry);
        let user = User::new("u1").with_push_token("tok");
        let prefs = NotificationPreference::defaults_for("u1", None, noon()).with_quiet_hours(
            NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
        );

        let normal = notification(Priority::Normal);
        let ctx = DispatchContext { notification: &normal, user: &user, prefs: &prefs, now: noon() };
        let result = d.dispatch_channel(&ctx, Channel::Push).await;
        assert_eq!(result.status, DeliveryStatus::Cancelled);

        let critical = notification(Priority::Critical);
        let ctx = DispatchContext { notification: &critical, user: &user, prefs: &prefs, now: noon() };
        assert!(d.dispatch_channel(&ctx, Channel::Push).await.is_success());
    }

    #[tokio::test]
    async fn test_send_timeout() {
        let store = Arc::new(InMemoryStore::new());
        let d = dispatcher(&store, ChannelRegistry::new().register(Arc::new(SlowAdapter)));
        let user = User::new("u1");
        let prefs = NotificationPreference::defaults_for("u1", None, noon());
        let n = notification(Priority::Normal);
        let ctx = DispatchContext { notification: &n, user: &user, prefs: &prefs, now: noon() };

        let result = d.dispatch_channel(&ctx, Channel::Push).await;
        assert_eq!(result.status, DeliveryStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("send timed out after 50 ms"));
    }
}
