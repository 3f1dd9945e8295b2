//! 通知服务
//!
//! 对外的 dispatch 入口，串起整条流水线：
//!
//! ```text
//! 用户校验 → 频控 → 读取偏好 → 写站内通知 → 选渠道 → 各渠道并行发送
//! ```
//!
//! - 频控拒绝时什么都不写
//! - 选不出渠道时仍保留站内通知，返回 NoChannelsAvailable
//! - 单渠道失败只体现在该渠道的结果里，不影响其它渠道

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use notify_shared::config::NotificationConfig;
use notify_shared::observability::metrics;
use notify_shared::retry::RetryPolicy;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::channels::ChannelRegistry;
use crate::creator::NotificationCreator;
use crate::delivery::DeliveryLogger;
use crate::dispatcher::{ChannelResult, DispatchContext, Dispatcher, QUIET_HOURS_REASON};
use crate::error::{NotificationError, Result};
use crate::models::{
    DeliveryLogEntry, DeliveryStatus, DispatchRequest, NewQueueItem, Notification,
    NotificationPreference, QueueItem,
};
use crate::preference::PreferenceResolver;
use crate::queue::QueueProcessor;
use crate::rate_limit::RateLimiter;
use crate::repository::Repositories;
use crate::selector::ChannelSelector;
use crate::template::TemplateCatalog;

/// dispatch 结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// 已发往选中的渠道，逐渠道结果见 channels
    Dispatched {
        notification_id: Uuid,
        channels: Vec<ChannelResult>,
    },
    /// 偏好与免打扰排除了全部渠道，仅保留站内通知记录
    NoChannelsAvailable { notification_id: Uuid },
    /// 频控拒绝，未写入任何数据，不会自动重试
    RateLimited,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatched { .. } => "dispatched",
            Self::NoChannelsAvailable { .. } => "no_channels_available",
            Self::RateLimited => "rate_limited",
        }
    }

    pub fn notification_id(&self) -> Option<Uuid> {
        match self {
            Self::Dispatched { notification_id, .. }
            | Self::NoChannelsAvailable { notification_id } => Some(*notification_id),
            Self::RateLimited => None,
        }
    }

    pub fn channel_results(&self) -> &[ChannelResult] {
        match self {
            Self::Dispatched { channels, .. } => channels,
            _ => &[],
        }
    }
}

/// 通知服务
pub struct NotificationService {
    repos: Repositories,
    resolver: Arc<PreferenceResolver>,
    selector: ChannelSelector,
    rate_limiter: Arc<dyn RateLimiter>,
    creator: Arc<NotificationCreator>,
    dispatcher: Arc<Dispatcher>,
    config: NotificationConfig,
}

impl NotificationService {
    pub fn new(
        repos: Repositories,
        registry: ChannelRegistry,
        rate_limiter: Arc<dyn RateLimiter>,
        config: &NotificationConfig,
    ) -> Result<Self> {
        if config.queue_default_max_attempts < 1 {
            return Err(NotificationError::Validation(format!(
                "queue_default_max_attempts 至少为 1，当前为 {}",
                config.queue_default_max_attempts
            )));
        }
        let templates = Arc::new(TemplateCatalog::new(
            repos.templates.clone(),
            config.default_language.clone(),
            config.template_fallback_enabled,
        )?);
        let logger = Arc::new(DeliveryLogger::new(repos.delivery_logs.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            templates,
            logger,
            config.send_timeout(),
        ));

        info!(
            registered_channels = ?dispatcher.registered_channels(),
            rate_limit_max_sends = config.rate_limit_max_sends,
            "通知服务初始化完成"
        );

        Ok(Self {
            resolver: Arc::new(PreferenceResolver::new(
                repos.preferences.clone(),
                repos.users.clone(),
            )),
            selector: ChannelSelector::new(),
            rate_limiter,
            creator: Arc::new(NotificationCreator::new(repos.notifications.clone())),
            dispatcher,
            config: config.clone(),
            repos,
        })
    }

    pub async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchOutcome> {
        self.dispatch_at(request, Utc::now()).await
    }

    /// 以指定时刻执行 dispatch（免打扰和频控都按该时刻计算）
    #[instrument(
        skip(self, request),
        fields(
            user_id = %request.user_id,
            notification_type = %request.notification_type,
            priority = request.priority.as_str()
        )
    )]
    pub async fn dispatch_at(
        &self,
        request: DispatchRequest,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let started = Instant::now();
        NotificationCreator::validate(&request)?;

        let user = self
            .repos
            .users
            .get_user(&request.user_id)
            .await?
            .ok_or_else(|| NotificationError::UserNotFound(request.user_id.clone()))?;

        if !self.rate_limiter.admit(&user.id, now).await? {
            warn!("超出发送频率限制，本次通知被拒绝");
            metrics::record_rate_limited();
            let outcome = DispatchOutcome::RateLimited;
            self.record(&request, &outcome, started);
            return Ok(outcome);
        }

        // 每次都读最新偏好，退订立即生效
        let prefs = self.resolver.get_or_create(&user.id, now).await?;
        let notification = self.creator.create(&request, now).await?;

        let selection = self.selector.select(
            request.notification_type,
            request.priority,
            &prefs,
            request.channels.as_deref(),
            now,
        );

        if selection.is_empty() {
            info!(notification_id = %notification.id, "没有可用渠道");
            let outcome = DispatchOutcome::NoChannelsAvailable {
                notification_id: notification.id,
            };
            self.record(&request, &outcome, started);
            return Ok(outcome);
        }

        if self.config.audit_suppressed_channels {
            for channel in &selection.suppressed {
                if let Err(e) = self
                    .dispatcher
                    .logger()
                    .record_cancelled(notification.id, *channel, QUIET_HOURS_REASON, now)
                    .await
                {
                    warn!(channel = %channel, error = %e, "写入免打扰取消日志失败");
                }
            }
        }

        debug!(
            notification_id = %notification.id,
            channels = ?selection.channels,
            suppressed = ?selection.suppressed,
            "渠道选择完成"
        );

        let ctx = DispatchContext {
            notification: &notification,
            user: &user,
            prefs: &prefs,
            now,
        };
        let channels = join_all(
            selection
                .channels
                .iter()
                .map(|channel| self.dispatcher.dispatch_channel(&ctx, *channel)),
        )
        .await;

        let sent = channels.iter().filter(|r| r.is_success()).count();
        info!(
            notification_id = %notification.id,
            sent,
            total = channels.len(),
            "通知分发完成"
        );

        let outcome = DispatchOutcome::Dispatched {
            notification_id: notification.id,
            channels,
        };
        self.record(&request, &outcome, started);
        Ok(outcome)
    }

    /// 加入重试队列
    pub async fn enqueue(&self, item: NewQueueItem, now: DateTime<Utc>) -> Result<QueueItem> {
        if item.max_attempts.is_some_and(|m| m < 1) {
            return Err(NotificationError::Validation("max_attempts 至少为 1".into()));
        }
        let item = item.into_item(self.config.queue_default_max_attempts, now);
        self.repos.queue.enqueue(&item).await?;
        info!(
            queue_item_id = %item.id,
            user_id = %item.user_id,
            channel = %item.channel,
            scheduled_at = %item.scheduled_at,
            "通知已入队"
        );
        Ok(item)
    }

    pub async fn get_preferences(&self, user_id: &str) -> Result<NotificationPreference> {
        self.resolver.get_or_create(user_id, Utc::now()).await
    }

    pub async fn update_preferences(
        &self,
        mut preference: NotificationPreference,
    ) -> Result<NotificationPreference> {
        preference.updated_at = Utc::now();
        let saved = self.resolver.update(&preference).await?;
        info!(user_id = %saved.user_id, "通知偏好已更新");
        Ok(saved)
    }

    /// 标记已读，重复调用保留首次已读时间
    pub async fn mark_read(&self, user_id: &str, notification_id: Uuid) -> Result<()> {
        let found = self
            .repos
            .notifications
            .mark_read(notification_id, user_id, Utc::now())
            .await?;
        if !found {
            return Err(NotificationError::NotificationNotFound(notification_id));
        }
        Ok(())
    }

    /// 列出通知（已过期的不返回），按创建时间倒序
    pub async fn list_notifications(
        &self,
        user_id: &str,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let limit = limit.clamp(1, 200);
        self.repos
            .notifications
            .list_by_user(user_id, unread_only, Utc::now(), limit)
            .await
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64> {
        self.repos
            .notifications
            .count_unread(user_id, Utc::now())
            .await
    }

    /// 服务商回执（delivered / opened）
    pub async fn record_provider_callback(
        &self,
        provider_message_id: &str,
        status: DeliveryStatus,
    ) -> Result<DeliveryLogEntry> {
        self.dispatcher
            .logger()
            .record_provider_callback(provider_message_id, status, Utc::now())
            .await
    }

    /// 某条通知的全部投递日志
    pub async fn delivery_logs(&self, notification_id: Uuid) -> Result<Vec<DeliveryLogEntry>> {
        self.dispatcher
            .logger()
            .list_for_notification(notification_id)
            .await
    }

    /// 共享同一组组件的队列处理器
    pub fn queue_processor(&self) -> QueueProcessor {
        QueueProcessor::new(
            self.repos.queue.clone(),
            self.repos.users.clone(),
            self.resolver.clone(),
            self.creator.clone(),
            self.dispatcher.clone(),
            RetryPolicy::delivery_backoff(
                Duration::from_secs(self.config.backoff_base_minutes * 60),
                self.config.backoff_multiplier,
            ),
            self.config.queue_batch_size as i64,
            self.config.queue_concurrency,
        )
        .with_claim_lease(self.config.queue_claim_lease())
    }

    fn record(&self, request: &DispatchRequest, outcome: &DispatchOutcome, started: Instant) {
        metrics::record_dispatch(
            request.notification_type.as_str(),
            outcome.as_str(),
            started.elapsed().as_secs_f64(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, NotificationType, User};
    use crate::rate_limit::{InMemoryRateLimiter, MockRateLimiter};
    use crate::repository::InMemoryStore;

    fn service_with(limiter: Arc<dyn RateLimiter>) -> (NotificationService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        store.put_user(
            User::new("u1")
                .with_email("u1@example.com")
                .with_push_token("tok-1"),
        );
        let service = NotificationService::new(
            Repositories::in_memory(store.clone()),
            ChannelRegistry::with_simulated_providers(),
            limiter,
            &NotificationConfig::default(),
        )
        .unwrap();
        (service, store)
    }

    fn request() -> DispatchRequest {
        DispatchRequest::new(
            "u1",
            NotificationType::BookingAccepted,
            "Booking accepted",
            "Your booking was accepted",
        )
    }

    #[tokio::test]
    async fn test_unknown_user_is_an_error() {
        let (service, store) = service_with(Arc::new(InMemoryRateLimiter::new(3, Duration::from_secs(3600))));
        let mut req = request();
        req.user_id = "ghost".into();

        let err = service.dispatch(req).await.unwrap_err();
        assert!(matches!(err, NotificationError::UserNotFound(_)));
        assert!(store.notifications_for("ghost").is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_writes_nothing() {
        let mut limiter = MockRateLimiter::new();
        limiter.expect_admit().returning(|_, _| Ok(false));
        let (service, store) = service_with(Arc::new(limiter));

        let outcome = service.dispatch(request()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::RateLimited);
        assert!(store.notifications_for("u1").is_empty());
        assert_eq!(store.log_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_does_not_consume_quota() {
        let mut limiter = MockRateLimiter::new();
        limiter.expect_admit().never();
        let (service, _) = service_with(Arc::new(limiter));

        let req = request().with_channels(vec![]);
        assert!(matches!(
            service.dispatch(req).await,
            Err(NotificationError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_read_and_unread_count() {
        let (service, _) = service_with(Arc::new(InMemoryRateLimiter::new(3, Duration::from_secs(3600))));
        let outcome = service.dispatch(request()).await.unwrap();
        let id = outcome.notification_id().unwrap();

        assert_eq!(service.unread_count("u1").await.unwrap(), 1);
        service.mark_read("u1", id).await.unwrap();
        assert_eq!(service.unread_count("u1").await.unwrap(), 0);
        assert!(service.list_notifications("u1", true, 10).await.unwrap().is_empty());
        assert_eq!(service.list_notifications("u1", false, 10).await.unwrap().len(), 1);

        let err = service.mark_read("someone-else", id).await.unwrap_err();
        assert!(matches!(err, NotificationError::NotificationNotFound(_)));
    }

    #[test]
    fn test_zero_default_max_attempts_is_rejected() {
        let config = NotificationConfig {
            queue_default_max_attempts: 0,
            ..Default::default()
        };
        let result = NotificationService::new(
            Repositories::in_memory(Arc::new(InMemoryStore::new())),
            ChannelRegistry::with_simulated_providers(),
            Arc::new(InMemoryRateLimiter::new(3, Duration::from_secs(3600))),
            &config,
        );
        assert!(matches!(result, Err(NotificationError::Validation(_))));
    }

    #[tokio::test]
    async fn test_enqueue_applies_default_attempts() {
        let (service, store) = service_with(Arc::new(InMemoryRateLimiter::new(3, Duration::from_secs(3600))));
        let now = Utc::now();
        let item = service
            .enqueue(
                NewQueueItem::new(
                    "u1",
                    NotificationType::TripReminder,
                    Channel::Push,
                    Default::default(),
                    now,
                ),
                now,
            )
            .await
            .unwrap();

        assert_eq!(item.max_attempts, 3);
        assert_eq!(store.queue_snapshot().len(), 1);

        let bad = NewQueueItem::new("u1", NotificationType::TripReminder, Channel::Push, Default::default(), now)
            .with_max_attempts(0);
        assert!(service.enqueue(bad, now).await.is_err());
    }

    #[tokio::test]
    async fn test_update_preferences_validates() {
        let (service, _) = service_with(Arc::new(InMemoryRateLimiter::new(3, Duration::from_secs(3600))));
        let mut prefs = service.get_preferences("u1").await.unwrap();
        prefs.push_enabled = false;
        let saved = service.update_preferences(prefs.clone()).await.unwrap();
        assert!(!saved.push_enabled);

        prefs.timezone = "Nowhere/Special".into();
        assert!(service.update_preferences(prefs).await.is_err());
    }
}
