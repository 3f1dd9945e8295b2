//! 集成测试公共组件：内存存储 + 可控的渠道适配器

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use notification_service::{
    Channel, ChannelAdapter, ChannelRegistry, InAppAdapter, InMemoryRateLimiter, InMemoryStore,
    NotificationService, RateLimiter, RenderedMessage, Repositories, SendOutcome, SendRequest,
    User,
};
use notify_shared::config::NotificationConfig;
use parking_lot::Mutex;

/// 记录每次发送内容，可切换为失败
pub struct RecordingAdapter {
    channel: Channel,
    failing: AtomicBool,
    sent: Mutex<Vec<RenderedMessage>>,
}

impl RecordingAdapter {
    pub fn new(channel: Channel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            failing: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 适配器被调用的次数（含失败）
    pub fn calls(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn last_message(&self) -> Option<RenderedMessage> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn get_recipient(&self, user: &User) -> Option<String> {
        match self.channel {
            Channel::Push => user.push_token.clone(),
            Channel::Email => user.email.clone(),
            Channel::Sms => user.phone.clone(),
            Channel::InApp => Some(user.id.clone()),
        }
    }

    async fn send(&self, request: &SendRequest<'_>) -> SendOutcome {
        self.sent.lock().push(request.message.clone());
        if self.failing.load(Ordering::SeqCst) {
            SendOutcome::failed(format!("{} provider unavailable", self.channel))
        } else {
            SendOutcome::delivered(Some(format!("{}-{}", self.channel, request.notification_id)))
        }
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub service: NotificationService,
    pub push: Arc<RecordingAdapter>,
    pub email: Arc<RecordingAdapter>,
    pub sms: Arc<RecordingAdapter>,
}

impl Harness {
    pub fn new() -> Self {
        let config = NotificationConfig::default();
        let limiter = Arc::new(InMemoryRateLimiter::new(
            config.rate_limit_max_sends,
            config.rate_limit_window(),
        ));
        Self::with_limiter(limiter)
    }

    pub fn with_limiter(limiter: Arc<dyn RateLimiter>) -> Self {
        Self::build(limiter, &NotificationConfig::default())
    }

    /// 关闭内置通用模板，缺模板的渠道直接失败
    pub fn without_template_fallback() -> Self {
        let config = NotificationConfig {
            template_fallback_enabled: false,
            ..Default::default()
        };
        let limiter = Arc::new(InMemoryRateLimiter::new(
            config.rate_limit_max_sends,
            config.rate_limit_window(),
        ));
        Self::build(limiter, &config)
    }

    fn build(limiter: Arc<dyn RateLimiter>, config: &NotificationConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let push = RecordingAdapter::new(Channel::Push);
        let email = RecordingAdapter::new(Channel::Email);
        let sms = RecordingAdapter::new(Channel::Sms);
        let registry = ChannelRegistry::new()
            .register(Arc::new(InAppAdapter))
            .register(push.clone())
            .register(email.clone())
            .register(sms.clone());

        let service = NotificationService::new(
            Repositories::in_memory(store.clone()),
            registry,
            limiter,
            config,
        )
        .expect("service should build");

        Self {
            store,
            service,
            push,
            email,
            sms,
        }
    }

    /// 永远拒绝的频控
    pub fn rate_limited() -> Self {
        Self::with_limiter(Arc::new(InMemoryRateLimiter::new(0, Duration::from_secs(3600))))
    }

    pub fn add_user(&self, user: User) {
        self.store.put_user(user);
    }
}

/// 带全部接收地址的用户
pub fn reachable_user(id: &str) -> User {
    User::new(id)
        .with_email(format!("{id}@example.com"))
        .with_phone("+15550100")
        .with_push_token(format!("push-{id}"))
}
