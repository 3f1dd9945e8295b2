//! dispatch 流程集成测试
//!
//! 使用内存存储和可控适配器跑完整流水线，无需外部依赖

mod common;

use chrono::{Duration, NaiveTime};
use common::{Harness, reachable_user};
use notification_service::{
    Channel, DeliveryStatus, DispatchOutcome, DispatchRequest, NotificationError,
    NotificationType, Priority, Template, TemplateRepository,
};
use notify_shared::test_utils::{TestAssertions, TestDataGenerator, test_instant};
use serde_json::json;

fn booking_accepted(user_id: &str) -> DispatchRequest {
    DispatchRequest::new(
        user_id,
        NotificationType::BookingAccepted,
        "Booking accepted",
        "Your booking was accepted",
    )
    .with_data_map(TestDataGenerator::booking_data("b-42", "Cordless drill"))
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

async fn enable_quiet_hours(h: &Harness, user_id: &str) {
    let prefs = h.service.get_preferences(user_id).await.unwrap();
    h.service
        .update_preferences(prefs.with_quiet_hours(hm(22, 0), hm(7, 0)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_scenario_a_fans_out_to_three_channels() {
    let h = Harness::new();
    h.add_user(reachable_user("alice").with_language("fr"));
    h.store
        .upsert(
            &Template::new(NotificationType::BookingAccepted, Channel::Push, "fr")
                .with_field("title", "Réservation acceptée")
                .with_field("body", "{{item_name}} est réservé ({{booking_id}})"),
        )
        .await
        .unwrap();

    let now = test_instant(2025, 4, 2, 12, 0);
    let outcome = h
        .service
        .dispatch_at(booking_accepted("alice"), now)
        .await
        .unwrap();

    let DispatchOutcome::Dispatched {
        notification_id,
        channels,
    } = outcome
    else {
        panic!("expected dispatched outcome, got {outcome:?}");
    };
    let selected: Vec<Channel> = channels.iter().map(|r| r.channel).collect();
    assert_eq!(selected, vec![Channel::InApp, Channel::Push, Channel::Email]);
    assert!(channels.iter().all(|r| r.is_success()));

    let logs = h.service.delivery_logs(notification_id).await.unwrap();
    assert_eq!(logs.len(), 3);
    for log in &logs {
        assert_eq!(log.status, DeliveryStatus::Sent);
        assert_eq!(log.attempts, 1);
        assert!(log.provider_message_id.is_some());
    }

    let push = h.push.last_message().unwrap();
    assert_eq!(push.headline(), "Réservation acceptée");
    assert_eq!(push.body(), "Cordless drill est réservé (b-42)");

    // 邮件没有 fr / en 模板，走内置通用文案
    let email = h.email.last_message().unwrap();
    assert_eq!(email.headline(), "Notification");
}

#[tokio::test]
async fn test_scenario_b_quiet_hours_cancel_push() {
    let h = Harness::new();
    h.add_user(reachable_user("bob"));
    enable_quiet_hours(&h, "bob").await;

    let now = test_instant(2025, 4, 2, 23, 30);
    let outcome = h
        .service
        .dispatch_at(booking_accepted("bob"), now)
        .await
        .unwrap();

    let selected: Vec<Channel> = outcome.channel_results().iter().map(|r| r.channel).collect();
    assert_eq!(selected, vec![Channel::InApp, Channel::Email]);
    assert_eq!(h.push.calls(), 0);

    let logs = h
        .service
        .delivery_logs(outcome.notification_id().unwrap())
        .await
        .unwrap();
    let push_logs: Vec<_> = logs.iter().filter(|l| l.channel == Channel::Push).collect();
    assert_eq!(push_logs.len(), 1);
    assert_eq!(push_logs[0].status, DeliveryStatus::Cancelled);
    assert!(push_logs[0].sent_at.is_none());
}

#[tokio::test]
async fn test_critical_priority_ignores_quiet_hours() {
    let h = Harness::new();
    h.add_user(reachable_user("carol"));
    enable_quiet_hours(&h, "carol").await;

    let alert = || {
        DispatchRequest::new(
            "carol",
            NotificationType::SecurityAlert,
            "New sign-in",
            "A new device signed in",
        )
        .with_priority(Priority::Critical)
    };
    let night = h
        .service
        .dispatch_at(alert(), test_instant(2025, 4, 2, 23, 30))
        .await
        .unwrap();
    let day = h
        .service
        .dispatch_at(alert(), test_instant(2025, 4, 3, 12, 0))
        .await
        .unwrap();

    let channels = |o: &DispatchOutcome| -> Vec<Channel> {
        o.channel_results().iter().map(|r| r.channel).collect()
    };
    assert_eq!(channels(&night), channels(&day));
    assert!(channels(&night).contains(&Channel::Push));
}

#[tokio::test]
async fn test_one_notification_per_dispatch_even_when_channels_fail() {
    let h = Harness::new();
    h.add_user(reachable_user("dave"));
    h.email.set_failing(true);

    let outcome = h
        .service
        .dispatch_at(booking_accepted("dave"), test_instant(2025, 4, 2, 12, 0))
        .await
        .unwrap();

    let results = outcome.channel_results();
    let email = results.iter().find(|r| r.channel == Channel::Email).unwrap();
    assert_eq!(email.status, DeliveryStatus::Failed);
    assert_eq!(email.error.as_deref(), Some("email provider unavailable"));
    // 其它渠道不受影响
    assert!(results.iter().filter(|r| r.channel != Channel::Email).all(|r| r.is_success()));

    let stored = h.store.notifications_for("dave");
    assert_eq!(stored.len(), 1);
    TestAssertions::assert_json_field_eq(&stored[0].data, "booking_id", &json!("b-42"));
}

#[tokio::test]
async fn test_missing_recipient_fails_only_that_channel() {
    let h = Harness::new();
    h.add_user(notification_service::User::new("erin").with_email("erin@example.com"));

    let outcome = h
        .service
        .dispatch_at(booking_accepted("erin"), test_instant(2025, 4, 2, 12, 0))
        .await
        .unwrap();

    let push = outcome
        .channel_results()
        .iter()
        .find(|r| r.channel == Channel::Push)
        .unwrap();
    assert_eq!(push.error.as_deref(), Some("no recipient available"));
    assert_eq!(h.push.calls(), 0);
    assert_eq!(h.email.calls(), 1);
}

#[tokio::test]
async fn test_push_disabled_is_never_selected() {
    let h = Harness::new();
    h.add_user(reachable_user("frank"));
    let mut prefs = h.service.get_preferences("frank").await.unwrap();
    prefs.push_enabled = false;
    h.service.update_preferences(prefs).await.unwrap();

    let base = test_instant(2025, 4, 2, 9, 0);
    for (i, t) in NotificationType::ALL.into_iter().enumerate() {
        if t == NotificationType::Promotion {
            continue;
        }
        let outcome = h
            .service
            .dispatch_at(
                DispatchRequest::new("frank", t, "t", "m").with_priority(Priority::Critical),
                // 错开到不同小时，避开频控
                base + Duration::hours(2 * i as i64),
            )
            .await
            .unwrap();
        assert!(
            outcome.channel_results().iter().all(|r| r.channel != Channel::Push),
            "{t} selected push"
        );
    }
    assert_eq!(h.push.calls(), 0);
}

#[tokio::test]
async fn test_opt_out_takes_effect_on_next_dispatch() {
    let h = Harness::new();
    h.add_user(reachable_user("gina"));
    let now = test_instant(2025, 4, 2, 12, 0);

    h.service
        .dispatch_at(booking_accepted("gina"), now)
        .await
        .unwrap();
    assert_eq!(h.email.calls(), 1);

    let mut prefs = h.service.get_preferences("gina").await.unwrap();
    prefs.categories.booking_updates.email = false;
    h.service.update_preferences(prefs).await.unwrap();

    let outcome = h
        .service
        .dispatch_at(booking_accepted("gina"), now + Duration::minutes(1))
        .await
        .unwrap();
    assert!(outcome.channel_results().iter().all(|r| r.channel != Channel::Email));
    assert_eq!(h.email.calls(), 1);
}

#[tokio::test]
async fn test_no_channels_available_keeps_in_app_record() {
    let h = Harness::new();
    h.add_user(reachable_user("hank"));
    let mut prefs = h.service.get_preferences("hank").await.unwrap();
    for channel in Channel::ALL {
        prefs.set_channel_enabled(channel, false);
    }
    h.service.update_preferences(prefs).await.unwrap();

    let outcome = h
        .service
        .dispatch_at(booking_accepted("hank"), test_instant(2025, 4, 2, 12, 0))
        .await
        .unwrap();

    let DispatchOutcome::NoChannelsAvailable { notification_id } = outcome else {
        panic!("expected no channels, got {outcome:?}");
    };
    assert_eq!(h.store.notifications_for("hank").len(), 1);
    assert!(h.service.delivery_logs(notification_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rate_limit_three_per_rolling_hour() {
    let h = Harness::new();
    h.add_user(reachable_user("ivan"));
    let start = test_instant(2025, 4, 2, 10, 0);

    for i in 0..3 {
        let outcome = h
            .service
            .dispatch_at(booking_accepted("ivan"), start + Duration::minutes(i * 10))
            .await
            .unwrap();
        assert!(matches!(outcome, DispatchOutcome::Dispatched { .. }));
    }

    let fourth = h
        .service
        .dispatch_at(booking_accepted("ivan"), start + Duration::minutes(50))
        .await
        .unwrap();
    assert_eq!(fourth, DispatchOutcome::RateLimited);
    assert_eq!(h.store.notifications_for("ivan").len(), 3);

    // 最早一次超过一小时后释放额度
    let later = h
        .service
        .dispatch_at(
            booking_accepted("ivan"),
            start + Duration::hours(1) + Duration::seconds(1),
        )
        .await
        .unwrap();
    assert!(matches!(later, DispatchOutcome::Dispatched { .. }));
}

#[tokio::test]
async fn test_rate_limited_dispatch_performs_no_sends() {
    let h = Harness::rate_limited();
    h.add_user(reachable_user("judy"));

    let outcome = h
        .service
        .dispatch_at(booking_accepted("judy"), test_instant(2025, 4, 2, 12, 0))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::RateLimited);
    assert_eq!(h.push.calls() + h.email.calls() + h.sms.calls(), 0);
    assert!(h.store.notifications_for("judy").is_empty());
    assert_eq!(h.store.log_count(), 0);
}

#[tokio::test]
async fn test_sms_only_for_codes() {
    let h = Harness::new();
    h.add_user(reachable_user("kate"));
    let mut prefs = h.service.get_preferences("kate").await.unwrap();
    prefs.sms_enabled = true;
    h.service.update_preferences(prefs).await.unwrap();

    let code = h
        .service
        .dispatch_at(
            DispatchRequest::new("kate", NotificationType::PickupCode, "Pickup code", "Code {{code}}")
                .with_data_map(TestDataGenerator::pickup_data("7731")),
            test_instant(2025, 4, 2, 12, 0),
        )
        .await
        .unwrap();
    assert!(code.channel_results().iter().any(|r| r.channel == Channel::Sms));
    assert_eq!(h.sms.calls(), 1);

    let payment = h
        .service
        .dispatch_at(
            DispatchRequest::new("kate", NotificationType::PaymentReceived, "Paid", "Thanks")
                .with_data_map(TestDataGenerator::payment_data("19.90", "EUR")),
            test_instant(2025, 4, 2, 12, 5),
        )
        .await
        .unwrap();
    assert!(payment.channel_results().iter().all(|r| r.channel != Channel::Sms));
}

#[tokio::test]
async fn test_provider_callback_advances_sent_entry() {
    let h = Harness::new();
    h.add_user(reachable_user("liam"));
    let outcome = h
        .service
        .dispatch_at(booking_accepted("liam"), test_instant(2025, 4, 2, 12, 0))
        .await
        .unwrap();

    let email = outcome
        .channel_results()
        .iter()
        .find(|r| r.channel == Channel::Email)
        .unwrap();
    let message_id = email.provider_message_id.clone().unwrap();

    let delivered = h
        .service
        .record_provider_callback(&message_id, DeliveryStatus::Delivered)
        .await
        .unwrap();
    assert_eq!(delivered.status, DeliveryStatus::Delivered);

    let opened = h
        .service
        .record_provider_callback(&message_id, DeliveryStatus::Opened)
        .await
        .unwrap();
    assert_eq!(opened.status, DeliveryStatus::Opened);

    // 回执不能让状态倒退
    assert!(
        h.service
            .record_provider_callback(&message_id, DeliveryStatus::Delivered)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_missing_template_fails_only_that_channel() {
    let h = Harness::without_template_fallback();
    h.add_user(reachable_user("olga"));
    for channel in [Channel::InApp, Channel::Push] {
        h.store
            .upsert(
                &Template::new(NotificationType::BookingAccepted, channel, "en")
                    .with_field("title", "Booking accepted")
                    .with_field("body", "{{item_name}} is booked"),
            )
            .await
            .unwrap();
    }

    let now = test_instant(2025, 4, 2, 12, 0);
    let outcome = h
        .service
        .dispatch_at(booking_accepted("olga"), now)
        .await
        .unwrap();

    let DispatchOutcome::Dispatched {
        notification_id,
        channels,
    } = outcome
    else {
        panic!("expected dispatched outcome, got {outcome:?}");
    };
    let status = |c: Channel| channels.iter().find(|r| r.channel == c).unwrap().status;
    assert_eq!(status(Channel::InApp), DeliveryStatus::Sent);
    assert_eq!(status(Channel::Push), DeliveryStatus::Sent);
    assert_eq!(status(Channel::Email), DeliveryStatus::Failed);

    let expected = NotificationError::TemplateMissing {
        notification_type: "booking_accepted".into(),
        channel: Channel::Email,
        language: "en".into(),
    }
    .to_string();
    let email = channels.iter().find(|r| r.channel == Channel::Email).unwrap();
    assert_eq!(email.error.as_deref(), Some(expected.as_str()));

    // 模板缺失发生在调用适配器之前
    assert_eq!(h.email.calls(), 0);
    assert_eq!(h.push.calls(), 1);

    let logs = h.service.delivery_logs(notification_id).await.unwrap();
    let email_log = logs.iter().find(|l| l.channel == Channel::Email).unwrap();
    assert_eq!(email_log.status, DeliveryStatus::Failed);
    assert_eq!(email_log.error_message.as_deref(), Some(expected.as_str()));
    assert_eq!(h.store.notifications_for("olga").len(), 1);
}
