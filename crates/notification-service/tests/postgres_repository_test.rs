//! PostgreSQL 仓储集成测试
//!
//! 需要可用的数据库，默认忽略：
//! `TEST_DATABASE_URL=postgres://... cargo test -p notification-service -- --ignored`

use std::path::Path;

use chrono::{Duration, NaiveTime};
use notification_service::{
    Channel, DeliveryLogEntry, DeliveryStatus, DeliveryTransition, NewQueueItem, Notification,
    NotificationError, NotificationPreference, NotificationType, Priority, QueuePayload,
    QueueStatus, Repositories, Template,
};
use notify_shared::database::Database;
use notify_shared::test_utils::{test_database_config, test_instant, test_user_id};
use uuid::Uuid;

async fn repositories() -> Repositories {
    let db = Database::connect(&test_database_config())
        .await
        .expect("test database should be reachable");
    let migrations = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
    db.run_migrations(&migrations).await.expect("migrations should apply");
    Repositories::postgres(db.pool().clone())
}

fn notification(user_id: &str) -> Notification {
    Notification {
        id: Uuid::now_v7(),
        user_id: user_id.to_string(),
        notification_type: NotificationType::BookingAccepted,
        title: "Booking accepted".into(),
        message: "See you soon".into(),
        data: Default::default(),
        priority: Priority::Normal,
        created_at: test_instant(2025, 4, 2, 12, 0),
        read_at: None,
        expires_at: None,
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_preference_insert_if_absent_keeps_first_row() {
    let repos = repositories().await;
    let user_id = test_user_id();
    let now = test_instant(2025, 4, 2, 12, 0);

    let first = NotificationPreference::defaults_for(&user_id, None, now);
    let stored = repos.preferences.insert_if_absent(&first).await.unwrap();
    assert_eq!(stored, first);

    let mut second = first.clone();
    second.push_enabled = false;
    let existing = repos.preferences.insert_if_absent(&second).await.unwrap();
    assert!(existing.push_enabled);

    let mut updated = existing.clone().with_quiet_hours(
        NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
    );
    updated.categories.marketing.email = false;
    repos.preferences.update(&updated).await.unwrap();

    let reloaded = repos.preferences.get(&user_id).await.unwrap().unwrap();
    assert!(reloaded.quiet_hours_enabled);
    assert_eq!(reloaded.quiet_hours_end, NaiveTime::from_hms_opt(6, 30, 0).unwrap());
    assert!(!reloaded.categories.marketing.email);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_template_upsert_and_find() {
    let repos = repositories().await;
    let language = format!("x-{}", &Uuid::new_v4().simple().to_string()[..8]);

    let template = Template::new(NotificationType::PaymentFailed, Channel::Email, &language)
        .with_field("subject", "Payment failed")
        .with_field("content", "{{amount}} {{currency}} could not be charged");
    repos.templates.upsert(&template).await.unwrap();
    repos
        .templates
        .upsert(&template.clone().with_field("subject", "Payment declined"))
        .await
        .unwrap();

    let found = repos
        .templates
        .find(NotificationType::PaymentFailed, Channel::Email, &language)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.fields.get("subject").map(String::as_str), Some("Payment declined"));
    assert!(
        repos
            .templates
            .find(NotificationType::PaymentFailed, Channel::Push, &language)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_delivery_log_transition_is_compare_and_set() {
    let repos = repositories().await;
    let n = notification(&test_user_id());
    repos.notifications.create(&n).await.unwrap();

    let now = test_instant(2025, 4, 2, 12, 0);
    let entry = DeliveryLogEntry::pending(n.id, Channel::Push, now);
    repos.delivery_logs.create(&entry).await.unwrap();

    let processing = repos
        .delivery_logs
        .transition(
            entry.id,
            DeliveryStatus::Pending,
            &DeliveryTransition::to(DeliveryStatus::Processing, now)
                .with_recipient(Some("token".into())),
        )
        .await
        .unwrap();
    assert_eq!(processing.attempts, 1);
    assert_eq!(processing.recipient.as_deref(), Some("token"));

    // 旧状态已过期，第二次流转失败
    let stale = repos
        .delivery_logs
        .transition(
            entry.id,
            DeliveryStatus::Pending,
            &DeliveryTransition::to(DeliveryStatus::Processing, now),
        )
        .await;
    assert!(matches!(stale, Err(NotificationError::ConcurrencyConflict)));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_queue_claim_skips_future_and_claimed_items() {
    let repos = repositories().await;
    let user_id = test_user_id();
    let now = test_instant(2025, 4, 2, 12, 0);

    let due = NewQueueItem::new(
        &user_id,
        NotificationType::TripReminder,
        Channel::Push,
        QueuePayload::default(),
        now - Duration::minutes(1),
    )
    .into_item(3, now);
    let future = NewQueueItem::new(
        &user_id,
        NotificationType::TripReminder,
        Channel::Push,
        QueuePayload::default(),
        now + Duration::hours(1),
    )
    .into_item(3, now);
    repos.queue.enqueue(&due).await.unwrap();
    repos.queue.enqueue(&future).await.unwrap();

    let claimed = repos.queue.claim_due(now, 1000).await.unwrap();
    assert!(claimed.iter().any(|i| i.id == due.id));
    assert!(claimed.iter().all(|i| i.id != future.id));
    let stored = repos.queue.get(due.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Processing);

    let again = repos.queue.claim_due(now, 1000).await.unwrap();
    assert!(again.iter().all(|i| i.id != due.id));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_stale_processing_item_is_reclaimed() {
    let repos = repositories().await;
    let now = test_instant(2025, 4, 2, 12, 0);

    let item = NewQueueItem::new(
        &test_user_id(),
        NotificationType::TripReminder,
        Channel::Push,
        QueuePayload::default(),
        now - Duration::minutes(30),
    )
    .into_item(3, now);
    repos.queue.enqueue(&item).await.unwrap();
    let claimed = repos.queue.claim_due(now - Duration::minutes(20), 1000).await.unwrap();
    assert!(claimed.iter().any(|i| i.id == item.id));

    repos
        .queue
        .reclaim_stale(now - Duration::minutes(10), now)
        .await
        .unwrap();
    let stored = repos.queue.get(item.id).await.unwrap().unwrap();
    assert_eq!(stored.status, QueueStatus::Pending);
    assert!(stored.next_attempt_at.is_some());

    let again = repos.queue.claim_due(now, 1000).await.unwrap();
    assert!(again.iter().any(|i| i.id == item.id));
}
