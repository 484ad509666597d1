//! Ledger-guarded personal delivery through the public service.

mod common;

use serde_json::json;

use common::{Harness, profile};
use herald::database::repositories::{SqlxUserRepository, UserRepository};
use herald::ingest::SourceTopic;

fn daily_bonus(index: u64) -> serde_json::Value {
    json!({ "userId": "u1", "extraBonusIndex": index })
}

#[tokio::test]
async fn test_redelivered_event_sends_once() {
    let h = Harness::new().await;
    h.user(profile("u1", "alice")).await;
    h.device("u1", "d1", "t1").await;

    for _ in 0..2 {
        h.ingest(SourceTopic::AvailableDailyBonuses, daily_bonus(1))
            .await
            .unwrap();
    }

    assert_eq!(h.push.sent_to("t1").await, 1);
    assert_eq!(h.feed.sent.lock().await.len(), 1);
    assert_eq!(h.sent_via("u1", "daily_bonus", "push").await.len(), 1);
}

#[tokio::test]
async fn test_failed_send_releases_the_ledger_row() {
    let h = Harness::new().await;
    h.user(profile("u1", "alice")).await;
    h.device("u1", "d1", "t1").await;
    h.push.fail("t1").await;

    let err = h
        .ingest(SourceTopic::AvailableDailyBonuses, daily_bonus(2))
        .await
        .unwrap_err();
    assert!(!err.is_duplicate());
    assert!(h.sent_via("u1", "daily_bonus", "push").await.is_empty());

    // Redelivery goes through as if nothing had been sent.
    h.push.recover("t1").await;
    h.ingest(SourceTopic::AvailableDailyBonuses, daily_bonus(2))
        .await
        .unwrap();
    assert_eq!(h.push.sent_to("t1").await, 1);
    let rows = h.sent_via("u1", "daily_bonus", "push").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key.notification_channel_value, "t1");
}

#[tokio::test]
async fn test_one_failing_device_does_not_block_the_others() {
    let h = Harness::new().await;
    h.user(profile("u1", "alice")).await;
    for (device, token) in [("d1", "t1"), ("d2", "t2"), ("d3", "t3")] {
        h.device("u1", device, token).await;
    }
    h.push.fail("t2").await;

    let err = h
        .ingest(SourceTopic::AvailableDailyBonuses, daily_bonus(3))
        .await
        .unwrap_err();
    assert_eq!(err.causes().len(), 1);

    let mut delivered: Vec<String> = h
        .sent_via("u1", "daily_bonus", "push")
        .await
        .into_iter()
        .map(|row| row.key.notification_channel_value)
        .collect();
    delivered.sort();
    assert_eq!(delivered, vec!["t1".to_string(), "t3".to_string()]);
    assert_eq!(h.sent_via("u1", "daily_bonus", "inapp").await.len(), 1);
}

#[tokio::test]
async fn test_dead_token_is_forgotten() {
    let h = Harness::new().await;
    h.user(profile("u1", "alice")).await;
    h.device("u1", "d1", "t1").await;
    h.push.dead.lock().await.insert("t1".into());

    let err = h
        .ingest(SourceTopic::AvailableDailyBonuses, daily_bonus(4))
        .await
        .unwrap_err();
    assert!(err.is_invalid_target());

    let users = SqlxUserRepository::new(h.pool.clone());
    assert!(users.push_tokens("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_level_badge_without_devices_goes_in_app() {
    let h = Harness::new().await;
    h.user(profile("u1", "alice")).await;

    h.ingest(
        SourceTopic::AchievedBadges,
        json!({ "userId": "u1", "type": "b3", "name": "Rookie", "groupType": "level" }),
    )
    .await
    .unwrap();

    let rows = h.sent("u1").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key.uniqueness, "b3");
    assert_eq!(rows[0].key.notification_type, "level_badge_unlocked");
    assert_eq!(rows[0].key.notification_channel, "inapp");
    assert!(h.push.sent.lock().await.is_empty());

    // Out of push reach, the unlock still reaches analytics.
    assert_eq!(h.analytics.attributes.lock().await.len(), 1);
    assert_eq!(h.analytics.actions.lock().await[0].id, "u1_badge_type_b3");
}

#[tokio::test]
async fn test_badge_push_renders_the_badge_name() {
    let h = Harness::new().await;
    h.user(profile("u1", "alice")).await;
    h.device("u1", "d1", "t1").await;

    h.ingest(
        SourceTopic::AchievedBadges,
        json!({ "userId": "u1", "type": "c1", "name": "Saver", "groupType": "coin" }),
    )
    .await
    .unwrap();

    let sent = h.push.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body, "You unlocked the Saver badge.");
    assert_eq!(sent[0].image_url, "https://cdn.example.com/badges/c1.png");
    assert!(h.analytics.actions.lock().await.is_empty());
}

#[tokio::test]
async fn test_email_fallback_for_users_without_devices() {
    let h = Harness::new().await;
    h.user(profile("u1", "alice")).await;

    h.ingest(SourceTopic::AvailableDailyBonuses, daily_bonus(5))
        .await
        .unwrap();

    let emails = h.email.sent.lock().await;
    assert_eq!(emails.len(), 1);
    assert_eq!(emails[0].1.name, "Alice");
    assert_eq!(emails[0].1.email, "alice@example.com");
    assert_eq!(emails[0].0.from.email, "no-reply@ice.io");
    assert_eq!(h.sent_via("u1", "daily_bonus", "email").await.len(), 1);
}
