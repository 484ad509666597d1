//! Recording providers and an in-memory service for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use herald::config::HeraldConfig;
use herald::database::models::SentNotification;
use herald::database::repositories::{LedgerOps, PostponedOps};
use herald::database::{DbPool, init_pool_with_size, run_migrations};
use herald::ingest::SourceTopic;
use herald::notification::NotificationService;
use herald::notification::analytics::{
    AnalyticsSink, EventPublisher, SetUserAttributesCommand, TrackActionCommand,
};
use herald::notification::providers::{
    DelayedPushNotification, EmailParcel, EmailProvider, InAppFeed, InAppParcel, Participant,
    PushNotification, PushProvider,
};
use herald::notification::service::{InAppFeeds, Providers};
use herald::notification::templates::TemplateStore;
use herald::notification::types::InAppNotificationsUserAuthToken;
use herald::notification::{DeviceToken, SubscriptionTopic};
use herald::{Error, Result};

#[derive(Default)]
pub struct RecordingPush {
    pub sent: Mutex<Vec<PushNotification<DeviceToken>>>,
    pub broadcasts: Mutex<Vec<PushNotification<SubscriptionTopic>>>,
    pub delayed: Mutex<Vec<DelayedPushNotification>>,
    /// Tokens whose sends fail with a provider error.
    pub failing: Mutex<HashSet<String>>,
    /// Tokens the provider reports as permanently dead.
    pub dead: Mutex<HashSet<String>>,
    pub calls: AtomicU32,
}

impl RecordingPush {
    pub async fn fail(&self, token: &str) {
        self.failing.lock().await.insert(token.to_string());
    }

    pub async fn recover(&self, token: &str) {
        self.failing.lock().await.remove(token);
    }

    pub async fn sent_to(&self, token: &str) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|n| n.target.as_str() == token)
            .count()
    }
}

#[async_trait]
impl PushProvider for RecordingPush {
    async fn send(&self, notification: &PushNotification<DeviceToken>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let token = notification.target.as_str();
        if self.dead.lock().await.contains(token) {
            return Err(Error::InvalidTarget(token.to_string()));
        }
        if self.failing.lock().await.contains(token) {
            return Err(Error::Provider(format!("push gateway rejected {token}")));
        }
        self.sent.lock().await.push(notification.clone());
        Ok(())
    }

    async fn broadcast(&self, notification: &PushNotification<SubscriptionTopic>) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.broadcasts.lock().await.push(notification.clone());
        Ok(())
    }

    async fn broadcast_delayed(&self, notification: &DelayedPushNotification) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.delayed.lock().await.push(notification.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEmail {
    pub sent: Mutex<Vec<(EmailParcel, Participant)>>,
}

#[async_trait]
impl EmailProvider for RecordingEmail {
    async fn send(&self, parcel: &EmailParcel, recipient: &Participant) -> Result<()> {
        let mut sent = self.sent.lock().await;
        sent.push((parcel.clone(), recipient.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingFeed {
    pub sent: Mutex<Vec<(String, InAppParcel)>>,
}

#[async_trait]
impl InAppFeed for RecordingFeed {
    async fn send(&self, parcel: &InAppParcel, recipient: &str) -> Result<()> {
        let mut sent = self.sent.lock().await;
        sent.push((recipient.to_string(), parcel.clone()));
        Ok(())
    }

    async fn create_user_token(&self, user_id: &str) -> Result<InAppNotificationsUserAuthToken> {
        Ok(InAppNotificationsUserAuthToken {
            app_id: "app".into(),
            app_key: "key".into(),
            user_token: format!("token-{user_id}"),
        })
    }
}

#[derive(Default)]
pub struct RecordingAnalytics {
    pub attributes: Mutex<Vec<SetUserAttributesCommand>>,
    pub actions: Mutex<Vec<TrackActionCommand>>,
}

#[async_trait]
impl AnalyticsSink for RecordingAnalytics {
    async fn set_user_attributes(&self, command: &SetUserAttributesCommand) -> Result<()> {
        self.attributes.lock().await.push(command.clone());
        Ok(())
    }

    async fn track_action(&self, command: &TrackActionCommand) -> Result<()> {
        self.actions.lock().await.push(command.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(String, String, Vec<u8>)>>,
    pub unavailable: AtomicBool,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Provider("event log unavailable".into()));
        }
        self.published
            .lock()
            .await
            .push((topic.to_string(), key.to_string(), value));
        Ok(())
    }
}

pub fn config() -> HeraldConfig {
    HeraldConfig {
        assets_base_url: "https://cdn.example.com".into(),
        inapp_enabled: true,
        email_fallback_enabled: true,
        ..HeraldConfig::default()
    }
}

pub struct Harness {
    pub pool: DbPool,
    pub service: NotificationService,
    pub push: Arc<RecordingPush>,
    pub email: Arc<RecordingEmail>,
    pub feed: Arc<RecordingFeed>,
    pub analytics: Arc<RecordingAnalytics>,
    pub publisher: Arc<RecordingPublisher>,
    pub cancel: CancellationToken,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(config()).await
    }

    pub async fn with_config(config: HeraldConfig) -> Self {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let templates =
            TemplateStore::load(&Path::new(env!("CARGO_MANIFEST_DIR")).join("templates")).unwrap();

        let push = Arc::new(RecordingPush::default());
        let email = Arc::new(RecordingEmail::default());
        let feed = Arc::new(RecordingFeed::default());
        let analytics = Arc::new(RecordingAnalytics::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let service = NotificationService::new(
            pool.clone(),
            Arc::new(config),
            Arc::new(templates),
            Providers {
                push: push.clone(),
                email: Some(email.clone()),
                inapp: Some(InAppFeeds {
                    personal: feed.clone(),
                    global: feed.clone(),
                }),
                analytics: analytics.clone(),
                publisher: publisher.clone(),
            },
        );

        Self {
            pool,
            service,
            push,
            email,
            feed,
            analytics,
            publisher,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn ingest(&self, topic: SourceTopic, value: Value) -> Result<()> {
        let value = serde_json::to_vec(&value).unwrap();
        self.service.ingest_event(&self.cancel, topic, &value).await
    }

    /// Project a user through the users topic.
    pub async fn user(&self, profile: Value) {
        self.ingest(SourceTopic::UsersTable, json!({ "user": profile }))
            .await
            .unwrap();
    }

    pub async fn device(&self, user_id: &str, device_id: &str, token: &str) {
        self.ingest(
            SourceTopic::DeviceMetadataTable,
            json!({
                "deviceMetadata": {
                    "userId": user_id,
                    "deviceUniqueId": device_id,
                    "pushNotificationToken": token,
                }
            }),
        )
        .await
        .unwrap();
    }

    pub async fn sent(&self, user_id: &str) -> Vec<SentNotification> {
        LedgerOps::list_notifications_for_user(&self.pool, user_id)
            .await
            .unwrap()
    }

    pub async fn pending(&self, user_id: &str) -> usize {
        PostponedOps::list_for_user(&self.pool, user_id)
            .await
            .unwrap()
            .len()
    }

    pub async fn sent_via(
        &self,
        user_id: &str,
        notification_type: &str,
        channel: &str,
    ) -> Vec<SentNotification> {
        self.sent(user_id)
            .await
            .into_iter()
            .filter(|row| {
                row.key.notification_type == notification_type
                    && row.key.notification_channel == channel
            })
            .collect()
    }
}

/// A registered user with english settings.
pub fn profile(id: &str, username: &str) -> Value {
    json!({
        "id": id,
        "username": username,
        "email": format!("{username}@example.com"),
        "language": "en",
        "completedRegistrationProcess": true,
    })
}
