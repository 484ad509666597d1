//! Channel senders.
//!
//! Each send writes its ledger row before calling the provider and removes it
//! again when the provider fails, so a redelivered event can try again. A
//! ledger row that already exists means the notification went out before and
//! the send is a successful no-op.
//!
//! Rows are committed before the provider call and compensated with an
//! explicit delete. No transaction is held open across a provider call, since
//! SQLite would keep its database-wide write lock for the whole round trip.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::providers::{
    DelayedPushNotification, EmailParcel, EmailProvider, InAppFeed, InAppParcel, Participant,
    PushNotification, PushProvider,
};
use super::types::{DeviceToken, SubscriptionTopic};
use crate::database::DbPool;
use crate::database::models::{
    PostponedNotification, SentAnnouncement, SentNotification, SentNotificationKey,
};
use crate::database::repositories::{LedgerOps, PostponedOps, UserRepository};
use crate::{Error, Result};

/// Sender address of every email.
pub const EMAIL_FROM_ADDRESS: &str = "no-reply@ice.io";

/// Push to one device.
#[derive(Debug, Clone)]
pub struct PushRequest {
    pub notification: PushNotification<DeviceToken>,
    pub record: SentNotification,
    /// Store the notification for a later replay instead of sending it.
    pub postpone: bool,
}

/// Push to a topic, optionally delayed by the gateway.
#[derive(Debug, Clone)]
pub struct BroadcastPushRequest {
    pub notification: PushNotification<SubscriptionTopic>,
    pub record: SentAnnouncement,
    pub delay: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct EmailRequest {
    pub subject: String,
    pub html_body: String,
    pub display_name: String,
    /// `notification_channel_value` holds the recipient address.
    pub record: SentNotification,
}

#[derive(Debug, Clone)]
pub struct InAppRequest {
    pub parcel: InAppParcel,
    pub record: SentNotification,
}

#[derive(Debug, Clone)]
pub struct BroadcastInAppRequest {
    pub parcel: InAppParcel,
    /// `notification_channel_value` names the global feed topic.
    pub record: SentAnnouncement,
}

/// Localized sender display name, falling back to English.
pub fn email_display_name(language: &str) -> &'static str {
    match language {
        "de" => "ice Netzwerk",
        "es" => "Red ice",
        "fr" => "Réseau ice",
        "it" => "Rete ice",
        "pt" => "Rede ice",
        _ => "ice Network",
    }
}

/// Per-channel delivery with ledger bookkeeping.
pub struct ChannelSenders {
    pool: DbPool,
    users: Arc<dyn UserRepository>,
    push: Arc<dyn PushProvider>,
    email: Option<Arc<dyn EmailProvider>>,
    personal_feed: Option<Arc<dyn InAppFeed>>,
    global_feed: Option<Arc<dyn InAppFeed>>,
    provider_timeout: Duration,
}

impl ChannelSenders {
    pub fn new(
        pool: DbPool,
        users: Arc<dyn UserRepository>,
        push: Arc<dyn PushProvider>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            users,
            push,
            email: None,
            personal_feed: None,
            global_feed: None,
            provider_timeout,
        }
    }

    /// Enable email delivery.
    pub fn with_email(mut self, email: Arc<dyn EmailProvider>) -> Self {
        self.email = Some(email);
        self
    }

    /// Enable in-app delivery through a personal and a global feed.
    pub fn with_inapp(mut self, personal: Arc<dyn InAppFeed>, global: Arc<dyn InAppFeed>) -> Self {
        self.personal_feed = Some(personal);
        self.global_feed = Some(global);
        self
    }

    pub fn email_enabled(&self) -> bool {
        self.email.is_some()
    }

    pub fn personal_feed(&self) -> Option<&Arc<dyn InAppFeed>> {
        self.personal_feed.as_ref()
    }

    pub async fn send_push(&self, cancel: &CancellationToken, request: PushRequest) -> Result<()> {
        super::ensure_active(cancel, "send push notification")?;
        if request.postpone {
            return self.postpone(&request).await;
        }
        if !self.record_notification(&request.record).await? {
            return Ok(());
        }

        let sent = self
            .bounded(cancel, "push send", self.push.send(&request.notification))
            .await;
        let Err(err) = sent else {
            return Ok(());
        };

        let key = &request.record.key;
        warn!(
            user_id = %key.user_id,
            notification_type = %key.notification_type,
            channel = "push",
            target = %request.notification.target,
            error = %err,
            "Push notification failed"
        );
        let mut followups = Vec::new();
        if err.is_invalid_target()
            && let Err(e) = self
                .users
                .clear_push_token(&key.user_id, request.notification.target.as_str())
                .await
        {
            followups.push(e);
        }
        if let Err(e) = LedgerOps::delete_notification(&self.pool, key).await {
            followups.push(e);
        }
        Err(err.with_followups(followups))
    }

    pub async fn broadcast_push(
        &self,
        cancel: &CancellationToken,
        request: BroadcastPushRequest,
    ) -> Result<()> {
        super::ensure_active(cancel, "broadcast push notification")?;
        if !self.record_announcement(&request.record).await? {
            return Ok(());
        }

        let sent = match request.delay {
            None => {
                self.bounded(
                    cancel,
                    "push broadcast",
                    self.push.broadcast(&request.notification),
                )
                .await
            }
            Some(delay) => {
                let delayed = DelayedPushNotification {
                    notification: request.notification.clone(),
                    delay_secs: delay.as_secs(),
                };
                self.bounded(
                    cancel,
                    "delayed push broadcast",
                    self.push.broadcast_delayed(&delayed),
                )
                .await
            }
        };
        let Err(err) = sent else {
            return Ok(());
        };

        warn!(
            notification_type = %request.record.key.notification_type,
            channel = "push",
            target = %request.notification.target,
            error = %err,
            "Push broadcast failed"
        );
        let followups = LedgerOps::delete_announcement(&self.pool, &request.record.key)
            .await
            .err();
        Err(err.with_followups(followups))
    }

    pub async fn send_email(
        &self,
        cancel: &CancellationToken,
        request: EmailRequest,
    ) -> Result<()> {
        super::ensure_active(cancel, "send email notification")?;
        let Some(email) = &self.email else {
            debug!(user_id = %request.record.key.user_id, "Email delivery disabled");
            return Ok(());
        };
        if !self.record_notification(&request.record).await? {
            return Ok(());
        }

        let parcel = EmailParcel {
            from: Participant {
                name: email_display_name(&request.record.language).to_string(),
                email: EMAIL_FROM_ADDRESS.to_string(),
            },
            subject: request.subject,
            body: super::providers::EmailBody::html(request.html_body),
        };
        let recipient = Participant {
            name: request.display_name,
            email: request.record.key.notification_channel_value.clone(),
        };

        let sent = self
            .bounded(cancel, "email send", email.send(&parcel, &recipient))
            .await;
        let Err(err) = sent else {
            return Ok(());
        };

        let key = &request.record.key;
        warn!(
            user_id = %key.user_id,
            notification_type = %key.notification_type,
            channel = "email",
            error = %err,
            "Email notification failed"
        );
        Err(self.forget_notification(key, err).await)
    }

    pub async fn send_inapp(
        &self,
        cancel: &CancellationToken,
        request: InAppRequest,
    ) -> Result<()> {
        super::ensure_active(cancel, "send in-app notification")?;
        let Some(feed) = &self.personal_feed else {
            debug!(user_id = %request.record.key.user_id, "In-app delivery disabled");
            return Ok(());
        };
        if !self.record_notification(&request.record).await? {
            return Ok(());
        }

        let key = &request.record.key;
        let sent = self
            .bounded(
                cancel,
                "in-app send",
                feed.send(&request.parcel, key.user_id.as_str()),
            )
            .await;
        let Err(err) = sent else {
            return Ok(());
        };

        warn!(
            user_id = %key.user_id,
            notification_type = %key.notification_type,
            channel = "inapp",
            error = %err,
            "In-app notification failed"
        );
        Err(self.forget_notification(key, err).await)
    }

    pub async fn broadcast_inapp(
        &self,
        cancel: &CancellationToken,
        request: BroadcastInAppRequest,
    ) -> Result<()> {
        super::ensure_active(cancel, "broadcast in-app notification")?;
        let Some(feed) = &self.global_feed else {
            debug!(
                notification_type = %request.record.key.notification_type,
                "In-app delivery disabled"
            );
            return Ok(());
        };
        if !self.record_announcement(&request.record).await? {
            return Ok(());
        }

        let topic = request.record.key.notification_channel_value.as_str();
        let sent = self
            .bounded(
                cancel,
                "in-app broadcast",
                feed.send(&request.parcel, topic),
            )
            .await;
        let Err(err) = sent else {
            return Ok(());
        };

        warn!(
            notification_type = %request.record.key.notification_type,
            channel = "inapp",
            target = %topic,
            error = %err,
            "In-app broadcast failed"
        );
        let followups = LedgerOps::delete_announcement(&self.pool, &request.record.key)
            .await
            .err();
        Err(err.with_followups(followups))
    }

    async fn postpone(&self, request: &PushRequest) -> Result<()> {
        let payload = serde_json::to_string(&request.notification)?;
        let row = PostponedNotification::new(
            request.record.key.clone(),
            request.record.language.clone(),
            payload,
        );
        if PostponedOps::insert(&self.pool, &row).await? {
            debug!(
                user_id = %row.key.user_id,
                notification_type = %row.key.notification_type,
                uniqueness = %row.key.uniqueness,
                "Push notification postponed"
            );
        }
        Ok(())
    }

    /// Write the ledger row. `false` means it was already there.
    async fn record_notification(&self, record: &SentNotification) -> Result<bool> {
        match LedgerOps::insert_notification(&self.pool, record).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_duplicate() => {
                debug!(key = ?record.key, "Notification already sent");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn record_announcement(&self, record: &SentAnnouncement) -> Result<bool> {
        match LedgerOps::insert_announcement(&self.pool, record).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_duplicate() => {
                debug!(key = ?record.key, "Announcement already sent");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the ledger row of a failed send so a redelivery tries again.
    async fn forget_notification(&self, key: &SentNotificationKey, err: Error) -> Error {
        let followups = LedgerOps::delete_notification(&self.pool, key).await.err();
        err.with_followups(followups)
    }

    /// Await a provider call, bounded by the provider timeout and `cancel`.
    async fn bounded<F>(&self, cancel: &CancellationToken, operation: &str, call: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::deadline(format!("{operation} cancelled"))),
            result = tokio::time::timeout(self.provider_timeout, call) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::deadline(format!(
                    "{operation} timed out after {:?}",
                    self.provider_timeout
                ))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{SentAnnouncementKey, SentNotificationKey};
    use crate::database::repositories::SqlxUserRepository;
    use crate::database::{init_pool_with_size, run_migrations};
    use crate::notification::providers::{
        InAppId, MockEmailProvider, MockInAppFeed, MockPushProvider,
    };
    use crate::notification::types::{
        InAppNotificationsUserAuthToken, NotificationChannel, NotificationType,
    };
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::time::Instant;

    async fn setup_pool() -> DbPool {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    fn push_request(token: &str) -> PushRequest {
        PushRequest {
            notification: PushNotification {
                data: BTreeMap::new(),
                target: DeviceToken::from(token),
                title: "t".into(),
                body: "b".into(),
                image_url: String::new(),
            },
            record: SentNotification::new(
                SentNotificationKey::new(
                    "u1",
                    "7",
                    NotificationType::DailyBonus,
                    NotificationChannel::Push,
                )
                .with_value(token),
                "en",
            ),
            postpone: false,
        }
    }

    fn inapp_request() -> InAppRequest {
        InAppRequest {
            parcel: InAppParcel {
                time: chrono::Utc::now(),
                reference_id: None,
                data: serde_json::Map::new(),
                action: "daily_bonus_became_available".into(),
                actor: InAppId::system(),
                subject: InAppId::new("dailyBonus", "7"),
            },
            record: SentNotification::new(
                SentNotificationKey::new(
                    "u1",
                    "7",
                    NotificationType::DailyBonus,
                    NotificationChannel::InApp,
                ),
                "en",
            ),
        }
    }

    fn email_request() -> EmailRequest {
        EmailRequest {
            subject: "Your daily bonus".into(),
            html_body: "<p>Claim it</p>".into(),
            display_name: "Alice".into(),
            record: SentNotification::new(
                SentNotificationKey::new(
                    "u1",
                    "7",
                    NotificationType::DailyBonus,
                    NotificationChannel::Email,
                )
                .with_value("alice@example.com"),
                "de",
            ),
        }
    }

    fn news_broadcast() -> BroadcastPushRequest {
        BroadcastPushRequest {
            notification: PushNotification {
                data: BTreeMap::new(),
                target: SubscriptionTopic("news_en".into()),
                title: "t".into(),
                body: "b".into(),
                image_url: String::new(),
            },
            record: SentAnnouncement::new(
                SentAnnouncementKey::new(
                    "n1",
                    NotificationType::NewsAdded,
                    NotificationChannel::Push,
                    "news_en",
                ),
                "en",
            ),
            delay: None,
        }
    }

    fn news_inapp_broadcast() -> BroadcastInAppRequest {
        BroadcastInAppRequest {
            parcel: InAppParcel {
                time: chrono::Utc::now(),
                reference_id: None,
                data: serde_json::Map::new(),
                action: "news_added".into(),
                actor: InAppId::system(),
                subject: InAppId::new("news", "n1"),
            },
            record: SentAnnouncement::new(
                SentAnnouncementKey::new(
                    "n1",
                    NotificationType::NewsAdded,
                    NotificationChannel::InApp,
                    "global",
                ),
                "en",
            ),
        }
    }

    fn senders(pool: &DbPool, push: MockPushProvider) -> ChannelSenders {
        ChannelSenders::new(
            pool.clone(),
            Arc::new(SqlxUserRepository::new(pool.clone())),
            Arc::new(push),
            Duration::from_secs(5),
        )
    }

    async fn ledger_rows(pool: &DbPool) -> usize {
        LedgerOps::list_notifications_for_user(pool, "u1")
            .await
            .unwrap()
            .len()
    }

    /// Feed whose sends take a while to be accepted.
    struct SlowFeed(Duration);

    #[async_trait]
    impl InAppFeed for SlowFeed {
        async fn send(&self, _parcel: &InAppParcel, _recipient: &str) -> Result<()> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }

        async fn create_user_token(
            &self,
            _user_id: &str,
        ) -> Result<InAppNotificationsUserAuthToken> {
            Ok(InAppNotificationsUserAuthToken::default())
        }
    }

    #[tokio::test]
    async fn test_push_sends_once_per_key() {
        let pool = setup_pool().await;
        let mut push = MockPushProvider::new();
        push.expect_send().times(1).returning(|_| Ok(()));
        let senders = senders(&pool, push);
        let cancel = CancellationToken::new();

        senders
            .send_push(&cancel, push_request("t1"))
            .await
            .unwrap();
        senders
            .send_push(&cancel, push_request("t1"))
            .await
            .unwrap();

        assert_eq!(ledger_rows(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_push_failure_rolls_back_and_clears_dead_token() {
        let pool = setup_pool().await;
        let users = SqlxUserRepository::new(pool.clone());
        users
            .upsert_device_token("u1", "d1", Some("t1".into()))
            .await
            .unwrap();

        let mut push = MockPushProvider::new();
        push.expect_send()
            .returning(|n| Err(Error::InvalidTarget(n.target.to_string())));
        let senders = senders(&pool, push);

        let err = senders
            .send_push(&CancellationToken::new(), push_request("t1"))
            .await
            .unwrap_err();
        assert!(err.is_invalid_target());
        assert!(
            LedgerOps::find_notification(&pool, &push_request("t1").record.key)
                .await
                .unwrap()
                .is_none()
        );
        assert!(users.push_tokens("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_postponed_push_skips_provider() {
        let pool = setup_pool().await;
        let mut push = MockPushProvider::new();
        push.expect_send().never();
        let senders = senders(&pool, push);
        let cancel = CancellationToken::new();

        let mut request = push_request("");
        request.postpone = true;
        senders.send_push(&cancel, request.clone()).await.unwrap();
        senders.send_push(&cancel, request).await.unwrap();

        let postponed = PostponedOps::list_for_user(&pool, "u1").await.unwrap();
        assert_eq!(postponed.len(), 1);
        assert_eq!(ledger_rows(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_send_does_no_io() {
        let pool = setup_pool().await;
        let mut push = MockPushProvider::new();
        push.expect_send().never();
        let senders = senders(&pool, push);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = senders
            .send_push(&cancel, push_request("t1"))
            .await
            .unwrap_err();
        assert!(err.is_deadline());
        assert_eq!(ledger_rows(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_email_failure_leaves_no_row_and_redelivery_sends_again() {
        let pool = setup_pool().await;
        let mut email = MockEmailProvider::new();
        let mut seq = mockall::Sequence::new();
        email
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(Error::Provider("smtp down".into())));
        email
            .expect_send()
            .withf(|parcel, recipient| {
                parcel.from.name == "ice Netzwerk"
                    && parcel.from.email == EMAIL_FROM_ADDRESS
                    && recipient.email == "alice@example.com"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        let senders = senders(&pool, MockPushProvider::new()).with_email(Arc::new(email));
        let cancel = CancellationToken::new();

        let err = senders
            .send_email(&cancel, email_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(ledger_rows(&pool).await, 0);

        senders.send_email(&cancel, email_request()).await.unwrap();
        // Redelivered after success: the ledger row short-circuits the provider.
        senders.send_email(&cancel, email_request()).await.unwrap();
        assert_eq!(ledger_rows(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_inapp_failure_leaves_no_row() {
        let pool = setup_pool().await;
        let mut feed = MockInAppFeed::new();
        feed.expect_send()
            .times(1)
            .returning(|_, _| Err(Error::Provider("feed down".into())));
        let senders = senders(&pool, MockPushProvider::new())
            .with_inapp(Arc::new(feed), Arc::new(MockInAppFeed::new()));

        let err = senders
            .send_inapp(&CancellationToken::new(), inapp_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert_eq!(ledger_rows(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_inapp_disabled_is_a_no_op() {
        let pool = setup_pool().await;
        let senders = senders(&pool, MockPushProvider::new());
        senders
            .send_inapp(&CancellationToken::new(), inapp_request())
            .await
            .unwrap();
        assert_eq!(ledger_rows(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_push_failure_deletes_announcement() {
        let pool = setup_pool().await;
        let mut push = MockPushProvider::new();
        let mut seq = mockall::Sequence::new();
        push.expect_broadcast()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(Error::Provider("gateway down".into())));
        push.expect_broadcast()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let senders = senders(&pool, push);
        let cancel = CancellationToken::new();

        let err = senders
            .broadcast_push(&cancel, news_broadcast())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(
            LedgerOps::list_announcements(&pool, "n1")
                .await
                .unwrap()
                .is_empty()
        );

        senders
            .broadcast_push(&cancel, news_broadcast())
            .await
            .unwrap();
        assert_eq!(
            LedgerOps::list_announcements(&pool, "n1")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_broadcast_inapp_failure_deletes_announcement() {
        let pool = setup_pool().await;
        let mut global = MockInAppFeed::new();
        global
            .expect_send()
            .withf(|parcel, topic| topic == "global" && parcel.action == "news_added")
            .times(1)
            .returning(|_, _| Err(Error::Provider("feed down".into())));
        let senders = senders(&pool, MockPushProvider::new())
            .with_inapp(Arc::new(MockInAppFeed::new()), Arc::new(global));

        let err = senders
            .broadcast_inapp(&CancellationToken::new(), news_inapp_broadcast())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
        assert!(
            LedgerOps::list_announcements(&pool, "n1")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_slow_inapp_send_does_not_block_other_users() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("herald.db").display());
        let pool = init_pool_with_size(&url, 4).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let mut push = MockPushProvider::new();
        push.expect_send().times(1).returning(|_| Ok(()));
        let feed = Arc::new(SlowFeed(Duration::from_millis(1500)));
        let senders = Arc::new(senders(&pool, push).with_inapp(feed.clone(), feed));
        let cancel = CancellationToken::new();

        let slow = {
            let senders = senders.clone();
            let cancel = cancel.clone();
            let request = inapp_request();
            tokio::spawn(async move { senders.send_inapp(&cancel, request).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut request = push_request("t2");
        request.record.key.user_id = "u2".into();
        let started = Instant::now();
        senders.send_push(&cancel, request).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));

        slow.await.unwrap().unwrap();
        assert_eq!(ledger_rows(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_delayed_broadcast_uses_delayed_endpoint() {
        let pool = setup_pool().await;
        let mut push = MockPushProvider::new();
        push.expect_broadcast().never();
        push.expect_broadcast_delayed()
            .withf(|d| d.delay_secs == 60 && d.notification.target.as_str() == "system_en_v2")
            .times(1)
            .returning(|_| Ok(()));
        let senders = senders(&pool, push);

        let mut request = news_broadcast();
        request.notification.target = SubscriptionTopic("system_en_v2".into());
        request.record = SentAnnouncement::new(
            SentAnnouncementKey::new(
                "5",
                NotificationType::AdoptionChanged,
                NotificationChannel::Push,
                "system_en_v2",
            ),
            "en",
        );
        request.delay = Some(Duration::from_secs(60));
        senders
            .broadcast_push(&CancellationToken::new(), request)
            .await
            .unwrap();
        assert_eq!(
            LedgerOps::list_announcements(&pool, "5")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_display_name_falls_back_to_english() {
        assert_eq!(email_display_name("de"), "ice Netzwerk");
        assert_eq!(email_display_name("xx"), "ice Network");
    }
}
