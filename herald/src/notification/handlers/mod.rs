//! Inbound event handlers.
//!
//! Each source topic decodes into one [`InboundEvent`] variant. The
//! [`Dispatcher`] routes a variant to its handler, which decides what to send
//! on which channel and runs the sends concurrently. Handlers live in one
//! `impl Dispatcher` block per file.

mod achievements;
mod broadcasts;
mod community;
mod daily_bonus;
mod day_off;
pub mod events;
mod projections;

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::analytics::AnalyticsSink;
use super::ping::UserPing;
use super::postponement::PostponementReplayer;
use super::providers::{AssetUrls, InAppId, InAppParcel, PushNotification};
use super::resolver::{PushNotificationTokens, RecipientResolver};
use super::senders::{ChannelSenders, InAppRequest, PushRequest};
use super::templates::TemplateStore;
use crate::config::HeraldConfig;
use crate::database::models::{SentNotification, SentNotificationKey};
use crate::database::repositories::UserRepository;
use crate::ingest::SourceTopic;
use crate::{Error, Result};

pub use events::*;

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    User(UserSnapshot),
    DeviceMetadata(DeviceMetadataSnapshot),
    Contact(ContactEvent),
    Adoption(AdoptionSnapshot),
    News(NewsArticle),
    DailyBonus(ExtraBonusSummary),
    Ping(UserPing),
    DayOff(DayOffStarted),
    Badge(AchievedBadge),
    Level(CompletedLevel),
    Role(EnabledRole),
}

impl InboundEvent {
    /// Decode the payload of a `topic` message. Empty payloads are tombstones.
    pub fn decode(topic: SourceTopic, value: &[u8]) -> Result<Option<Self>> {
        if value.is_empty() {
            return Ok(None);
        }
        let event = match topic {
            SourceTopic::UsersTable => Self::User(serde_json::from_slice(value)?),
            SourceTopic::DeviceMetadataTable => {
                Self::DeviceMetadata(serde_json::from_slice(value)?)
            }
            SourceTopic::ContactsTable => Self::Contact(serde_json::from_slice(value)?),
            SourceTopic::AdoptionTable => Self::Adoption(serde_json::from_slice(value)?),
            SourceTopic::NewsTable => Self::News(serde_json::from_slice(value)?),
            SourceTopic::AvailableDailyBonuses => Self::DailyBonus(serde_json::from_slice(value)?),
            SourceTopic::UserPings => Self::Ping(serde_json::from_slice(value)?),
            SourceTopic::StartedDaysOff => Self::DayOff(serde_json::from_slice(value)?),
            SourceTopic::AchievedBadges => Self::Badge(serde_json::from_slice(value)?),
            SourceTopic::CompletedLevels => Self::Level(serde_json::from_slice(value)?),
            SourceTopic::EnabledRoles => Self::Role(serde_json::from_slice(value)?),
        };
        Ok(Some(event))
    }
}

/// Routes inbound events to their handlers.
pub struct Dispatcher {
    config: Arc<HeraldConfig>,
    assets: AssetUrls,
    templates: Arc<TemplateStore>,
    users: Arc<dyn UserRepository>,
    resolver: Arc<RecipientResolver>,
    senders: Arc<ChannelSenders>,
    analytics: Arc<dyn AnalyticsSink>,
    replayer: Arc<PostponementReplayer>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<HeraldConfig>,
        templates: Arc<TemplateStore>,
        users: Arc<dyn UserRepository>,
        resolver: Arc<RecipientResolver>,
        senders: Arc<ChannelSenders>,
        analytics: Arc<dyn AnalyticsSink>,
        replayer: Arc<PostponementReplayer>,
    ) -> Self {
        Self {
            assets: AssetUrls::new(&config.assets_base_url),
            config,
            templates,
            users,
            resolver,
            senders,
            analytics,
            replayer,
        }
    }

    /// Run the handler of `event`.
    ///
    /// Deliveries no channel supports are logged and do not fail the event.
    pub async fn dispatch(&self, cancel: &CancellationToken, event: InboundEvent) -> Result<()> {
        super::ensure_active(cancel, "dispatch event")?;
        let result = match event {
            InboundEvent::User(snapshot) => self.on_user_snapshot(cancel, snapshot).await,
            InboundEvent::DeviceMetadata(snapshot) => {
                self.on_device_metadata(cancel, snapshot).await
            }
            InboundEvent::Contact(contact) => self.on_contact(contact).await,
            InboundEvent::Adoption(snapshot) => self.on_adoption_changed(cancel, snapshot).await,
            InboundEvent::News(article) => self.on_news_added(cancel, article).await,
            InboundEvent::DailyBonus(summary) => self.on_daily_bonus(cancel, summary).await,
            InboundEvent::Ping(ping) => self.on_ping(cancel, ping).await,
            InboundEvent::DayOff(day_off) => self.on_day_off(cancel, day_off).await,
            InboundEvent::Badge(badge) => self.on_badge_unlocked(cancel, badge).await,
            InboundEvent::Level(level) => self.on_level_changed(cancel, level).await,
            InboundEvent::Role(role) => self.on_role_changed(cancel, role).await,
        };
        let Err(err) = result else {
            return Ok(());
        };
        for cause in err.causes() {
            if let Error::Unsupported(reason) = cause {
                warn!(reason = %reason, "Skipping unsupported delivery");
            }
        }
        err.without_unsupported().map_or(Ok(()), Err)
    }

    fn deeplink(&self, path: &str) -> String {
        format!("{}://{}", self.config.deeplink_scheme, path)
    }

    /// Send pushes and in-app notifications concurrently, keeping every failure.
    async fn deliver(
        &self,
        cancel: &CancellationToken,
        pushes: Vec<PushRequest>,
        inapps: Vec<InAppRequest>,
    ) -> Result<()> {
        let push = async {
            fanout::run_concurrently(cancel, pushes, |request| {
                self.senders.send_push(cancel, request)
            })
            .await
            .map_err(Error::from)
        };
        let inapp = async {
            fanout::run_concurrently(cancel, inapps, |request| {
                self.senders.send_inapp(cancel, request)
            })
            .await
            .map_err(Error::from)
        };
        fanout::execute_concurrently(cancel, vec![push.boxed(), inapp.boxed()]).await?;
        Ok(())
    }

    /// Fallback when push is unavailable: the in-app notification plus any
    /// side effects, reported together with the resolution failure.
    async fn without_push(
        &self,
        cancel: &CancellationToken,
        resolution_error: Option<Error>,
        inapp: InAppRequest,
        side_effects: Vec<BoxFuture<'_, Result<()>>>,
    ) -> Result<()> {
        let mut results = vec![resolution_error.map_or(Ok(()), Err)];
        results.push(self.senders.send_inapp(cancel, inapp).await);
        results.push(
            fanout::execute_concurrently(cancel, side_effects)
                .await
                .map_err(Error::from),
        );
        Error::combine_results(results)
    }
}

/// Rendered push content shared by every target of one notification.
#[derive(Debug, Clone)]
struct PushContent {
    title: String,
    body: String,
    deeplink: String,
    image_url: String,
}

impl PushContent {
    fn notification<T>(&self, target: T) -> PushNotification<T> {
        PushNotification {
            data: [("deeplink".to_string(), self.deeplink.clone())].into(),
            target,
            title: self.title.clone(),
            body: self.body.clone(),
            image_url: self.image_url.clone(),
        }
    }

    /// One request per device, each recorded under its token.
    fn personal(
        &self,
        tokens: &PushNotificationTokens,
        key: &SentNotificationKey,
    ) -> Vec<PushRequest> {
        tokens
            .tokens
            .iter()
            .map(|token| PushRequest {
                notification: self.notification(token.clone()),
                record: SentNotification::new(
                    key.clone().with_value(token.as_str()),
                    &tokens.language,
                ),
                postpone: tokens.postpone,
            })
            .collect()
    }
}

fn parcel(action: &str, actor: InAppId, subject: InAppId, data: Map<String, Value>) -> InAppParcel {
    InAppParcel {
        time: chrono::Utc::now(),
        reference_id: None,
        data,
        action: action.to_string(),
        actor,
        subject,
    }
}

fn fields<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

fn media(deeplink: &str, image_url: &str) -> Map<String, Value> {
    fields([
        ("deeplink", deeplink.into()),
        ("imageUrl", image_url.into()),
    ])
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory wiring for handler tests.

    use std::sync::Arc;
    use std::time::Duration;

    use super::Dispatcher;
    use crate::config::HeraldConfig;
    use crate::database::repositories::SqlxUserRepository;
    use crate::database::{DbPool, init_pool_with_size, run_migrations};
    use crate::notification::analytics::MockAnalyticsSink;
    use crate::notification::postponement::PostponementReplayer;
    use crate::notification::providers::{MockEmailProvider, MockInAppFeed, MockPushProvider};
    use crate::notification::resolver::RecipientResolver;
    use crate::notification::senders::ChannelSenders;
    use crate::notification::templates::TemplateStore;

    pub async fn pool() -> DbPool {
        let pool = init_pool_with_size("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    pub fn config() -> HeraldConfig {
        HeraldConfig {
            assets_base_url: "https://cdn.example.com".into(),
            inapp_enabled: true,
            ..HeraldConfig::default()
        }
    }

    pub struct Mocks {
        pub push: MockPushProvider,
        pub email: MockEmailProvider,
        pub inapp: MockInAppFeed,
        pub analytics: MockAnalyticsSink,
    }

    impl Mocks {
        pub fn new() -> Self {
            Self {
                push: MockPushProvider::new(),
                email: MockEmailProvider::new(),
                inapp: MockInAppFeed::new(),
                analytics: MockAnalyticsSink::new(),
            }
        }
    }

    pub fn dispatcher(
        pool: &DbPool,
        config: HeraldConfig,
        templates: TemplateStore,
        mocks: Mocks,
    ) -> Dispatcher {
        let users = Arc::new(SqlxUserRepository::new(pool.clone()));
        let feed = Arc::new(mocks.inapp);
        let senders = Arc::new(
            ChannelSenders::new(
                pool.clone(),
                users.clone(),
                Arc::new(mocks.push),
                Duration::from_secs(5),
            )
            .with_email(Arc::new(mocks.email))
            .with_inapp(feed.clone(), feed),
        );
        let resolver = Arc::new(RecipientResolver::new(users.clone()));
        let replayer = Arc::new(PostponementReplayer::new(
            pool.clone(),
            resolver.clone(),
            senders.clone(),
        ));
        Dispatcher::new(
            Arc::new(config),
            Arc::new(templates),
            users,
            resolver,
            senders,
            Arc::new(mocks.analytics),
            replayer,
        )
    }
}
