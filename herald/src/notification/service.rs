//! Notification service.
//!
//! The NotificationService is the single entry point collaborators use:
//! - ingesting upstream events (projections and notification triggers)
//! - pinging a referral
//! - reading and toggling notification preferences
//! - issuing in-app feed tokens
//! - building the retention sweeper for the bookkeeping tables

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::analytics::{AnalyticsSink, EventPublisher};
use super::handlers::{Dispatcher, InboundEvent};
use super::ping::PingService;
use super::postponement::PostponementReplayer;
use super::providers::{EmailProvider, InAppFeed, PushProvider};
use super::resolver::RecipientResolver;
use super::senders::ChannelSenders;
use super::templates::TemplateStore;
use super::toggles::ToggleManager;
use super::types::{
    InAppNotificationsUserAuthToken, NotificationChannel, NotificationChannelToggle,
    NotificationDomain,
};
use crate::config::HeraldConfig;
use crate::database::DbPool;
use crate::database::maintenance::RetentionSweeper;
use crate::database::repositories::{SqlxUserRepository, UserRepository};
use crate::ingest::SourceTopic;
use crate::{Error, Result};

/// Personal and global in-app feed clients.
#[derive(Clone)]
pub struct InAppFeeds {
    pub personal: Arc<dyn InAppFeed>,
    pub global: Arc<dyn InAppFeed>,
}

/// Outbound collaborators of the service.
#[derive(Clone)]
pub struct Providers {
    pub push: Arc<dyn PushProvider>,
    pub email: Option<Arc<dyn EmailProvider>>,
    pub inapp: Option<InAppFeeds>,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub publisher: Arc<dyn EventPublisher>,
}

pub struct NotificationService {
    pool: DbPool,
    config: Arc<HeraldConfig>,
    dispatcher: Dispatcher,
    replayer: Arc<PostponementReplayer>,
    toggles: ToggleManager,
    pings: PingService,
    personal_feed: Option<Arc<dyn InAppFeed>>,
}

impl NotificationService {
    /// Wire the service over `pool`.
    ///
    /// In-app feeds are only used when `config.inapp_enabled` is set, and the
    /// email provider only when `config.email_fallback_enabled` is set.
    pub fn new(
        pool: DbPool,
        config: Arc<HeraldConfig>,
        templates: Arc<TemplateStore>,
        providers: Providers,
    ) -> Self {
        let users: Arc<dyn UserRepository> = Arc::new(SqlxUserRepository::new(pool.clone()));
        let resolver = Arc::new(RecipientResolver::new(users.clone()));

        let mut senders = ChannelSenders::new(
            pool.clone(),
            users.clone(),
            providers.push,
            config.provider_timeout,
        );
        if let Some(email) = providers.email.filter(|_| config.email_fallback_enabled) {
            senders = senders.with_email(email);
        }
        let feeds = providers.inapp.filter(|_| config.inapp_enabled);
        if let Some(feeds) = &feeds {
            senders = senders.with_inapp(feeds.personal.clone(), feeds.global.clone());
        }
        let senders = Arc::new(senders);

        let replayer = Arc::new(PostponementReplayer::new(
            pool.clone(),
            resolver.clone(),
            senders.clone(),
        ));
        let dispatcher = Dispatcher::new(
            config.clone(),
            templates,
            users.clone(),
            resolver,
            senders,
            providers.analytics,
            replayer.clone(),
        );

        Self {
            toggles: ToggleManager::new(users.clone()),
            pings: PingService::new(users, providers.publisher, config.ping_cooldown),
            personal_feed: feeds.map(|f| f.personal),
            pool,
            config,
            dispatcher,
            replayer,
        }
    }

    /// Decode one raw message of `topic` and run its handler.
    ///
    /// Empty payloads (tombstones) are acknowledged without doing anything.
    pub async fn ingest_event(
        &self,
        cancel: &CancellationToken,
        topic: SourceTopic,
        value: &[u8],
    ) -> Result<()> {
        super::ensure_active(cancel, "ingest event")?;
        let Some(event) = InboundEvent::decode(topic, value)? else {
            debug!(%topic, "Skipping empty message");
            return Ok(());
        };
        self.dispatcher.dispatch(cancel, event).await
    }

    pub async fn ping_user(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
        requested_by: &str,
    ) -> Result<()> {
        self.pings.ping_user(cancel, user_id, requested_by).await
    }

    pub async fn get_notification_channel_toggles(
        &self,
        cancel: &CancellationToken,
        channel: NotificationChannel,
        user_id: &str,
    ) -> Result<Vec<NotificationChannelToggle>> {
        self.toggles
            .get_notification_channel_toggles(cancel, channel, user_id)
            .await
    }

    pub async fn toggle_notification_channel_domain(
        &self,
        cancel: &CancellationToken,
        channel: NotificationChannel,
        domain: NotificationDomain,
        enabled: bool,
        user_id: &str,
    ) -> Result<()> {
        self.toggles
            .toggle_notification_channel_domain(cancel, channel, domain, enabled, user_id)
            .await
    }

    /// Credentials for the user's in-app feed; empty while in-app is disabled.
    pub async fn generate_inapp_auth_token(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
    ) -> Result<InAppNotificationsUserAuthToken> {
        super::ensure_active(cancel, "generate in-app auth token")?;
        let Some(feed) = &self.personal_feed else {
            return Ok(InAppNotificationsUserAuthToken::default());
        };
        let timeout = self.config.provider_timeout;
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::deadline("in-app auth token cancelled")),
            result = tokio::time::timeout(timeout, feed.create_user_token(user_id)) => {
                result.unwrap_or_else(|_| {
                    Err(Error::deadline(format!(
                        "in-app auth token timed out after {timeout:?}"
                    )))
                })
            }
        }
    }

    /// Re-dispatch everything postponed for `user_id`.
    pub async fn replay_postponed(&self, cancel: &CancellationToken, user_id: &str) -> Result<()> {
        self.replayer.replay_all_for_user(cancel, user_id).await
    }

    pub fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(self.pool.clone(), self.config.retention.clone())
    }
}
