//! Badge, level and role notifications.

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::events::{AchievedBadge, CompletedLevel, EnabledRole};
use super::{Dispatcher, PushContent, media, parcel};
use crate::Result;
use crate::database::models::{SentNotification, SentNotificationKey};
use crate::notification::analytics::{SetUserAttributesCommand, TrackActionCommand};
use crate::notification::providers::InAppId;
use crate::notification::resolver::{PostponeCondition, PushNotificationTokens};
use crate::notification::senders::InAppRequest;
use crate::notification::templates::TemplateData;
use crate::notification::types::{NotificationChannel, NotificationType};

/// Push side of an achievement notification.
struct AchievementPush<'a> {
    notification_type: NotificationType,
    user_id: &'a str,
    uniqueness: &'a str,
    deeplink: String,
    image_url: String,
    body_data: Option<TemplateData<'a>>,
}

impl Dispatcher {
    pub(super) async fn on_badge_unlocked(
        &self,
        cancel: &CancellationToken,
        badge: AchievedBadge,
    ) -> Result<()> {
        if badge.user_id.is_empty()
            || self
                .config
                .is_badge_notification_disabled(&badge.badge_type)
        {
            return Ok(());
        }
        let (notification_type, attribute) = match badge.group_type.as_str() {
            "level" => (NotificationType::LevelBadgeUnlocked, "Current Level Badge"),
            "coin" => (NotificationType::CoinBadgeUnlocked, "Current Coins Badge"),
            "social" => (
                NotificationType::SocialBadgeUnlocked,
                "Current Social Badge",
            ),
            other => {
                debug!(group_type = other, "Ignoring badge of unknown group");
                return Ok(());
            }
        };

        let user_id = badge.user_id.as_str();
        let deeplink = self.deeplink(&format!("profile?section=badges&userId={user_id}"));
        let image_url = self
            .assets
            .download_url(&format!("badges/{}.png", badge.badge_type));
        let inapp = achievement_inapp(
            notification_type,
            user_id,
            &badge.badge_type,
            badge_subject(&badge.badge_type),
            &deeplink,
            &image_url,
        );
        if self.config.disable_badge_unlocked_push_or_analytics {
            return self.senders.send_inapp(cancel, inapp).await;
        }

        let attributes =
            SetUserAttributesCommand::new(user_id).attribute(attribute, badge.name.as_str());
        let action = TrackActionCommand::new(
            format!("{user_id}_badge_type_{}", badge.badge_type),
            user_id,
            "Badge Unlocked",
        )
        .attribute("Badge Type", badge.group_type.as_str())
        .attribute("Badge Name", badge.name.as_str());

        let tokens = self
            .resolver
            .push_tokens(cancel, notification_type.domain(), user_id)
            .await;
        let push = AchievementPush {
            notification_type,
            user_id,
            uniqueness: &badge.badge_type,
            deeplink,
            image_url,
            body_data: Some(TemplateData::from([("BadgeName", badge.name.as_str())])),
        };
        let analytics = vec![
            self.analytics.set_user_attributes(&attributes),
            self.analytics.track_action(&action),
        ];
        self.notify_achievement(cancel, tokens, push, inapp, analytics)
            .await
    }

    pub(super) async fn on_level_changed(
        &self,
        cancel: &CancellationToken,
        level: CompletedLevel,
    ) -> Result<()> {
        if level.user_id.is_empty()
            || self
                .config
                .is_level_notification_disabled(&level.level_type)
        {
            return Ok(());
        }
        let notification_type = NotificationType::LevelChanged;
        let user_id = level.user_id.as_str();
        let counter = level.completed_levels.to_string();
        let deeplink = self.deeplink(&format!("profile?userId={user_id}"));
        let image_url = self
            .assets
            .download_url("assets/push-notifications/level-change.png");
        let inapp = achievement_inapp(
            notification_type,
            user_id,
            &counter,
            InAppId::new("levelValue", counter.as_str()),
            &deeplink,
            &image_url,
        );

        let attributes =
            SetUserAttributesCommand::new(user_id).attribute("Current Level", counter.as_str());
        let action = TrackActionCommand::new(
            format!("{user_id}_level_{}", level.level_type),
            user_id,
            "Level Changed",
        )
        .attribute("Current Level", counter.as_str());

        let tokens = self
            .resolver
            .push_tokens(cancel, notification_type.domain(), user_id)
            .await;
        let push = AchievementPush {
            notification_type,
            user_id,
            uniqueness: &counter,
            deeplink,
            image_url,
            body_data: None,
        };
        let analytics = vec![
            self.analytics.set_user_attributes(&attributes),
            self.analytics.track_action(&action),
        ];
        self.notify_achievement(cancel, tokens, push, inapp, analytics)
            .await
    }

    /// Role changes arrive early in onboarding, so push is postponed until
    /// the user completes registration.
    pub(super) async fn on_role_changed(
        &self,
        cancel: &CancellationToken,
        role: EnabledRole,
    ) -> Result<()> {
        if role.user_id.is_empty() || self.config.is_role_notification_disabled(&role.role_type) {
            return Ok(());
        }
        let notification_type = NotificationType::RoleChanged;
        let user_id = role.user_id.as_str();
        let deeplink = self.deeplink(&format!("profile?section=roles&userId={user_id}"));
        let image_url = self
            .assets
            .download_url("assets/push-notifications/role-change.png");
        let inapp = achievement_inapp(
            notification_type,
            user_id,
            &role.role_type,
            InAppId::new("roleValue", role.role_type.as_str()),
            &deeplink,
            &image_url,
        );

        let attributes = SetUserAttributesCommand::new(user_id)
            .attribute("Current Role", role.role_type.as_str());
        let action = TrackActionCommand::new(
            format!("{user_id}_role_{}", role.role_type),
            user_id,
            "Role Changed",
        )
        .attribute("Current Role", role.role_type.as_str());

        let tokens = self
            .resolver
            .push_tokens_or_postpone(
                cancel,
                notification_type.domain(),
                user_id,
                PostponeCondition::RegistrationIncomplete,
            )
            .await;
        let push = AchievementPush {
            notification_type,
            user_id,
            uniqueness: &role.role_type,
            deeplink,
            image_url,
            body_data: None,
        };
        let analytics = vec![
            self.analytics.set_user_attributes(&attributes),
            self.analytics.track_action(&action),
        ];
        self.notify_achievement(cancel, tokens, push, inapp, analytics)
            .await
    }

    /// Push plus in-app when the user is reachable by push; otherwise in-app
    /// and the analytics commands.
    async fn notify_achievement(
        &self,
        cancel: &CancellationToken,
        tokens: Result<Option<PushNotificationTokens>>,
        push: AchievementPush<'_>,
        inapp: InAppRequest,
        analytics: Vec<BoxFuture<'_, Result<()>>>,
    ) -> Result<()> {
        let tokens = match tokens {
            Ok(Some(tokens)) => tokens,
            other => {
                let reason = other.err();
                return self.without_push(cancel, reason, inapp, analytics).await;
            }
        };
        let Some(template) = self
            .templates
            .find(push.notification_type, &tokens.language)
        else {
            return self.senders.send_inapp(cancel, inapp).await;
        };

        let content = PushContent {
            title: template.title(None),
            body: template.body(push.body_data.as_ref()),
            deeplink: push.deeplink,
            image_url: push.image_url,
        };
        let key = SentNotificationKey::new(
            push.user_id,
            push.uniqueness,
            push.notification_type,
            NotificationChannel::Push,
        );
        self.deliver(cancel, content.personal(&tokens, &key), vec![inapp])
            .await
    }
}

fn achievement_inapp(
    notification_type: NotificationType,
    user_id: &str,
    uniqueness: &str,
    subject: InAppId,
    deeplink: &str,
    image_url: &str,
) -> InAppRequest {
    InAppRequest {
        parcel: parcel(
            notification_type.as_ref(),
            InAppId::system(),
            subject,
            media(deeplink, image_url),
        ),
        record: SentNotification::new(
            SentNotificationKey::new(
                user_id,
                uniqueness,
                notification_type,
                NotificationChannel::InApp,
            ),
            "",
        ),
    }
}

/// Badge codes look like `l3`; the feed wants the zero-based index.
fn badge_subject(badge_type: &str) -> InAppId {
    badge_type
        .get(1..)
        .and_then(|n| n.parse::<i64>().ok())
        .map(|n| InAppId::new("badgeIndex", (n - 1).to_string()))
        .unwrap_or_else(|| InAppId::new("badgeType", badge_type))
}
