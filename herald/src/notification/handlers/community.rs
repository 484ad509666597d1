//! Referral, contact and ping notifications.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::events::UserSnapshot;
use super::{Dispatcher, PushContent, fields, parcel};
use crate::database::models::{SentNotification, SentNotificationKey};
use crate::notification::ping::{UserPing, ping_uniqueness};
use crate::notification::providers::InAppId;
use crate::notification::senders::InAppRequest;
use crate::notification::templates::TemplateData;
use crate::notification::types::{NotificationChannel, NotificationDomain, NotificationType};
use crate::{Error, Result};

const REFERRAL_ACTION: &str = "referral_joined_team";
const CONTACT_ACTION: &str = "contact_joined_ice";
const PING_ACTION: &str = "pinged";

/// Push about another member, titled with their `@username`.
struct MemberPush<'a> {
    notification_type: NotificationType,
    recipient: &'a str,
    uniqueness: &'a str,
    username: &'a str,
    deeplink: String,
    image_url: String,
}

impl MemberPush<'_> {
    fn content(&self, dispatcher: &Dispatcher, language: &str) -> Option<PushContent> {
        let template = dispatcher.templates.find(self.notification_type, language)?;
        let handle = format!("@{}", self.username);
        let data = TemplateData::from([("Username", handle.as_str())]);
        Some(PushContent {
            title: template.title(Some(&data)),
            body: template.body(None),
            deeplink: self.deeplink.clone(),
            image_url: self.image_url.clone(),
        })
    }

    fn key(&self) -> SentNotificationKey {
        SentNotificationKey::new(
            self.recipient,
            self.uniqueness,
            self.notification_type,
            NotificationChannel::Push,
        )
    }
}

impl Dispatcher {
    /// Tell the referrer that a new member joined their team.
    pub(super) async fn on_new_referral(
        &self,
        cancel: &CancellationToken,
        snapshot: &UserSnapshot,
    ) -> Result<()> {
        let Some(user) = snapshot.current() else {
            return Ok(());
        };
        let referred_by = user.referred_by.as_str();
        if referred_by.is_empty()
            || referred_by == user.id
            || snapshot
                .previous()
                .is_some_and(|before| before.referred_by == referred_by)
            || user.username.is_empty()
            || user.username == user.id
        {
            return Ok(());
        }

        let deeplink = self.deeplink(&format!("profile?userId={}", user.id));
        let inapp = member_inapp(
            REFERRAL_ACTION,
            NotificationType::NewReferral,
            referred_by,
            &user.id,
            &user.username,
            &deeplink,
            &user.profile_picture_url,
            InAppId::new("userId", referred_by),
        );
        let push = MemberPush {
            notification_type: NotificationType::NewReferral,
            recipient: referred_by,
            uniqueness: &user.id,
            username: &user.username,
            deeplink,
            image_url: user.profile_picture_url.clone(),
        };
        self.notify_member(cancel, push, inapp).await
    }

    /// Tell every user with the new member's phone number in their address
    /// book that the contact joined.
    pub(super) async fn on_new_contact(
        &self,
        cancel: &CancellationToken,
        snapshot: &UserSnapshot,
    ) -> Result<()> {
        let Some(user) = snapshot.current() else {
            return Ok(());
        };
        let already_announced = snapshot.before.as_ref().is_some_and(|before| {
            !before.phone_number_hash.is_empty()
                && before.phone_number_hash != user.id
                && !before.referred_by.is_empty()
                && before.referred_by != user.id
        });
        if user.phone_number_hash.is_empty()
            || user.username.is_empty()
            || user.username == user.id
            || user.referred_by.is_empty()
            || user.referred_by == user.id
            || user.phone_number_hash == user.id
            || already_announced
        {
            return Ok(());
        }

        crate::notification::ensure_active(cancel, "find contacts of new member")?;
        let recipients = self
            .users
            .find_by_agenda_phone_number_hash(&user.phone_number_hash)
            .await?;
        if recipients.is_empty() {
            return Ok(());
        }

        let deeplink = self.deeplink(&format!("profile?userId={}", user.id));
        let mut pushes = Vec::new();
        let mut inapps = Vec::with_capacity(recipients.len());
        for recipient in &recipients {
            inapps.push(member_inapp(
                CONTACT_ACTION,
                NotificationType::NewContact,
                &recipient.user_id,
                &user.id,
                &user.username,
                &deeplink,
                &user.profile_picture_url,
                InAppId::new("userId", user.id.as_str()),
            ));

            let Some(tokens) = self
                .resolver
                .push_tokens_for(recipient, NotificationType::NewContact.domain())
                .await?
            else {
                continue;
            };
            let push = MemberPush {
                notification_type: NotificationType::NewContact,
                recipient: &recipient.user_id,
                uniqueness: &user.id,
                username: &user.username,
                deeplink: deeplink.clone(),
                image_url: user.profile_picture_url.clone(),
            };
            if let Some(content) = push.content(self, &tokens.language) {
                pushes.extend(content.personal(&tokens, &push.key()));
            }
        }

        debug!(
            user_id = %user.id,
            recipients = inapps.len(),
            pushes = pushes.len(),
            "Announcing new contact"
        );
        self.deliver(cancel, pushes, inapps).await
    }

    pub(super) async fn on_ping(&self, cancel: &CancellationToken, ping: UserPing) -> Result<()> {
        if ping.user_id.is_empty() {
            return Ok(());
        }
        let pinged_by = self
            .users
            .find_by_id(&ping.pinged_by)
            .await?
            .ok_or_else(|| Error::not_found("user", ping.pinged_by.as_str()))?;
        let username = pinged_by.username.clone().unwrap_or_default();

        let uniqueness =
            ping_uniqueness(ping.last_ping_cooldown_ended_at, self.config.ping_cooldown);
        let deeplink = self.deeplink("home");
        let image_url = self.assets.download_url(&format!(
            "profile/{}",
            pinged_by
                .profile_picture_name
                .as_deref()
                .unwrap_or_default()
        ));
        let mut inapp_parcel = parcel(
            PING_ACTION,
            InAppId::new("userId", ping.pinged_by.as_str()),
            InAppId::new("userId", ping.user_id.as_str()),
            fields([
                ("username", username.as_str().into()),
                ("deeplink", deeplink.as_str().into()),
                ("imageUrl", image_url.as_str().into()),
            ]),
        );
        inapp_parcel.reference_id = Some(format!("{}:{uniqueness}", NotificationType::Ping));
        let inapp = InAppRequest {
            parcel: inapp_parcel,
            record: SentNotification::new(
                SentNotificationKey::new(
                    ping.user_id.as_str(),
                    uniqueness.as_str(),
                    NotificationType::Ping,
                    NotificationChannel::InApp,
                ),
                "",
            ),
        };
        let push = MemberPush {
            notification_type: NotificationType::Ping,
            recipient: &ping.user_id,
            uniqueness: &uniqueness,
            username: &username,
            deeplink,
            image_url,
        };
        self.notify_member(cancel, push, inapp).await
    }

    async fn notify_member(
        &self,
        cancel: &CancellationToken,
        push: MemberPush<'_>,
        inapp: InAppRequest,
    ) -> Result<()> {
        let tokens = match self
            .resolver
            .push_tokens(cancel, NotificationDomain::MicroCommunity, push.recipient)
            .await
        {
            Ok(Some(tokens)) => tokens,
            other => {
                let reason = other.err();
                return self.without_push(cancel, reason, inapp, Vec::new()).await;
            }
        };
        let Some(content) = push.content(self, &tokens.language) else {
            return self.senders.send_inapp(cancel, inapp).await;
        };
        self.deliver(cancel, content.personal(&tokens, &push.key()), vec![inapp])
            .await
    }
}

#[allow(clippy::too_many_arguments)]
fn member_inapp(
    action: &str,
    notification_type: NotificationType,
    recipient: &str,
    member_id: &str,
    username: &str,
    deeplink: &str,
    image_url: &str,
    subject: InAppId,
) -> InAppRequest {
    let mut parcel = parcel(
        action,
        InAppId::new("userId", member_id),
        subject,
        fields([
            ("username", username.into()),
            ("deeplink", deeplink.into()),
            ("imageUrl", image_url.into()),
        ]),
    );
    parcel.reference_id = Some(format!("{action}:userId:{member_id}"));
    InAppRequest {
        parcel,
        record: SentNotification::new(
            SentNotificationKey::new(
                recipient,
                member_id,
                notification_type,
                NotificationChannel::InApp,
            ),
            "",
        ),
    }
}
