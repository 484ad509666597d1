use tokio_util::sync::CancellationToken;

use super::events::ExtraBonusSummary;
use super::{Dispatcher, PushContent, media, parcel};
use crate::database::models::{SentNotification, SentNotificationKey};
use crate::notification::providers::InAppId;
use crate::notification::senders::{EmailRequest, InAppRequest};
use crate::notification::types::{NotificationChannel, NotificationType};
use crate::{Error, Result};

const NOTIFICATION_TYPE: NotificationType = NotificationType::DailyBonus;

impl Dispatcher {
    /// Daily bonus became claimable. Users out of push reach get in-app and,
    /// when enabled, an email.
    pub(super) async fn on_daily_bonus(
        &self,
        cancel: &CancellationToken,
        summary: ExtraBonusSummary,
    ) -> Result<()> {
        if summary.user_id.is_empty() {
            return Ok(());
        }
        let user_id = summary.user_id.as_str();
        let uniqueness = summary.extra_bonus_index.to_string();
        let deeplink = self.deeplink("claim-daily-bonus");
        let image_url = self
            .assets
            .download_url("assets/push-notifications/daily-bonus.png");
        let inapp = InAppRequest {
            parcel: parcel(
                "daily_bonus_became_available",
                InAppId::system(),
                InAppId::new("dailyBonus", uniqueness.as_str()),
                media(&deeplink, &image_url),
            ),
            record: SentNotification::new(
                SentNotificationKey::new(
                    user_id,
                    uniqueness.as_str(),
                    NOTIFICATION_TYPE,
                    NotificationChannel::InApp,
                ),
                "",
            ),
        };

        let tokens = match self
            .resolver
            .push_tokens(cancel, NOTIFICATION_TYPE.domain(), user_id)
            .await
        {
            Ok(Some(tokens)) => tokens,
            other => {
                let inapp = self.senders.send_inapp(cancel, inapp).await;
                let email = self
                    .try_daily_bonus_email(cancel, user_id, &uniqueness)
                    .await;
                return Error::combine_results([other.map(|_| ()), inapp, email]);
            }
        };
        let Some(template) = self.templates.find(NOTIFICATION_TYPE, &tokens.language) else {
            let inapp = self.senders.send_inapp(cancel, inapp).await;
            let email = self
                .try_daily_bonus_email(cancel, user_id, &uniqueness)
                .await;
            return Error::combine_results([inapp, email]);
        };

        let content = PushContent {
            title: template.title(None),
            body: template.body(None),
            deeplink,
            image_url,
        };
        let key = SentNotificationKey::new(
            user_id,
            uniqueness.as_str(),
            NOTIFICATION_TYPE,
            NotificationChannel::Push,
        );
        self.deliver(cancel, content.personal(&tokens, &key), vec![inapp])
            .await
    }

    async fn try_daily_bonus_email(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
        uniqueness: &str,
    ) -> Result<()> {
        if !self.config.email_fallback_enabled || !self.senders.email_enabled() {
            return Ok(());
        }
        let Some(recipient) = self
            .resolver
            .email_recipient(cancel, NOTIFICATION_TYPE.domain(), user_id, true)
            .await?
        else {
            return Ok(());
        };
        let Some(template) = self.templates.find(NOTIFICATION_TYPE, &recipient.language) else {
            return Ok(());
        };

        let request = EmailRequest {
            subject: template.title(None),
            html_body: format!("<p>{}</p>", template.body(None)),
            display_name: recipient.display_name,
            record: SentNotification::new(
                SentNotificationKey::new(
                    user_id,
                    uniqueness,
                    NOTIFICATION_TYPE,
                    NotificationChannel::Email,
                )
                .with_value(recipient.email),
                recipient.language,
            ),
        };
        self.senders.send_email(cancel, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Mocks, config, dispatcher, pool};
    use super::*;
    use crate::database::models::UserDbModel;
    use crate::database::repositories::{LedgerOps, SqlxUserRepository, UserRepository};
    use crate::notification::templates::{NotificationTemplate, TemplateStore};

    fn templates() -> TemplateStore {
        TemplateStore::default().with(
            NOTIFICATION_TYPE,
            "en",
            NotificationTemplate::new("Bonus time", "Claim your daily bonus"),
        )
    }

    async fn user_without_devices(pool: &crate::database::DbPool) {
        let mut user = UserDbModel::new("u1");
        user.username = Some("alice".into());
        user.email = Some("alice@example.com".into());
        user.language = "en".into();
        SqlxUserRepository::new(pool.clone())
            .upsert_profile(&user)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_email_fallback_without_devices() {
        let pool = pool().await;
        user_without_devices(&pool).await;

        let mut mocks = Mocks::new();
        mocks.inapp.expect_send().times(1).returning(|_, _| Ok(()));
        mocks
            .email
            .expect_send()
            .withf(|parcel, recipient| {
                parcel.subject == "Bonus time"
                    && parcel.body.data == "<p>Claim your daily bonus</p>"
                    && recipient.name == "Alice"
                    && recipient.email == "alice@example.com"
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let mut config = config();
        config.email_fallback_enabled = true;

        dispatcher(&pool, config, templates(), mocks)
            .on_daily_bonus(
                &CancellationToken::new(),
                ExtraBonusSummary {
                    user_id: "u1".into(),
                    extra_bonus_index: 3,
                },
            )
            .await
            .unwrap();

        let key =
            SentNotificationKey::new("u1", "3", NOTIFICATION_TYPE, NotificationChannel::Email)
                .with_value("alice@example.com");
        assert!(
            LedgerOps::find_notification(&pool, &key)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_email_without_template_for_language_is_skipped() {
        let pool = pool().await;
        let mut user = UserDbModel::new("u1");
        user.username = Some("marie".into());
        user.email = Some("marie@example.com".into());
        user.language = "fr".into();
        SqlxUserRepository::new(pool.clone())
            .upsert_profile(&user)
            .await
            .unwrap();

        let mut mocks = Mocks::new();
        mocks.inapp.expect_send().times(1).returning(|_, _| Ok(()));
        mocks.email.expect_send().never();
        let mut config = config();
        config.email_fallback_enabled = true;

        dispatcher(&pool, config, templates(), mocks)
            .on_daily_bonus(
                &CancellationToken::new(),
                ExtraBonusSummary {
                    user_id: "u1".into(),
                    extra_bonus_index: 5,
                },
            )
            .await
            .unwrap();

        let rows = LedgerOps::list_notifications_for_user(&pool, "u1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.notification_channel, "inapp");
    }

    #[tokio::test]
    async fn test_email_fallback_is_a_deployment_switch() {
        let pool = pool().await;
        user_without_devices(&pool).await;

        let mut mocks = Mocks::new();
        mocks.inapp.expect_send().times(1).returning(|_, _| Ok(()));

        dispatcher(&pool, config(), templates(), mocks)
            .on_daily_bonus(
                &CancellationToken::new(),
                ExtraBonusSummary {
                    user_id: "u1".into(),
                    extra_bonus_index: 3,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            LedgerOps::list_notifications_for_user(&pool, "u1")
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_push_to_every_device() {
        let pool = pool().await;
        user_without_devices(&pool).await;
        let users = SqlxUserRepository::new(pool.clone());
        for (device, token) in [("d1", "t1"), ("d2", "t2")] {
            users
                .upsert_device_token("u1", device, Some(token.to_string()))
                .await
                .unwrap();
        }

        let mut mocks = Mocks::new();
        mocks
            .push
            .expect_send()
            .withf(|n| n.data["deeplink"] == "ice://claim-daily-bonus")
            .times(2)
            .returning(|_| Ok(()));
        mocks.inapp.expect_send().times(1).returning(|_, _| Ok(()));

        dispatcher(&pool, config(), templates(), mocks)
            .on_daily_bonus(
                &CancellationToken::new(),
                ExtraBonusSummary {
                    user_id: "u1".into(),
                    extra_bonus_index: 4,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            LedgerOps::list_notifications_for_user(&pool, "u1")
                .await
                .unwrap()
                .len(),
            3
        );
    }
}
