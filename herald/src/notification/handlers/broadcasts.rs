//! Topic broadcasts: news articles and adoption milestones.
//!
//! Broadcasts address per-language push topics and the global in-app feed,
//! recorded in the announcement ledger.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::events::{Adoption, AdoptionSnapshot, NewsArticle};
use super::{Dispatcher, PushContent, fields, media, parcel};
use crate::database::models::{SentAnnouncement, SentAnnouncementKey};
use crate::notification::providers::InAppId;
use crate::notification::senders::{BroadcastInAppRequest, BroadcastPushRequest};
use crate::notification::templates::TemplateData;
use crate::notification::types::{NotificationChannel, NotificationType, SubscriptionTopic};
use crate::{Error, Result};

/// Channel value of global in-app feed announcements.
const SYSTEM_FEED: &str = "system";

impl Dispatcher {
    pub(super) async fn on_news_added(
        &self,
        cancel: &CancellationToken,
        news: NewsArticle,
    ) -> Result<()> {
        let channels = news.notification_channels.clone().unwrap_or_default();
        if news.id.is_empty() || channels.is_empty() {
            return Ok(());
        }
        let requested = |channel: NotificationChannel| channels.contains(&channel);
        let push = requested(NotificationChannel::Push);
        let fallback = requested(NotificationChannel::PushOrFallbackToEmail);

        let mut results = Vec::with_capacity(3);
        if push || fallback {
            results.push(self.broadcast_news_push(cancel, &news).await);
        }
        if push || fallback || requested(NotificationChannel::InApp) {
            results.push(self.broadcast_news_inapp(cancel, &news).await);
        }
        if fallback || requested(NotificationChannel::Email) {
            results.push(Err(Error::Unsupported(format!(
                "broadcasting news {} via email",
                news.id
            ))));
        }
        Error::combine_results(results)
    }

    async fn broadcast_news_push(
        &self,
        cancel: &CancellationToken,
        news: &NewsArticle,
    ) -> Result<()> {
        let notification_type = NotificationType::NewsAdded;
        let Some(template) = self.templates.find(notification_type, &news.language) else {
            return Err(Error::Unsupported(format!(
                "no `{notification_type}` push template for language `{}`",
                news.language
            )));
        };
        let topic = format!("news_{}", news.language);
        let content = PushContent {
            title: template.title(None),
            body: template.body(None),
            deeplink: self.news_deeplink(news),
            image_url: news.image_url.clone(),
        };
        let request = BroadcastPushRequest {
            notification: content.notification(SubscriptionTopic(topic.clone())),
            record: SentAnnouncement::new(
                SentAnnouncementKey::new(
                    news.id.as_str(),
                    notification_type,
                    NotificationChannel::Push,
                    topic,
                ),
                news.language.as_str(),
            ),
            delay: None,
        };
        self.senders.broadcast_push(cancel, request).await
    }

    async fn broadcast_news_inapp(
        &self,
        cancel: &CancellationToken,
        news: &NewsArticle,
    ) -> Result<()> {
        let notification_type = NotificationType::NewsAdded;
        let request = BroadcastInAppRequest {
            parcel: parcel(
                notification_type.as_ref(),
                InAppId::system(),
                InAppId::new(
                    "(language,newsId)",
                    format!("({},{})", news.language, news.id),
                ),
                media(&self.news_deeplink(news), &news.image_url),
            ),
            record: SentAnnouncement::new(
                SentAnnouncementKey::new(
                    news.id.as_str(),
                    notification_type,
                    NotificationChannel::InApp,
                    SYSTEM_FEED,
                ),
                news.language.as_str(),
            ),
        };
        self.senders.broadcast_inapp(cancel, request).await
    }

    fn news_deeplink(&self, news: &NewsArticle) -> String {
        let url: String = url::form_urlencoded::byte_serialize(news.url.as_bytes()).collect();
        self.deeplink(&format!(
            "browser?contentType=news&contentId={}&contentLanguage={}&url={url}",
            news.id, news.language
        ))
    }

    /// Milestone changes are broadcast in every language with a template.
    pub(super) async fn on_adoption_changed(
        &self,
        cancel: &CancellationToken,
        snapshot: AdoptionSnapshot,
    ) -> Result<()> {
        let adoption = snapshot.adoption;
        let Some(before) = snapshot.before else {
            return Ok(());
        };
        if adoption.milestone == 0
            || before.milestone == 0
            || adoption.milestone == before.milestone
        {
            return Ok(());
        }

        let push = self.broadcast_adoption_push(cancel, &adoption).await;
        let inapp = self.broadcast_adoption_inapp(cancel, &adoption).await;
        let email = Err(Error::Unsupported(format!(
            "broadcasting adoption milestone {} via email",
            adoption.milestone
        )));
        Error::combine_results([push, inapp, email])
    }

    async fn broadcast_adoption_push(
        &self,
        cancel: &CancellationToken,
        adoption: &Adoption,
    ) -> Result<()> {
        let notification_type = NotificationType::AdoptionChanged;
        let milestone = adoption.milestone.to_string();
        let rate = adoption.base_mining_rate.to_string();
        let data = TemplateData::from([("BaseMiningRate", rate.as_str())]);
        let deeplink = self.deeplink("home?section=adoption");
        let image_url = self
            .assets
            .download_url("assets/push-notifications/adoption-change.png");

        let mut current = Vec::new();
        let mut delayed = Vec::new();
        for (language, template) in self.templates.languages(notification_type) {
            let content = PushContent {
                title: template.title(None),
                body: template.body(Some(&data)),
                deeplink: deeplink.clone(),
                image_url: image_url.clone(),
            };
            for (topic, delay) in [
                (format!("system_{language}"), None),
                (
                    format!("system_{language}_v2"),
                    Some(self.config.adoption_v2_delay),
                ),
            ] {
                let request = BroadcastPushRequest {
                    notification: content.notification(SubscriptionTopic(topic.clone())),
                    record: SentAnnouncement::new(
                        SentAnnouncementKey::new(
                            milestone.as_str(),
                            notification_type,
                            NotificationChannel::Push,
                            topic,
                        ),
                        language,
                    ),
                    delay,
                };
                if delay.is_some() {
                    delayed.push(request);
                } else {
                    current.push(request);
                }
            }
        }

        let send = |request| self.senders.broadcast_push(cancel, request);
        let current = fanout::run_concurrently(cancel, current, send).await;
        let delayed = fanout::run_concurrently(cancel, delayed, send).await;
        Error::combine_results([current.map_err(Error::from), delayed.map_err(Error::from)])
    }

    async fn broadcast_adoption_inapp(
        &self,
        cancel: &CancellationToken,
        adoption: &Adoption,
    ) -> Result<()> {
        let notification_type = NotificationType::AdoptionChanged;
        let milestone = adoption.milestone.to_string();
        let deeplink = self.deeplink("home?section=adoption");
        let image_url = self
            .assets
            .download_url("assets/push-notifications/adoption-change.png");
        let request = BroadcastInAppRequest {
            parcel: parcel(
                notification_type.as_ref(),
                InAppId::system(),
                InAppId::new("adoptionMilestone", milestone.as_str()),
                fields([
                    ("baseMiningRate", Value::from(adoption.base_mining_rate)),
                    ("deeplink", deeplink.into()),
                    ("imageUrl", image_url.into()),
                ]),
            ),
            record: SentAnnouncement::new(
                SentAnnouncementKey::new(
                    milestone,
                    notification_type,
                    NotificationChannel::InApp,
                    SYSTEM_FEED,
                ),
                "",
            ),
        };
        self.senders.broadcast_inapp(cancel, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::InboundEvent;
    use super::super::test_support::{Mocks, config, dispatcher, pool};
    use super::*;
    use crate::database::repositories::LedgerOps;
    use crate::notification::templates::{NotificationTemplate, TemplateStore};

    fn article(channels: Vec<NotificationChannel>) -> NewsArticle {
        NewsArticle {
            id: "n1".into(),
            language: "en".into(),
            image_url: "https://news.example.com/n1.png".into(),
            url: "https://news.example.com/a b?x=1".into(),
            notification_channels: Some(channels),
        }
    }

    const NEWS_DEEPLINK: &str = "ice://browser?contentType=news&contentId=n1&contentLanguage=en\
        &url=https%3A%2F%2Fnews.example.com%2Fa+b%3Fx%3D1";

    #[tokio::test]
    async fn test_news_push_and_inapp_with_email_unsupported() {
        let pool = pool().await;
        let mut mocks = Mocks::new();
        mocks
            .push
            .expect_broadcast()
            .withf(|n| n.target.as_str() == "news_en" && n.data["deeplink"] == NEWS_DEEPLINK)
            .times(1)
            .returning(|_| Ok(()));
        mocks
            .inapp
            .expect_send()
            .withf(|parcel, topic| {
                topic == SYSTEM_FEED
                    && parcel.subject == InAppId::new("(language,newsId)", "(en,n1)")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        let templates = TemplateStore::default().with(
            NotificationType::NewsAdded,
            "en",
            NotificationTemplate::new("Fresh news", "Tap to read"),
        );

        let news = article(vec![NotificationChannel::PushOrFallbackToEmail]);
        dispatcher(&pool, config(), templates, mocks)
            .dispatch(&CancellationToken::new(), InboundEvent::News(news))
            .await
            .unwrap();

        let rows = LedgerOps::list_announcements(&pool, "n1").await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_news_inapp_only() {
        let pool = pool().await;
        let mut mocks = Mocks::new();
        mocks.inapp.expect_send().times(1).returning(|_, _| Ok(()));

        dispatcher(&pool, config(), TemplateStore::default(), mocks)
            .on_news_added(
                &CancellationToken::new(),
                article(vec![NotificationChannel::InApp]),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_news_without_channels_is_skipped() {
        let pool = pool().await;
        dispatcher(&pool, config(), TemplateStore::default(), Mocks::new())
            .on_news_added(&CancellationToken::new(), article(Vec::new()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_adoption_broadcasts_every_language_twice() {
        let pool = pool().await;
        let mut mocks = Mocks::new();
        mocks
            .push
            .expect_broadcast()
            .withf(|n| {
                n.body == "Mining rate is now 16" && n.target.as_str().starts_with("system_")
            })
            .times(2)
            .returning(|_| Ok(()));
        mocks
            .push
            .expect_broadcast_delayed()
            .withf(|d| d.notification.target.as_str().ends_with("_v2") && d.delay_secs == 60)
            .times(2)
            .returning(|_| Ok(()));
        mocks.inapp.expect_send().times(1).returning(|_, _| Ok(()));
        let template =
            NotificationTemplate::new("Adoption", "Mining rate is now {{.BaseMiningRate}}");
        let templates = TemplateStore::default()
            .with(NotificationType::AdoptionChanged, "en", template.clone())
            .with(NotificationType::AdoptionChanged, "de", template);

        let snapshot = AdoptionSnapshot {
            adoption: Adoption {
                base_mining_rate: 16.0,
                milestone: 2,
            },
            before: Some(Adoption {
                base_mining_rate: 32.0,
                milestone: 1,
            }),
        };
        dispatcher(&pool, config(), templates, mocks)
            .dispatch(&CancellationToken::new(), InboundEvent::Adoption(snapshot))
            .await
            .unwrap();

        let values: Vec<String> = LedgerOps::list_announcements(&pool, "2")
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.key.notification_channel_value)
            .collect();
        assert_eq!(values.len(), 5);
        assert!(values.contains(&"system_de_v2".to_string()));
        assert!(values.contains(&SYSTEM_FEED.to_string()));
    }

    #[tokio::test]
    async fn test_unchanged_milestone_is_skipped() {
        let pool = pool().await;
        let snapshot = AdoptionSnapshot {
            adoption: Adoption {
                base_mining_rate: 16.0,
                milestone: 2,
            },
            before: Some(Adoption {
                base_mining_rate: 16.0,
                milestone: 2,
            }),
        };
        dispatcher(&pool, config(), TemplateStore::default(), Mocks::new())
            .on_adoption_changed(&CancellationToken::new(), snapshot)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_broadcast_still_fails_next_to_unsupported_email() {
        let pool = pool().await;
        let mut mocks = Mocks::new();
        mocks
            .push
            .expect_broadcast()
            .times(1)
            .returning(|_| Err(Error::Provider("gateway down".into())));
        mocks.inapp.expect_send().times(1).returning(|_, _| Ok(()));
        let templates = TemplateStore::default().with(
            NotificationType::NewsAdded,
            "en",
            NotificationTemplate::new("Fresh news", "Tap to read"),
        );

        let news = article(vec![NotificationChannel::PushOrFallbackToEmail]);
        let err = dispatcher(&pool, config(), templates, mocks)
            .dispatch(&CancellationToken::new(), InboundEvent::News(news))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }
}
