//! Notification vocabulary shared by handlers, senders and storage.

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

/// Delivery medium.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
pub enum NotificationChannel {
    #[strum(serialize = "inapp")]
    #[serde(rename = "inapp")]
    InApp,
    #[strum(serialize = "email")]
    #[serde(rename = "email")]
    Email,
    #[strum(serialize = "push")]
    #[serde(rename = "push")]
    Push,
    /// Push, with email as the fallback when push is unavailable.
    #[strum(serialize = "push||email")]
    #[serde(rename = "push||email")]
    PushOrFallbackToEmail,
}

/// Coarse category a user can mute per channel.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationDomain {
    /// Catch-all marker stored in the disabled set.
    All,
    /// Toggle name for the catch-all marker.
    DisableAll,
    WeeklyReport,
    WeeklyStats,
    Achievements,
    Promotions,
    News,
    MicroCommunity,
    Mining,
    DailyBonus,
    System,
}

impl NotificationDomain {
    /// Domains a user can toggle for `channel`, in display order.
    ///
    /// Returns an empty slice for channels without preferences.
    pub fn toggleable(channel: NotificationChannel) -> &'static [NotificationDomain] {
        use NotificationDomain::*;
        match channel {
            NotificationChannel::Push => &[
                DisableAll,
                WeeklyStats,
                Achievements,
                Promotions,
                News,
                MicroCommunity,
                Mining,
                DailyBonus,
                System,
            ],
            NotificationChannel::Email => &[
                DisableAll,
                WeeklyReport,
                Achievements,
                Promotions,
                News,
                MicroCommunity,
                Mining,
                DailyBonus,
                System,
            ],
            NotificationChannel::InApp | NotificationChannel::PushOrFallbackToEmail => &[],
        }
    }
}

/// Kind of user-facing notification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    AdoptionChanged,
    DailyBonus,
    LevelBadgeUnlocked,
    CoinBadgeUnlocked,
    SocialBadgeUnlocked,
    LevelChanged,
    RoleChanged,
    NewContact,
    NewReferral,
    NewsAdded,
    Ping,
}

impl NotificationType {
    /// Domain a user mutes to silence this notification type.
    pub fn domain(self) -> NotificationDomain {
        match self {
            Self::LevelBadgeUnlocked
            | Self::CoinBadgeUnlocked
            | Self::SocialBadgeUnlocked
            | Self::LevelChanged
            | Self::RoleChanged => NotificationDomain::Achievements,
            Self::DailyBonus => NotificationDomain::DailyBonus,
            Self::Ping | Self::NewReferral | Self::NewContact => NotificationDomain::MicroCommunity,
            Self::NewsAdded => NotificationDomain::News,
            Self::AdoptionChanged => NotificationDomain::System,
        }
    }

    pub fn all() -> impl Iterator<Item = NotificationType> {
        Self::iter()
    }
}

/// Push device registration token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceToken(pub String);

impl DeviceToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Push broadcast topic, e.g. `news_en`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionTopic(pub String);

impl SubscriptionTopic {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriptionTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One toggle row as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannelToggle {
    #[serde(rename = "type")]
    pub domain: NotificationDomain,
    pub enabled: bool,
}

/// Token used by clients to read their in-app feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InAppNotificationsUserAuthToken {
    pub app_id: String,
    pub app_key: String,
    pub user_token: String,
}

impl InAppNotificationsUserAuthToken {
    pub fn is_empty(&self) -> bool {
        self.user_token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::str::FromStr;

    #[rstest]
    #[case(NotificationChannel::InApp, "inapp")]
    #[case(NotificationChannel::Email, "email")]
    #[case(NotificationChannel::Push, "push")]
    #[case(NotificationChannel::PushOrFallbackToEmail, "push||email")]
    fn test_channel_tags(#[case] channel: NotificationChannel, #[case] tag: &str) {
        assert_eq!(channel.to_string(), tag);
        assert_eq!(NotificationChannel::from_str(tag).unwrap(), channel);
        assert_eq!(
            serde_json::to_string(&channel).unwrap(),
            format!("\"{tag}\"")
        );
    }

    #[rstest]
    #[case(
        NotificationType::LevelBadgeUnlocked,
        "level_badge_unlocked",
        NotificationDomain::Achievements
    )]
    #[case(
        NotificationType::DailyBonus,
        "daily_bonus",
        NotificationDomain::DailyBonus
    )]
    #[case(NotificationType::Ping, "ping", NotificationDomain::MicroCommunity)]
    #[case(NotificationType::NewsAdded, "news_added", NotificationDomain::News)]
    #[case(
        NotificationType::AdoptionChanged,
        "adoption_changed",
        NotificationDomain::System
    )]
    fn test_type_tags_and_domains(
        #[case] notification_type: NotificationType,
        #[case] tag: &str,
        #[case] domain: NotificationDomain,
    ) {
        assert_eq!(notification_type.to_string(), tag);
        assert_eq!(notification_type.domain(), domain);
    }

    #[test]
    fn test_toggleable_domains_differ_per_channel() {
        let push = NotificationDomain::toggleable(NotificationChannel::Push);
        let email = NotificationDomain::toggleable(NotificationChannel::Email);
        assert_eq!(push.len(), 9);
        assert_eq!(email.len(), 9);
        assert!(push.contains(&NotificationDomain::WeeklyStats));
        assert!(email.contains(&NotificationDomain::WeeklyReport));
        assert!(!push.contains(&NotificationDomain::All));
        assert!(NotificationDomain::toggleable(NotificationChannel::InApp).is_empty());
    }

    #[test]
    fn test_all_types_listed() {
        assert_eq!(NotificationType::all().count(), 11);
    }
}
