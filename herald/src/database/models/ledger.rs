//! Delivery ledger models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::notification::types::{NotificationChannel, NotificationType};

/// Natural key of a personal notification.
///
/// `notification_channel_value` tells apart several targets of the same
/// channel, e.g. one row per device token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentNotificationKey {
    pub user_id: String,
    pub uniqueness: String,
    pub notification_type: String,
    pub notification_channel: String,
    #[serde(default)]
    pub notification_channel_value: String,
}

impl SentNotificationKey {
    pub fn new(
        user_id: impl Into<String>,
        uniqueness: impl Into<String>,
        notification_type: NotificationType,
        notification_channel: NotificationChannel,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            uniqueness: uniqueness.into(),
            notification_type: notification_type.to_string(),
            notification_channel: notification_channel.to_string(),
            notification_channel_value: String::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.notification_channel_value = value.into();
        self
    }
}

/// A delivered personal notification.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentNotification {
    /// Unix epoch milliseconds (UTC).
    pub sent_at: i64,
    pub language: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub key: SentNotificationKey,
}

impl SentNotification {
    pub fn new(key: SentNotificationKey, language: impl Into<String>) -> Self {
        Self {
            sent_at: crate::database::time::now_ms(),
            language: language.into(),
            key,
        }
    }

    pub fn get_sent_at(&self) -> DateTime<Utc> {
        crate::database::time::ms_to_datetime(self.sent_at)
    }
}

/// Natural key of a broadcast notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentAnnouncementKey {
    pub uniqueness: String,
    pub notification_type: String,
    pub notification_channel: String,
    #[serde(default)]
    pub notification_channel_value: String,
}

impl SentAnnouncementKey {
    pub fn new(
        uniqueness: impl Into<String>,
        notification_type: NotificationType,
        notification_channel: NotificationChannel,
        value: impl Into<String>,
    ) -> Self {
        Self {
            uniqueness: uniqueness.into(),
            notification_type: notification_type.to_string(),
            notification_channel: notification_channel.to_string(),
            notification_channel_value: value.into(),
        }
    }
}

/// A delivered broadcast notification.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentAnnouncement {
    /// Unix epoch milliseconds (UTC).
    pub sent_at: i64,
    pub language: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub key: SentAnnouncementKey,
}

impl SentAnnouncement {
    pub fn new(key: SentAnnouncementKey, language: impl Into<String>) -> Self {
        Self {
            sent_at: crate::database::time::now_ms(),
            language: language.into(),
            key,
        }
    }
}
