//! Delivery provider interfaces and their HTTP implementations.
//!
//! Providers are shared across concurrent handler invocations and must be
//! safe to call from many tasks at once.

pub mod assets;
pub mod email;
mod http;
pub mod inapp;
pub mod push;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::notification::types::{DeviceToken, InAppNotificationsUserAuthToken, SubscriptionTopic};

pub use assets::AssetUrls;
pub use email::HttpEmailProvider;
pub use inapp::HttpInAppFeed;
pub use push::HttpPushProvider;

/// Push notification addressed to a device token or a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification<T> {
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub target: T,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image_url: String,
}

/// Topic broadcast the gateway holds back for `delay_secs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayedPushNotification {
    #[serde(flatten)]
    pub notification: PushNotification<SubscriptionTopic>,
    pub delay_secs: u64,
}

/// Identity inside an in-app feed entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InAppId {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl InAppId {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }

    pub fn system() -> Self {
        Self::new("system", "system")
    }
}

/// In-app feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InAppParcel {
    pub time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    pub action: String,
    pub actor: InAppId,
    pub subject: InAppId,
}

/// Email sender or recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailBody {
    pub content_type: String,
    pub data: String,
}

impl EmailBody {
    pub fn html(data: impl Into<String>) -> Self {
        Self {
            content_type: "text/html".to_string(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailParcel {
    pub from: Participant,
    pub subject: String,
    pub body: EmailBody,
}

/// Push delivery.
///
/// `send` fails with [`crate::Error::InvalidTarget`] when the device token is
/// permanently dead.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, notification: &PushNotification<DeviceToken>) -> Result<()>;

    async fn broadcast(&self, notification: &PushNotification<SubscriptionTopic>) -> Result<()>;

    async fn broadcast_delayed(&self, notification: &DelayedPushNotification) -> Result<()>;
}

/// Email delivery.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, parcel: &EmailParcel, recipient: &Participant) -> Result<()>;
}

/// In-app feed. Personal feeds are addressed by user id, the global feed by
/// topic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InAppFeed: Send + Sync {
    async fn send(&self, parcel: &InAppParcel, recipient: &str) -> Result<()>;

    async fn create_user_token(&self, user_id: &str) -> Result<InAppNotificationsUserAuthToken>;
}
