//! Postponed notification model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::SentNotificationKey;

/// A push notification waiting for a deliverable channel.
///
/// `payload` holds the serialized notification exactly as it would have been
/// handed to the provider.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostponedNotification {
    /// Unix epoch milliseconds (UTC).
    pub postponed_at: i64,
    pub language: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub key: SentNotificationKey,
    pub payload: String,
}

impl PostponedNotification {
    pub fn new(key: SentNotificationKey, language: impl Into<String>, payload: String) -> Self {
        Self {
            postponed_at: crate::database::time::now_ms(),
            language: language.into(),
            key,
            payload,
        }
    }
}
