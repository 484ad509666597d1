//! User directory models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::notification::types::{NotificationChannel, NotificationDomain};
use crate::utils::json::{self, JsonContext};

/// User projection row.
///
/// Owned by the upstream user-profile service; this service only writes the
/// preference columns and the ping cooldown.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct UserDbModel {
    pub user_id: String,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub phone_number_hash: Option<String>,
    /// Comma-separated phone number hashes from the user's address book.
    pub agenda_phone_number_hashes: Option<String>,
    pub profile_picture_name: Option<String>,
    pub referred_by: Option<String>,
    pub language: String,
    pub completed_registration_process: bool,
    /// JSON array of domain tags.
    pub disabled_push_notification_domains: Option<String>,
    /// JSON array of domain tags.
    pub disabled_email_notification_domains: Option<String>,
    /// Unix epoch milliseconds (UTC).
    pub last_ping_cooldown_ended_at: Option<i64>,
}

impl UserDbModel {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            language: "en".to_string(),
            ..Default::default()
        }
    }

    /// Raw disabled-domain column for `channel`.
    pub fn disabled_domains_raw(&self, channel: NotificationChannel) -> Option<&str> {
        match channel {
            NotificationChannel::Email => self.disabled_email_notification_domains.as_deref(),
            _ => self.disabled_push_notification_domains.as_deref(),
        }
    }

    /// Disabled domain tags for `channel`.
    ///
    /// Unknown tags are kept so a round trip never drops them.
    pub fn disabled_domains(&self, channel: NotificationChannel) -> Vec<String> {
        json::parse_optional_or_default(
            self.disabled_domains_raw(channel),
            JsonContext::UserField {
                user_id: &self.user_id,
                field: match channel {
                    NotificationChannel::Email => "disabled_email_notification_domains",
                    _ => "disabled_push_notification_domains",
                },
            },
            "Invalid disabled domains JSON; treating as empty",
        )
    }

    /// Whether `domain`, or the catch-all marker, is disabled for `channel`.
    pub fn is_domain_disabled(
        &self,
        channel: NotificationChannel,
        domain: NotificationDomain,
    ) -> bool {
        let disabled = self.disabled_domains(channel);
        disabled
            .iter()
            .any(|d| d == domain.as_ref() || d == NotificationDomain::All.as_ref())
    }

    pub fn referred_by(&self) -> Option<&str> {
        self.referred_by.as_deref().filter(|r| !r.is_empty())
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    pub fn get_last_ping_cooldown_ended_at(&self) -> Option<DateTime<Utc>> {
        self.last_ping_cooldown_ended_at
            .map(crate::database::time::ms_to_datetime)
    }
}

/// Device registration row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DeviceMetadataDbModel {
    pub user_id: String,
    pub device_unique_id: String,
    pub push_notification_token: Option<String>,
}

/// Contact list row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ContactsDbModel {
    pub user_id: String,
    /// Comma-separated contact user ids.
    pub contact_user_ids: String,
}

impl ContactsDbModel {
    pub fn ids(&self) -> Vec<&str> {
        self.contact_user_ids
            .split(',')
            .filter(|id| !id.is_empty())
            .collect()
    }
}
