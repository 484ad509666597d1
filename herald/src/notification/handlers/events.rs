//! Payloads of the inbound topics.
//!
//! Every field is optional on the wire: upstream producers omit empty values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::UserDbModel;
use crate::notification::providers::AssetUrls;
use crate::notification::types::NotificationChannel;

/// Profile as published by the user service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub phone_number_hash: String,
    pub agenda_phone_number_hashes: String,
    pub profile_picture_url: String,
    pub referred_by: String,
    pub language: String,
    pub completed_registration_process: bool,
}

impl UserProfile {
    /// Directory row for this profile. Preference columns stay unset.
    pub fn to_db_model(&self, assets: &AssetUrls) -> UserDbModel {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let picture = assets.strip_download_url(&self.profile_picture_url);
        let picture = picture.strip_prefix("profile/").unwrap_or(&picture);

        let mut user = UserDbModel::new(&self.id);
        user.username = non_empty(&self.username);
        user.first_name = non_empty(&self.first_name);
        user.last_name = non_empty(&self.last_name);
        user.email = non_empty(&self.email);
        user.phone_number = non_empty(&self.phone_number);
        user.phone_number_hash = non_empty(&self.phone_number_hash);
        user.agenda_phone_number_hashes = non_empty(&self.agenda_phone_number_hashes);
        user.profile_picture_name = non_empty(picture);
        user.referred_by = non_empty(&self.referred_by);
        if !self.language.is_empty() {
            user.language = self.language.clone();
        }
        user.completed_registration_process = self.completed_registration_process;
        user
    }
}

/// Row change on the users table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSnapshot {
    pub user: Option<UserProfile>,
    pub before: Option<UserProfile>,
}

impl UserSnapshot {
    /// Current profile, if it has an id.
    pub fn current(&self) -> Option<&UserProfile> {
        self.user.as_ref().filter(|u| !u.id.is_empty())
    }

    /// Previous profile, if it has an id.
    pub fn previous(&self) -> Option<&UserProfile> {
        self.before.as_ref().filter(|u| !u.id.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceMetadata {
    pub user_id: String,
    pub device_unique_id: String,
    pub push_notification_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceMetadataSnapshot {
    pub device_metadata: Option<DeviceMetadata>,
    pub before: Option<DeviceMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactEvent {
    pub user_id: String,
    pub contact_user_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Adoption {
    pub base_mining_rate: f64,
    pub milestone: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdoptionSnapshot {
    #[serde(flatten)]
    pub adoption: Adoption,
    pub before: Option<Adoption>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewsArticle {
    pub id: String,
    pub language: String,
    pub image_url: String,
    pub url: String,
    pub notification_channels: Option<Vec<NotificationChannel>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtraBonusSummary {
    pub user_id: String,
    pub extra_bonus_index: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DayOffStarted {
    pub started_at: Option<DateTime<Utc>>,
    pub user_id: String,
    pub id: String,
    pub remaining_free_mining_sessions: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AchievedBadge {
    pub user_id: String,
    #[serde(rename = "type")]
    pub badge_type: String,
    pub name: String,
    pub group_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletedLevel {
    pub user_id: String,
    #[serde(rename = "type")]
    pub level_type: String,
    pub completed_levels: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EnabledRole {
    pub user_id: String,
    #[serde(rename = "type")]
    pub role_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_to_db_model() {
        let assets = AssetUrls::new("https://cdn.example.com");
        let profile: UserProfile = serde_json::from_str(
            r#"{
                "id": "u1",
                "username": "alice",
                "email": "",
                "profilePictureUrl": "https://cdn.example.com/profile/a.png",
                "referredBy": "ref",
                "language": "de",
                "completedRegistrationProcess": true
            }"#,
        )
        .unwrap();

        let user = profile.to_db_model(&assets);
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.profile_picture_name.as_deref(), Some("a.png"));
        assert_eq!(user.email, None);
        assert_eq!(user.language, "de");
        assert!(user.completed_registration_process);
    }

    #[test]
    fn test_adoption_snapshot_is_flat() {
        let snapshot: AdoptionSnapshot = serde_json::from_str(
            r#"{
                "baseMiningRate": 16.0,
                "milestone": 2,
                "before": {"baseMiningRate": 32.0, "milestone": 1}
            }"#,
        )
        .unwrap();
        assert_eq!(snapshot.adoption.milestone, 2);
        assert_eq!(snapshot.before.unwrap().milestone, 1);
    }

    #[test]
    fn test_news_channels() {
        let raw = r#"{"id": "n1", "notificationChannels": ["push||email", "inapp"]}"#;
        let news: NewsArticle = serde_json::from_str(raw).unwrap();
        assert_eq!(
            news.notification_channels.unwrap(),
            vec![
                NotificationChannel::PushOrFallbackToEmail,
                NotificationChannel::InApp,
            ]
        );
    }
}
