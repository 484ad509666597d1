//! Analytics side channel and outbound event publishing.
//!
//! Analytics commands are fire-and-forget from the handlers' point of view:
//! they are published to the event log and consumed by another service.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Topic carrying [`SetUserAttributesCommand`]s.
pub const SET_USER_ATTRIBUTES_TOPIC: &str = "set-user-attributes-commands";
/// Topic carrying [`TrackActionCommand`]s.
pub const TRACK_ACTION_TOPIC: &str = "track-action-commands";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetUserAttributesCommand {
    pub user_id: String,
    pub attributes: Map<String, Value>,
}

impl SetUserAttributesCommand {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            attributes: Map::new(),
        }
    }

    pub fn attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedAction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackActionCommand {
    /// Deduplication id on the analytics side.
    pub id: String,
    pub user_id: String,
    pub action: TrackedAction,
}

impl TrackActionCommand {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, action: &str) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            action: TrackedAction {
                name: action.to_string(),
                attributes: Map::new(),
            },
        }
    }

    pub fn attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.action
            .attributes
            .insert(name.to_string(), value.into());
        self
    }
}

/// Sink for analytics commands.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn set_user_attributes(&self, command: &SetUserAttributesCommand) -> Result<()>;

    async fn track_action(&self, command: &TrackActionCommand) -> Result<()>;
}

/// Producer side of the event log.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<()>;
}

/// Analytics sink that serializes commands onto the event log.
pub struct PublishingAnalyticsSink {
    publisher: Arc<dyn EventPublisher>,
}

impl PublishingAnalyticsSink {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl AnalyticsSink for PublishingAnalyticsSink {
    async fn set_user_attributes(&self, command: &SetUserAttributesCommand) -> Result<()> {
        let value = serde_json::to_vec(command)?;
        self.publisher
            .publish(SET_USER_ATTRIBUTES_TOPIC, &command.user_id, value)
            .await
    }

    async fn track_action(&self, command: &TrackActionCommand) -> Result<()> {
        let value = serde_json::to_vec(command)?;
        self.publisher
            .publish(TRACK_ACTION_TOPIC, &command.user_id, value)
            .await
    }
}
