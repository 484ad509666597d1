//! Inbound event plumbing.
//!
//! Messages arrive from an [`EventSource`] tagged with their [`SourceTopic`],
//! and [`IngestRuntime`] hands each one to an [`EventHandler`] on its own task.

mod loopback;
mod runtime;
mod source;

pub use loopback::LoopbackPublisher;
pub use runtime::{EventHandler, IngestRuntime, IngestStats};
pub use source::{ChannelSource, JsonLinesSource, pump};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Upstream topics this service consumes.
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
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum SourceTopic {
    UsersTable,
    DeviceMetadataTable,
    ContactsTable,
    AdoptionTable,
    NewsTable,
    AvailableDailyBonuses,
    UserPings,
    StartedDaysOff,
    AchievedBadges,
    CompletedLevels,
    EnabledRoles,
}

/// One message of the event log. An empty `value` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: SourceTopic,
    pub key: String,
    pub value: Vec<u8>,
}

#[async_trait]
pub trait EventSource: Send {
    /// Next message, or `None` once the source is exhausted.
    async fn next(&mut self) -> Result<Option<InboundMessage>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_topic_names() {
        assert_eq!(SourceTopic::UsersTable.as_ref(), "users-table");
        assert_eq!(
            SourceTopic::from_str("available-daily-bonuses").unwrap(),
            SourceTopic::AvailableDailyBonuses
        );
        assert!(SourceTopic::from_str("unknown-topic").is_err());
        assert_eq!(SourceTopic::iter().count(), 11);
    }
}
