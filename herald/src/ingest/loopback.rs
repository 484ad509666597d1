use std::str::FromStr;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;

use super::{InboundMessage, SourceTopic};
use crate::notification::analytics::EventPublisher;
use crate::{Error, Result};

/// In-process stand-in for the event log producer.
///
/// Messages for topics this service consumes (such as `user-pings`) are fed
/// back into the ingest queue. Anything else is only logged.
pub struct LoopbackPublisher {
    tx: mpsc::Sender<InboundMessage>,
}

impl LoopbackPublisher {
    pub fn new(tx: mpsc::Sender<InboundMessage>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl EventPublisher for LoopbackPublisher {
    async fn publish(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<()> {
        let Ok(source_topic) = SourceTopic::from_str(topic) else {
            info!(
                topic,
                key,
                payload = %String::from_utf8_lossy(&value),
                "Published event"
            );
            return Ok(());
        };
        self.tx
            .send(InboundMessage {
                topic: source_topic,
                key: key.to_string(),
                value,
            })
            .await
            .map_err(|_| Error::Provider(format!("ingest queue closed, dropping {topic} event")))
    }
}
