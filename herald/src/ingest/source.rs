//! Event sources.

use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EventSource, InboundMessage, SourceTopic};
use crate::Result;

#[derive(Debug, Deserialize)]
struct JsonLine {
    topic: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: Value,
}

/// Newline-delimited JSON records `{"topic", "key", "value"}`.
///
/// `value` holds the event itself; `null` or a missing value is a tombstone.
/// Blank lines, malformed records and unknown topics are skipped.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_no: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }

    fn parse(&self, line: &str) -> Option<InboundMessage> {
        let record: JsonLine = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = self.line_no, error = %e, "Skipping malformed record");
                return None;
            }
        };
        let Ok(topic) = SourceTopic::from_str(&record.topic) else {
            warn!(line = self.line_no, topic = %record.topic, "Skipping record of unknown topic");
            return None;
        };
        let value = match record.value {
            Value::Null => Vec::new(),
            value => value.to_string().into_bytes(),
        };
        Some(InboundMessage {
            topic,
            key: record.key,
            value,
        })
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for JsonLinesSource<R> {
    async fn next(&mut self) -> Result<Option<InboundMessage>> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(message) = self.parse(&line) {
                return Ok(Some(message));
            }
        }
        Ok(None)
    }
}

/// Source fed through an mpsc channel, used for in-process producers.
pub struct ChannelSource {
    rx: mpsc::Receiver<InboundMessage>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<InboundMessage>) -> Self {
        Self { rx }
    }

    pub fn channel(capacity: usize) -> (mpsc::Sender<InboundMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn next(&mut self) -> Result<Option<InboundMessage>> {
        Ok(self.rx.recv().await)
    }
}

/// Forward everything `source` yields into `tx` until it is exhausted, the
/// receiver is gone or `cancel` fires.
pub async fn pump<S: EventSource>(
    mut source: S,
    tx: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            message = source.next() => message?,
        };
        let Some(message) = message else {
            debug!("Event source exhausted");
            return Ok(());
        };
        if tx.send(message).await.is_err() {
            return Ok(());
        }
    }
}
