//! Bounded concurrent consumption of inbound events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use super::{EventSource, InboundMessage, SourceTopic};
use crate::notification::NotificationService;
use crate::{Error, Result};

/// Something that processes one decoded-or-not event payload.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(
        &self,
        cancel: &CancellationToken,
        topic: SourceTopic,
        value: &[u8],
    ) -> Result<()>;
}

#[async_trait]
impl EventHandler for NotificationService {
    async fn handle(
        &self,
        cancel: &CancellationToken,
        topic: SourceTopic,
        value: &[u8],
    ) -> Result<()> {
        self.ingest_event(cancel, topic, value).await
    }
}

/// Counts of one [`IngestRuntime::run`].
#[derive(Debug, Default)]
pub struct IngestStats {
    handled: AtomicU64,
    failed: AtomicU64,
}

impl IngestStats {
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Pulls messages and runs one task per event.
///
/// At most `concurrency` events are in flight. Every event gets its own
/// cancellation token, cancelled once `event_timeout` elapses. Stopping the
/// runtime stops intake; events already started run to completion or to
/// their deadline.
#[derive(Clone)]
pub struct IngestRuntime {
    handler: Arc<dyn EventHandler>,
    semaphore: Arc<Semaphore>,
    event_timeout: Duration,
}

impl IngestRuntime {
    pub fn new(
        handler: Arc<dyn EventHandler>,
        concurrency: usize,
        event_timeout: Duration,
    ) -> Self {
        Self {
            handler,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            event_timeout,
        }
    }

    /// Consume `source` until it is exhausted or `shutdown` fires, then wait
    /// for the in-flight events.
    pub async fn run<S: EventSource>(
        &self,
        mut source: S,
        shutdown: CancellationToken,
    ) -> Result<Arc<IngestStats>> {
        let stats = Arc::new(IngestStats::default());
        let mut tasks = JoinSet::new();
        info!(
            concurrency = self.semaphore.available_permits(),
            timeout = ?self.event_timeout,
            "Ingest started"
        );

        let outcome = loop {
            let permit = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => break Err(Error::Other(format!("Semaphore error: {e}"))),
                },
            };
            let message = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                message = source.next() => message,
            };
            let message = match message {
                Ok(Some(message)) => message,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };

            while tasks.try_join_next().is_some() {}
            let handler = self.handler.clone();
            let stats = stats.clone();
            let timeout = self.event_timeout;
            let span = info_span!(
                "event",
                id = %Uuid::new_v4(),
                topic = %message.topic,
                key = %message.key
            );
            tasks.spawn(
                async move {
                    let _permit = permit;
                    process(handler.as_ref(), message, timeout, &stats).await;
                }
                .instrument(span),
            );
        };

        if !tasks.is_empty() {
            debug!(in_flight = tasks.len(), "Waiting for in-flight events");
        }
        while tasks.join_next().await.is_some() {}
        info!(
            handled = stats.handled(),
            failed = stats.failed(),
            "Ingest stopped"
        );
        outcome.map(|()| stats)
    }
}

async fn process(
    handler: &dyn EventHandler,
    message: InboundMessage,
    timeout: Duration,
    stats: &IngestStats,
) {
    let cancel = CancellationToken::new();
    let deadline = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            cancel.cancel();
        })
    };
    let result = handler.handle(&cancel, message.topic, &message.value).await;
    deadline.abort();

    stats.handled.fetch_add(1, Ordering::Relaxed);
    let Err(err) = result else {
        return;
    };
    if err.is_unsupported() {
        warn!(error = %err, "Event partially unsupported");
        return;
    }
    stats.failed.fetch_add(1, Ordering::Relaxed);
    error!(error = %err, "Failed to handle event");
}
