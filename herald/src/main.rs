use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use herald::config::HeraldConfig;
use herald::database;
use herald::ingest::{ChannelSource, IngestRuntime, JsonLinesSource, LoopbackPublisher, pump};
use herald::logging::{self, LogSettings};
use herald::notification::NotificationService;
use herald::notification::analytics::{EventPublisher, PublishingAnalyticsSink};
use herald::notification::providers::{
    EmailProvider, HttpEmailProvider, HttpInAppFeed, HttpPushProvider,
};
use herald::notification::service::{InAppFeeds, Providers};
use herald::notification::templates::TemplateStore;

const INGEST_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let log_dir = std::env::var_os("LOG_DIR").map(PathBuf::from);
    let _log_guard = logging::init_logging(&LogSettings {
        log_dir: log_dir.as_deref(),
        json: std::env::var("LOG_JSON").is_ok_and(|v| v == "1" || v == "true"),
    })?;

    let config = Arc::new(HeraldConfig::from_env().context("invalid configuration")?);

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let templates = TemplateStore::load(&config.templates_dir)
        .with_context(|| format!("failed to load templates from {:?}", config.templates_dir))?;

    let (queue, source) = ChannelSource::channel(INGEST_QUEUE_CAPACITY);
    let publisher: Arc<dyn EventPublisher> = Arc::new(LoopbackPublisher::new(queue.clone()));
    let providers = build_providers(&config, publisher)?;
    let service = Arc::new(NotificationService::new(
        pool,
        config.clone(),
        Arc::new(templates),
        providers,
    ));

    let shutdown = CancellationToken::new();
    let sweeper = service.sweeper().start(shutdown.child_token());

    let stdin = JsonLinesSource::new(BufReader::new(tokio::io::stdin()));
    let reader = tokio::spawn(pump(stdin, queue, shutdown.child_token()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown requested"),
                Err(e) => warn!(error = %e, "Failed to listen for ctrl-c, shutting down"),
            }
            shutdown.cancel();
        });
    }

    info!("herald started");
    let runtime = IngestRuntime::new(service, config.worker_concurrency, config.event_timeout);
    let outcome = runtime.run(source, shutdown.clone()).await;

    shutdown.cancel();
    match reader.await {
        Ok(Err(e)) => error!(error = %e, "Reading events from stdin failed"),
        Err(e) => error!(error = %e, "Event reader panicked"),
        Ok(Ok(())) => {}
    }
    sweeper.await.ok();

    let stats = outcome?;
    info!(
        handled = stats.handled(),
        failed = stats.failed(),
        "herald stopped"
    );
    Ok(())
}

fn build_providers(
    config: &HeraldConfig,
    publisher: Arc<dyn EventPublisher>,
) -> anyhow::Result<Providers> {
    let endpoints = &config.providers;
    let timeout = config.provider_timeout;
    let push_url = endpoints
        .push_gateway_url
        .as_deref()
        .context("PUSH_GATEWAY_URL is required")?;

    let email = match &endpoints.email_gateway_url {
        Some(url) if config.email_fallback_enabled => Some(Arc::new(HttpEmailProvider::new(
            url,
            endpoints.api_key.clone(),
            timeout,
        )?) as Arc<dyn EmailProvider>),
        _ => None,
    };
    let inapp = match &endpoints.inapp_feed_url {
        Some(url) if config.inapp_enabled => Some(InAppFeeds {
            personal: Arc::new(HttpInAppFeed::new(
                url,
                "personal",
                endpoints.api_key.clone(),
                timeout,
            )?),
            global: Arc::new(HttpInAppFeed::new(
                url,
                "global",
                endpoints.api_key.clone(),
                timeout,
            )?),
        }),
        _ => None,
    };

    Ok(Providers {
        push: Arc::new(HttpPushProvider::new(
            push_url,
            endpoints.api_key.clone(),
            timeout,
        )?),
        email,
        inapp,
        analytics: Arc::new(PublishingAnalyticsSink::new(publisher.clone())),
        publisher,
    })
}
