use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::info;

mod config;
mod dashboard;
mod enrich;
mod feed;
mod notify;
mod tracker;

use config::Config;
use dashboard::AppState;
use enrich::StreamLinkScraper;
use feed::{FeedClient, FeedClientConfig};
use notify::{BroadcastSink, DiscordWebhookSink, Dispatcher, Sink};
use tracker::{
    AdaptivePolling, AdaptivePollingConfig, MatchStore, TrackerConfig, TrackerService,
};

/// Grace period for in-flight enrichment tasks after shutdown is signaled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    info!("Tracking live matches from {}", config.feed_api_url);

    let client = Arc::new(FeedClient::new(FeedClientConfig {
        base_url: config.feed_api_url.clone(),
        connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        request_timeout: Duration::from_millis(config.request_timeout_ms),
        retries: config.fetch_retries,
        retry_delay: Duration::from_millis(config.retry_delay_ms),
        max_consecutive_failures: config.max_consecutive_failures,
        breaker_timeout: config.breaker_timeout(),
    })?);

    let store = Arc::new(MatchStore::new(
        config.stale_after(),
        config.max_match_failures,
    ));

    let scraper = Arc::new(StreamLinkScraper::new(
        Duration::from_millis(config.enrich_timeout_ms),
        Duration::from_secs(config.enrich_cooldown_secs),
    )?);

    // Transition topic feeding the WebSocket route.
    let (topic_tx, _) = broadcast::channel(256);

    let mut sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(BroadcastSink::new(topic_tx.clone()))];
    if let Some(webhook_url) = &config.discord_webhook_url {
        sinks.push(Arc::new(DiscordWebhookSink::new(
            webhook_url,
            &config.webhook_username,
        )?));
        info!("Discord webhook sink configured");
    }
    info!("Configured {} notification sink(s)", sinks.len());

    let dispatcher = Arc::new(Dispatcher::new(
        sinks,
        Duration::from_millis(config.dispatch_timeout_ms),
    ));

    let scheduler = AdaptivePolling::new(AdaptivePollingConfig {
        active_interval: config.active_interval(),
        idle_interval: config.idle_interval(),
        deep_idle_interval: config.deep_idle_interval(),
        max_empty_polls: config.max_empty_polls,
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tracker = Arc::new(TrackerService::new(
        client,
        Arc::clone(&store),
        scraper,
        dispatcher,
        scheduler,
        TrackerConfig {
            health_check_threshold: Duration::from_millis(config.health_check_threshold_ms),
            max_cycle_failures: config.max_consecutive_failures,
            enable_stream_scraping: config.enable_stream_scraping,
            max_enrich_tasks: config.max_enrich_tasks,
        },
        shutdown_rx,
    ));

    let poll_loop = tokio::spawn(Arc::clone(&tracker).run());

    // Dashboard + admin surface.
    let state = AppState {
        tracker,
        store,
        topic: topic_tx,
    };
    let app = dashboard::router(state);
    let addr: SocketAddr = config.dashboard_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Dashboard listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    // Stop arming further polls; give background tasks a bounded grace
    // period, then exit regardless.
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(SHUTDOWN_GRACE, poll_loop).await.is_err() {
        info!("Poll loop did not stop within grace period, abandoning");
    }
    info!("Shutdown complete");

    Ok(())
}
