//! Fraud Triage Pipeline - Main Entry Point
//!
//! Consumes transaction events from the durable stream, triages them through
//! the rule engine, persists cases, escalates gray areas to the AI queue and
//! serves the dashboard API plus live push channel.

use anyhow::Result;
use fraud_triage_pipeline::{
    api::{create_router, AppState},
    cases::CaseService,
    config::AppConfig,
    meter::TrafficMeter,
    pipeline::TriagePipeline,
    push::{PushBus, StatsBroadcaster},
    store::MemoryCaseStore,
    stream::{EventSource, RedisEventSource},
    RedisAiQueue,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fraud_triage_pipeline=info".parse()?),
        )
        .init();

    info!("Starting Fraud Triage Pipeline");

    // Load configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "config file unavailable, using defaults");
        AppConfig::default()
    });
    info!(
        "Triage thresholds: approve<{:.2}, block>{:.2}, income multiple {:.0}x",
        config.rules.approve_below, config.rules.block_above, config.rules.income_multiple
    );

    // Shared components
    let meter = Arc::new(TrafficMeter::new());
    let push = PushBus::new(config.pipeline.push_buffer);
    let store = Arc::new(MemoryCaseStore::new());

    // Connect to Redis and bind the consumer group
    let source = Arc::new(RedisEventSource::connect(&config).await?);
    if let Err(e) = source.ensure_group().await {
        warn!(error = %e, "consumer group setup failed, reads may fail until it exists");
    }
    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let ai_conn = redis::aio::ConnectionManager::new(redis_client).await?;
    let ai_queue = Arc::new(RedisAiQueue::new(ai_conn, &config));
    info!(
        stream = %config.streams.transaction_stream,
        group = %config.streams.consumer_group,
        consumer = %config.streams.consumer_name,
        ai_queue = %config.streams.ai_queue_stream,
        "stream adapters ready"
    );

    // Triage loop
    let pipeline = Arc::new(TriagePipeline::new(
        source,
        store.clone(),
        ai_queue,
        push.clone(),
        meter.clone(),
        &config,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let triage_task = tokio::spawn(pipeline.run(
        Duration::from_millis(config.pipeline.tick_interval_ms),
        shutdown_rx.clone(),
    ));

    // Stats broadcaster
    let broadcaster = StatsBroadcaster::new(
        store.clone(),
        meter,
        push.clone(),
        Duration::from_millis(config.http.stats_interval_ms),
    );
    let last_tps = broadcaster.last_tps_handle();
    let stats_task = tokio::spawn(broadcaster.run(shutdown_rx));

    // HTTP + WebSocket surface
    let state = AppState {
        cases: CaseService::new(store, push.clone()),
        push,
        last_tps,
    };
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.http.bind_addr).await?;
    info!(addr = %config.http.bind_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "shutdown signal handler failed");
            }
            info!("shutdown signal received");
        })
        .await?;

    // Stop the loops: the triage tick finishes its current batch, the stats
    // broadcaster stops on its next boundary.
    let _ = shutdown_tx.send(true);
    let _ = triage_task.await;
    let _ = stats_task.await;

    info!("Pipeline shut down");
    Ok(())
}
