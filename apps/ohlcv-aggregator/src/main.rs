//! OHLCV Aggregator Binary
//!
//! Starts the aggregation engine with its health and metrics endpoint and
//! feeds it newline-delimited JSON ticks from standard input.
//!
//! # Usage
//!
//! ```bash
//! cat ticks.ndjson | cargo run --bin ohlcv-aggregator
//! ```
//!
//! Each input line is one tick:
//!
//! ```text
//! {"symbol":"AAPL","price":189.5,"volume":100,"exchange_timestamp":1700000000000}
//! ```
//!
//! The process keeps serving after the feed ends, until SIGTERM or Ctrl+C.
//!
//! # Environment Variables
//!
//! - `AGGREGATOR_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `AGGREGATOR_OBSERVER_QUEUE_CAPACITY`: Per-subscriber queue size (default: 1024)
//! - `AGGREGATOR_OVERFLOW_POLICY`: disconnect | drop_update (default: disconnect)
//! - `AGGREGATOR_STATS_INTERVAL_SECS`: Stats reporter period, 0 disables (default: 15)
//! - `AGGREGATOR_TICK_SOURCE`: stdin | none (default: stdin)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: ohlcv-aggregator)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use ohlcv_aggregator::infrastructure::feed::ndjson_ticks;
use ohlcv_aggregator::infrastructure::health::{HealthServer, HealthServerState};
use ohlcv_aggregator::infrastructure::telemetry;
use ohlcv_aggregator::{
    AggregatorConfig, MarketAggregator, SharedAggregator, TickSource, init_metrics, try_ingest,
};
use tokio::io::BufReader;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Grace period for blocking work (a pending stdin read) at exit.
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(run());
    // A stdin read cannot be cancelled; don't wait on it forever.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
    result
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting OHLCV aggregator");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = AggregatorConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let aggregator: SharedAggregator = Arc::new(MarketAggregator::new(config.delivery.into()));

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&aggregator),
        shutdown_token.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    if let Some(interval) = config.stats_interval {
        let reporter_aggregator = Arc::clone(&aggregator);
        let reporter_shutdown = shutdown_token.clone();
        tokio::spawn(async move {
            report_stats(reporter_aggregator, interval, reporter_shutdown).await;
        });
    }

    if config.tick_source == TickSource::Stdin {
        let feed_aggregator = Arc::clone(&aggregator);
        let feed_shutdown = shutdown_token.clone();
        tokio::spawn(async move {
            ingest_stdin(feed_aggregator, feed_shutdown).await;
        });
    }

    tracing::info!("OHLCV aggregator ready");

    await_shutdown(shutdown_token).await;

    if let Err(e) = health_task.await {
        tracing::warn!(error = %e, "Health server task ended abnormally");
    }

    let stats = aggregator.stats();
    tracing::info!(
        symbols = stats.symbols,
        ticks_applied = stats.ticks_applied,
        "OHLCV aggregator stopped"
    );
    Ok(())
}

/// Apply ticks from standard input until it ends or shutdown starts.
async fn ingest_stdin(aggregator: SharedAggregator, shutdown: CancellationToken) {
    let ticks = ndjson_ticks(BufReader::new(tokio::io::stdin()));

    tokio::select! {
        () = shutdown.cancelled() => {
            tracing::info!("Tick feed stopped for shutdown");
        }
        result = try_ingest(&aggregator, ticks) => match result {
            Ok(summary) => tracing::info!(
                ticks_processed = summary.ticks_processed,
                "Tick feed ended: {}",
                summary.message()
            ),
            Err(e) => tracing::error!(error = %e, "Tick feed failed"),
        },
    }
}

/// Periodically publish gauges and log an engine summary.
async fn report_stats(aggregator: SharedAggregator, period: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let stats = aggregator.refresh_gauges();

                tracing::info!(
                    symbols = stats.symbols,
                    ticks_applied = stats.ticks_applied,
                    symbol_registrations = stats.subscriptions.symbol_registrations,
                    wildcard_registrations = stats.subscriptions.wildcard_registrations,
                    "Aggregator stats"
                );
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AggregatorConfig) {
    tracing::info!(
        health_port = config.server.health_port,
        observer_queue_capacity = config.delivery.observer_queue_capacity.get(),
        overflow_policy = config.delivery.overflow_policy.as_str(),
        tick_source = config.tick_source.as_str(),
        stats_interval_secs = config.stats_interval.map_or(0, |d| d.as_secs()),
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    tracing::info!("Graceful shutdown started");
}
