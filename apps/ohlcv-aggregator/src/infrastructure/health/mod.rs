//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, aggregator status reporting, and
//! Prometheus metrics. Used by container orchestrators, load balancers, and
//! monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (NOT READY once shutdown starts)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::SharedAggregator;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Aggregate store status.
    pub aggregates: AggregateStatus,
    /// Subscription statistics.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Accepting ticks and subscribers.
    Healthy,
    /// Shutdown has started.
    ShuttingDown,
}

/// Aggregate store status.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateStatus {
    /// Symbols with a candle.
    pub tracked_symbols: usize,
    /// Ticks applied since start.
    pub ticks_applied: u64,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Symbols with at least one specific registration.
    pub symbols: usize,
    /// Registrations for specific symbols.
    pub symbol_registrations: usize,
    /// Registrations for all symbols.
    pub wildcard_registrations: usize,
    /// Overflow policy in effect.
    pub overflow_policy: &'static str,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    aggregator: SharedAggregator,
    shutdown: CancellationToken,
}

impl HealthServerState {
    /// Create new health server state.
    ///
    /// Readiness is reported as lost once `shutdown` is cancelled.
    #[must_use]
    pub fn new(version: String, aggregator: SharedAggregator, shutdown: CancellationToken) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            aggregator,
            shutdown,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Routes served by the health server.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.shutdown.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    state.aggregator.refresh_gauges();
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let stats = state.aggregator.stats();
    let status = if state.shutdown.is_cancelled() {
        HealthStatus::ShuttingDown
    } else {
        HealthStatus::Healthy
    };

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        aggregates: AggregateStatus {
            tracked_symbols: stats.symbols,
            ticks_applied: stats.ticks_applied,
        },
        subscriptions: SubscriptionStatus {
            symbols: stats.subscriptions.symbol_count,
            symbol_registrations: stats.subscriptions.symbol_registrations,
            wildcard_registrations: stats.subscriptions.wildcard_registrations,
            overflow_policy: state.aggregator.options().overflow_policy.as_str(),
        },
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::application::services::MarketAggregator;
    use crate::domain::market::Tick;
    use crate::domain::subscription::Topic;

    fn state() -> (Arc<HealthServerState>, SharedAggregator, CancellationToken) {
        let aggregator: SharedAggregator = Arc::new(MarketAggregator::default());
        let shutdown = CancellationToken::new();
        let state = Arc::new(HealthServerState::new(
            "1.2.3".to_string(),
            Arc::clone(&aggregator),
            shutdown.clone(),
        ));
        (state, aggregator, shutdown)
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::ShuttingDown).unwrap(),
            "\"shutting_down\""
        );
    }

    #[tokio::test]
    async fn liveness_is_ok() {
        let (state, _, _) = state();

        let (status, body) = get_body(router(state), "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn readiness_flips_when_shutdown_starts() {
        let (state, _, shutdown) = state();

        let (status, body) = get_body(router(Arc::clone(&state)), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");

        shutdown.cancel();

        let (status, body) = get_body(router(state), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "NOT READY");
    }

    #[tokio::test]
    async fn health_reports_aggregator_state() {
        let (state, aggregator, _) = state();
        aggregator.on_tick(&Tick::new("AAPL", 10.0, 1, 1));
        aggregator.on_tick(&Tick::new("MSFT", 20.0, 1, 2));
        let _updates = aggregator.subscribe(Topic::symbol("AAPL"));

        let (status, body) = get_body(router(state), "/health").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "1.2.3");
        assert_eq!(json["aggregates"]["tracked_symbols"], 2);
        assert_eq!(json["aggregates"]["ticks_applied"], 2);
        assert_eq!(json["subscriptions"]["symbol_registrations"], 1);
        assert_eq!(json["subscriptions"]["overflow_policy"], "disconnect");
    }

    #[tokio::test]
    async fn metrics_endpoint_reports_current_subscriptions() {
        crate::infrastructure::metrics::init_metrics().unwrap();
        let (state, aggregator, _) = state();
        aggregator.on_tick(&Tick::new("AAPL", 10.0, 1, 1));
        let kept = aggregator.subscribe(Topic::AllSymbols);
        drop(aggregator.subscribe(Topic::symbol("AAPL")));

        let (status, body) = get_body(router(state), "/metrics").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ohlcv_aggregator_subscriptions_active 1"));
        assert!(body.contains("ohlcv_aggregator_tracked_symbols 1"));
        drop(kept);
    }

    #[tokio::test]
    async fn health_is_unavailable_during_shutdown() {
        let (state, _, shutdown) = state();
        shutdown.cancel();

        let (status, body) = get_body(router(state), "/health").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["status"], "shutting_down");
    }
}
