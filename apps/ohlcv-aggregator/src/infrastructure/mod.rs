//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete delivery channels, the tick feed,
//! configuration and the operational surface (health, metrics, tracing).

/// Bounded subscriber queues and candle streams.
pub mod broadcast;

/// Configuration loading.
pub mod config;

/// Newline-delimited JSON tick feed.
pub mod feed;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
