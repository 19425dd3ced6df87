#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::cast_precision_loss,
        clippy::items_after_statements
    )
)]

//! OHLCV Aggregator - Real-time Market Data Aggregation Core
//!
//! Maintains a running open/high/low/close/volume aggregate per symbol from a
//! high-rate tick stream, and fans every update out to a changing set of
//! subscribers without ever blocking ingestion.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core aggregation logic and data types
//!   - `market`: Tick and candle values
//!   - `aggregate`: Per-symbol atomic candle store
//!   - `subscription`: Observer registry and fan-out
//!
//! - **Application**: Use cases
//!   - `services`: The market aggregator and tick ingestion
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `broadcast`: Bounded subscriber queues and candle streams
//!   - `config`: Configuration loading
//!   - `feed`: Newline-delimited JSON tick feed
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`: Prometheus metrics
//!   - `telemetry`: Tracing setup
//!
//! # Data Flow
//!
//! ```text
//!                ┌──────────────┐     ┌──────────────┐
//! Tick stream ──►│  Aggregate   │────►│ Subscription │──► Observer queue 1 ──► stream
//!                │    Store     │     │     Hub      │──► Observer queue 2 ──► stream
//!                └──────────────┘     └──────────────┘──► Observer queue N ──► stream
//! ```
//!
//! The hub only enqueues. Subscriber code runs wherever its
//! [`CandleSubscription`] is polled, never under an aggregator lock.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core aggregation types with no I/O.
pub mod domain;

/// Application layer - Use cases.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::aggregate::AggregateStore;
pub use domain::market::{Candle, Symbol, Tick};
pub use domain::subscription::{
    DeliveryError, OverflowPolicy, PublishReport, SubscriptionHandle, SubscriptionHub,
    SubscriptionId, SubscriptionStats, Topic,
};

// Application services
pub use application::services::{
    AggregatorError, AggregatorOptions, AggregatorStats, IngestError, IngestSummary,
    MarketAggregator, SharedAggregator, ingest, try_ingest,
};

// Infrastructure config
pub use infrastructure::config::{
    AggregatorConfig, ConfigError, DEFAULT_OBSERVER_QUEUE_CAPACITY, DeliverySettings,
    ServerSettings, TickSource,
};

// Candle streams
pub use infrastructure::broadcast::CandleSubscription;

// Tick feed
pub use infrastructure::feed::{FeedError, ndjson_ticks};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
