//! Prometheus Metrics Module
//!
//! Exposes aggregator metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ingestion**: Ticks applied and apply+publish latency
//! - **Delivery**: Candles delivered, updates skipped, observers dropped
//! - **State**: Tracked symbols and active registrations
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::subscription::{DeliveryError, PublishReport};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Calling it again returns the handle installed by the first call.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

const TICKS_APPLIED: &str = "ohlcv_aggregator_ticks_applied_total";
const TICKS_REJECTED: &str = "ohlcv_aggregator_ticks_rejected_total";
const CANDLES_DELIVERED: &str = "ohlcv_aggregator_candles_delivered_total";
const UPDATES_SKIPPED: &str = "ohlcv_aggregator_updates_skipped_total";
const OBSERVERS_DROPPED: &str = "ohlcv_aggregator_observers_dropped_total";
const TRACKED_SYMBOLS: &str = "ohlcv_aggregator_tracked_symbols";
const ACTIVE_SUBSCRIPTIONS: &str = "ohlcv_aggregator_subscriptions_active";
const APPLY_DURATION: &str = "ohlcv_aggregator_apply_seconds";

fn register_metrics() {
    // Ingestion
    describe_counter!(TICKS_APPLIED, "Total ticks applied to the aggregate store");
    describe_counter!(TICKS_REJECTED, "Total feed lines skipped as invalid ticks");
    describe_histogram!(
        APPLY_DURATION,
        "Time to apply a tick and publish the resulting candle"
    );

    // Delivery
    describe_counter!(
        CANDLES_DELIVERED,
        "Total candles accepted by observer sinks"
    );
    describe_counter!(
        UPDATES_SKIPPED,
        "Total updates skipped for observers with full queues"
    );
    describe_counter!(
        OBSERVERS_DROPPED,
        "Total observers removed after failed delivery, by reason"
    );

    // State
    describe_gauge!(TRACKED_SYMBOLS, "Number of symbols with a candle");
    describe_gauge!(
        ACTIVE_SUBSCRIPTIONS,
        "Number of active observer registrations"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one applied tick.
pub fn record_tick_applied() {
    counter!(TICKS_APPLIED).increment(1);
}

/// Record one feed line that could not be decoded.
pub fn record_tick_rejected() {
    counter!(TICKS_REJECTED).increment(1);
}

/// Record the outcome of one publish.
pub fn record_publish(report: &PublishReport) {
    if report.delivered > 0 {
        counter!(CANDLES_DELIVERED).increment(report.delivered as u64);
    }
    if report.skipped > 0 {
        counter!(UPDATES_SKIPPED).increment(report.skipped as u64);
    }
    if report.closed > 0 {
        record_observers_dropped(DeliveryError::Closed, report.closed as u64);
    }
    let overflowed = report.dropped.saturating_sub(report.closed);
    if overflowed > 0 {
        record_observers_dropped(DeliveryError::QueueFull, overflowed as u64);
    }
}

/// Record observers removed for `reason`.
pub fn record_observers_dropped(reason: DeliveryError, count: u64) {
    counter!(OBSERVERS_DROPPED, "reason" => reason.as_str()).increment(count);
}

/// Record apply+publish duration.
pub fn record_apply_duration(duration: Duration) {
    histogram!(APPLY_DURATION).record(duration.as_secs_f64());
}

/// Update the tracked symbol count.
pub fn set_tracked_symbols(count: f64) {
    gauge!(TRACKED_SYMBOLS).set(count);
}

/// Update the active registration count.
pub fn set_active_subscriptions(count: f64) {
    gauge!(ACTIVE_SUBSCRIPTIONS).set(count);
}

// =============================================================================
// Tests
// =============================================================================
