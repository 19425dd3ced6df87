//! Market Aggregator Service
//!
//! Couples the aggregate store with the subscription hub. Every tick is
//! applied and published inside the same per-symbol critical section, so
//! observers see a symbol's candles in the order they were produced.
//!
//! Observers never run inside that critical section. Each subscription gets
//! its own bounded queue; the hub only enqueues into it, and the subscriber
//! reads from it on its own task.
//!
//! One instance is created at process start and shared through
//! [`SharedAggregator`]; tests build their own.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::domain::aggregate::AggregateStore;
use crate::domain::market::{Candle, Symbol, Tick};
use crate::domain::subscription::{
    OverflowPolicy, PublishReport, SubscriptionHandle, SubscriptionHub, SubscriptionStats, Topic,
};
use crate::infrastructure::broadcast::{CandleSubscription, candle_channel};
use crate::infrastructure::config::DeliverySettings;
use crate::infrastructure::metrics;

// =============================================================================
// Options
// =============================================================================

/// Delivery options for the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorOptions {
    /// Default capacity of each subscriber's queue.
    pub observer_queue_capacity: NonZeroUsize,
    /// What to do when a subscriber's queue is full.
    pub overflow_policy: OverflowPolicy,
}

impl Default for AggregatorOptions {
    fn default() -> Self {
        DeliverySettings::default().into()
    }
}

impl From<DeliverySettings> for AggregatorOptions {
    fn from(settings: DeliverySettings) -> Self {
        Self {
            observer_queue_capacity: settings.observer_queue_capacity,
            overflow_policy: settings.overflow_policy,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced at the query boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregatorError {
    /// No tick was ever applied for the symbol.
    #[error("symbol not found: {0}")]
    SymbolNotFound(Symbol),
}

// =============================================================================
// Market Aggregator
// =============================================================================

/// The aggregation engine: one store, one hub.
///
/// # Example
///
/// ```rust
/// use ohlcv_aggregator::{MarketAggregator, Tick, Topic};
///
/// let aggregator = MarketAggregator::default();
/// aggregator.on_tick(&Tick::new("AAPL", 10.0, 100, 1));
///
/// let mut updates = aggregator.subscribe(Topic::symbol("AAPL"));
/// aggregator.on_tick(&Tick::new("AAPL", 11.0, 50, 2));
///
/// // Snapshot first, then the live update.
/// assert_eq!(updates.try_recv().unwrap().close, 10.0);
/// assert_eq!(updates.try_recv().unwrap().close, 11.0);
/// assert!(aggregator.snapshot("MSFT").is_none());
/// ```
#[derive(Debug)]
pub struct MarketAggregator {
    store: AggregateStore,
    hub: Arc<SubscriptionHub>,
    options: AggregatorOptions,
    ticks_applied: AtomicU64,
}

/// Shared aggregator reference.
pub type SharedAggregator = Arc<MarketAggregator>;

impl Default for MarketAggregator {
    fn default() -> Self {
        Self::new(AggregatorOptions::default())
    }
}

impl MarketAggregator {
    /// Create an aggregator with no state and no subscribers.
    #[must_use]
    pub fn new(options: AggregatorOptions) -> Self {
        Self {
            store: AggregateStore::new(),
            hub: Arc::new(SubscriptionHub::new(options.overflow_policy)),
            options,
            ticks_applied: AtomicU64::new(0),
        }
    }

    /// Apply a tick and publish the resulting candle.
    ///
    /// Returns the candle stored by this tick. Never waits on a subscriber.
    pub fn on_tick(&self, tick: &Tick) -> Arc<Candle> {
        let started = Instant::now();
        let mut report = PublishReport::default();

        let candle = self.store.apply_with(tick, |candle| {
            report = self.hub.publish(&tick.symbol, candle);
        });

        self.ticks_applied.fetch_add(1, Ordering::Relaxed);
        metrics::record_tick_applied();
        metrics::record_publish(&report);
        metrics::record_apply_duration(started.elapsed());

        if report.dropped > 0 {
            tracing::warn!(
                symbol = %tick.symbol,
                dropped = report.dropped,
                policy = self.options.overflow_policy.as_str(),
                "Dropped observers after failed delivery"
            );
        }

        candle
    }

    /// Current candle for `symbol`, or `None` if it was never ticked.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Option<Arc<Candle>> {
        self.store.snapshot(symbol)
    }

    /// Current candle for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::SymbolNotFound`] if no tick was ever applied
    /// for `symbol`.
    pub fn require_snapshot(&self, symbol: &str) -> Result<Arc<Candle>, AggregatorError> {
        self.snapshot(symbol)
            .ok_or_else(|| AggregatorError::SymbolNotFound(symbol.to_owned()))
    }

    /// Subscribe to `topic` and get its candles as a stream.
    ///
    /// The stream yields the current snapshot (every current candle for
    /// [`Topic::AllSymbols`]) and then every update, buffered in a queue of
    /// [`AggregatorOptions::observer_queue_capacity`] candles. Dropping the
    /// subscription unsubscribes.
    #[must_use]
    pub fn subscribe(&self, topic: Topic) -> CandleSubscription {
        self.subscribe_with_capacity(topic, self.options.observer_queue_capacity)
    }

    /// [`subscribe`](Self::subscribe) with a queue of `capacity` candles.
    #[must_use]
    pub fn subscribe_with_capacity(
        &self,
        topic: Topic,
        capacity: NonZeroUsize,
    ) -> CandleSubscription {
        let (sink, rx) = candle_channel(capacity);
        let handle = self.hub.subscribe(topic, &self.store, sink);
        CandleSubscription::new(handle, Arc::clone(&self.hub), rx)
    }

    /// Remove a registration. Idempotent.
    ///
    /// The subscription's stream ends once its queued candles are drained.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.hub.unsubscribe(handle)
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &AggregateStore {
        &self.store
    }

    /// The underlying hub.
    #[must_use]
    pub const fn hub(&self) -> &Arc<SubscriptionHub> {
        &self.hub
    }

    /// Delivery options in effect.
    #[must_use]
    pub const fn options(&self) -> AggregatorOptions {
        self.options
    }

    /// Engine statistics.
    #[must_use]
    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            symbols: self.store.len(),
            ticks_applied: self.ticks_applied.load(Ordering::Relaxed),
            subscriptions: self.hub.stats(),
        }
    }

    /// Set the tracked-symbol and active-subscription gauges from current
    /// state.
    ///
    /// Called wherever the gauges are read, so registrations removed by a
    /// dropped stream or by a failed delivery are reflected too.
    #[allow(clippy::cast_precision_loss)]
    pub fn refresh_gauges(&self) -> AggregatorStats {
        let stats = self.stats();
        metrics::set_tracked_symbols(stats.symbols as f64);
        metrics::set_active_subscriptions(stats.subscriptions.total_registrations() as f64);
        stats
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Aggregator statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorStats {
    /// Tracked symbols.
    pub symbols: usize,
    /// Ticks applied since start.
    pub ticks_applied: u64,
    /// Registry statistics.
    pub subscriptions: SubscriptionStats,
}

// =============================================================================
// Tests
// =============================================================================
