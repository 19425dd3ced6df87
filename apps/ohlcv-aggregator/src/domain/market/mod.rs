//! Market Data Types
//!
//! Core value types for the aggregation pipeline: the inbound [`Tick`] and the
//! running OHLCV [`Candle`]. Both are immutable values; a candle update always
//! produces a new `Candle` instead of mutating one in place, so a reader
//! holding a snapshot never observes a partial update.

use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// A symbol string (e.g. `"AAPL"`).
pub type Symbol = String;

/// One observed trade/quote event for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Traded price.
    pub price: f64,
    /// Traded volume.
    pub volume: i64,
    /// Exchange timestamp of the event.
    pub exchange_timestamp: i64,
}

impl Tick {
    /// Create a new tick.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, price: f64, volume: i64, exchange_timestamp: i64) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            volume,
            exchange_timestamp,
        }
    }
}

/// Running OHLCV aggregate for a symbol since its first observed tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Price of the first applied tick.
    pub open: f64,
    /// Highest applied price.
    pub high: f64,
    /// Lowest applied price.
    pub low: f64,
    /// Price of the most recently applied tick.
    pub close: f64,
    /// Sum of all applied tick volumes.
    pub volume: i64,
    /// Exchange timestamp of the most recently applied tick.
    pub timestamp: i64,
}

impl Candle {
    /// Build the first candle for a symbol from its first tick.
    #[must_use]
    pub fn open_from(tick: &Tick) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume,
            timestamp: tick.exchange_timestamp,
        }
    }

    /// Fold a tick into this candle, producing the next value.
    ///
    /// `open` is kept, `high`/`low` widen to include the price, `close` and
    /// `timestamp` always take the tick's values (last applied wins, even if
    /// the tick is older than the previous one).
    #[must_use]
    pub fn advance(&self, tick: &Tick) -> Self {
        Self {
            symbol: self.symbol.clone(),
            open: self.open,
            high: self.high.max(tick.price),
            low: self.low.min(tick.price),
            close: tick.price,
            volume: self.volume.saturating_add(tick.volume),
            timestamp: tick.exchange_timestamp,
        }
    }

    /// Whether `low <= open, close <= high` holds.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
    }
}

// =============================================================================
// Tests
// =============================================================================
