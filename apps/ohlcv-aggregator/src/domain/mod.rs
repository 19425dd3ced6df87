//! Domain Layer - Core aggregation types and business logic.
//!
//! This layer contains the market data values, the per-symbol aggregate
//! store and the subscription hub. Nothing here performs I/O.

/// Tick and candle value types.
pub mod market;

/// Per-symbol running OHLCV aggregates.
pub mod aggregate;

/// Observer registration and non-blocking fan-out.
pub mod subscription;
