//! Application Layer - Use cases.
//!
//! This layer wires the domain together into the aggregation engine and the
//! ingestion entry points used by transports.

/// Aggregation engine and tick ingestion.
pub mod services;
