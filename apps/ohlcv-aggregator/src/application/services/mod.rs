//! Application Services
//!
//! Services that orchestrate the domain and expose it to transports.
//!
//! - `aggregator`: the single aggregation engine (ingest, query, subscribe)
//! - `ingestion`: drains an inbound tick stream into the engine

mod aggregator;
mod ingestion;

pub use aggregator::{
    AggregatorError, AggregatorOptions, AggregatorStats, MarketAggregator, SharedAggregator,
};
pub use ingestion::{IngestError, IngestSummary, ingest, try_ingest};
