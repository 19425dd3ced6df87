//! Tick Ingestion
//!
//! Drains an inbound tick stream from a transport into the aggregator. Every
//! tick yielded before the stream ends is applied before the summary is
//! returned.

use futures::{Stream, StreamExt};

use super::MarketAggregator;
use crate::domain::market::Tick;

/// Result of draining a tick stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Ticks applied.
    pub ticks_processed: u64,
}

impl IngestSummary {
    /// Human-readable acknowledgement for the transport.
    #[must_use]
    pub fn message(&self) -> String {
        format!("Received {} ticks", self.ticks_processed)
    }
}

/// Errors from draining a fallible tick stream.
#[derive(Debug, thiserror::Error)]
pub enum IngestError<E>
where
    E: std::error::Error + 'static,
{
    /// The transport failed after `ticks_processed` ticks had been applied.
    #[error("tick stream failed after {ticks_processed} ticks: {source}")]
    Stream {
        /// Ticks applied before the failure.
        ticks_processed: u64,
        /// Transport error.
        #[source]
        source: E,
    },
}

/// Apply every tick from `ticks` until the stream ends.
pub async fn ingest<S>(aggregator: &MarketAggregator, ticks: S) -> IngestSummary
where
    S: Stream<Item = Tick>,
{
    let mut ticks = std::pin::pin!(ticks);
    let mut summary = IngestSummary::default();

    while let Some(tick) = ticks.next().await {
        aggregator.on_tick(&tick);
        summary.ticks_processed += 1;
    }

    tracing::info!(
        ticks_processed = summary.ticks_processed,
        "Tick stream completed"
    );
    summary
}

/// Apply ticks from a fallible stream, stopping at the first error.
///
/// # Errors
///
/// Returns [`IngestError::Stream`] carrying the transport error and the number
/// of ticks applied before it.
pub async fn try_ingest<S, E>(
    aggregator: &MarketAggregator,
    ticks: S,
) -> Result<IngestSummary, IngestError<E>>
where
    S: Stream<Item = Result<Tick, E>>,
    E: std::error::Error + 'static,
{
    let mut ticks = std::pin::pin!(ticks);
    let mut summary = IngestSummary::default();

    while let Some(item) = ticks.next().await {
        match item {
            Ok(tick) => {
                aggregator.on_tick(&tick);
                summary.ticks_processed += 1;
            }
            Err(source) => {
                tracing::warn!(
                    ticks_processed = summary.ticks_processed,
                    error = %source,
                    "Tick stream failed"
                );
                return Err(IngestError::Stream {
                    ticks_processed: summary.ticks_processed,
                    source,
                });
            }
        }
    }

    tracing::info!(
        ticks_processed = summary.ticks_processed,
        "Tick stream completed"
    );
    Ok(summary)
}

// =============================================================================
// Tests
// =============================================================================
