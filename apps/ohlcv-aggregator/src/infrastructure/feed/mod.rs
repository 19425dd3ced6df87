//! Newline-Delimited JSON Tick Feed
//!
//! Turns a byte stream with one JSON [`Tick`] per line into a tick stream for
//! [`try_ingest`](crate::try_ingest).
//!
//! ```text
//! {"symbol":"AAPL","price":189.5,"volume":100,"exchange_timestamp":1700000000000}
//! ```
//!
//! Blank lines are ignored. A line that is not a valid tick is logged, counted
//! and skipped so one bad producer record does not end the feed. A read error
//! ends it.

use std::future;
use std::io;

use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_stream::wrappers::LinesStream;

use crate::domain::market::Tick;
use crate::infrastructure::metrics;

/// Tick feed errors.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Reading the underlying source failed.
    #[error("failed to read tick feed: {0}")]
    Read(#[from] io::Error),

    /// A line is not a valid tick.
    #[error("invalid tick on line {line}: {source}")]
    Decode {
        /// 1-based line number.
        line: usize,
        /// JSON error.
        #[source]
        source: serde_json::Error,
    },
}

/// Decode one feed line. `Ok(None)` for a blank line.
///
/// # Errors
///
/// Returns [`FeedError::Decode`] if the line is not a JSON tick.
pub fn decode_line(line: usize, text: &str) -> Result<Option<Tick>, FeedError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| FeedError::Decode { line, source })
}

/// Stream the ticks in `reader`, one JSON object per line.
///
/// Yields `Err` only for read failures; undecodable lines are skipped.
pub fn ndjson_ticks<R>(reader: R) -> impl Stream<Item = Result<Tick, FeedError>>
where
    R: AsyncBufRead + Unpin,
{
    LinesStream::new(reader.lines())
        .enumerate()
        .filter_map(|(index, line)| future::ready(next_tick(index + 1, line)))
}

fn next_tick(line: usize, read: io::Result<String>) -> Option<Result<Tick, FeedError>> {
    let text = match read {
        Ok(text) => text,
        Err(e) => return Some(Err(FeedError::Read(e))),
    };

    match decode_line(line, &text) {
        Ok(tick) => tick.map(Ok),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed tick");
            metrics::record_tick_rejected();
            None
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
