//! Observer sinks.
//!
//! A sink is the hub's only view of a subscriber: the sending half of a
//! bounded queue that accepts a candle without blocking, or reports why it
//! cannot. Sinks are crate-internal so the hub only ever holds queues it
//! created; subscriber code runs on the receiving side, never under a hub or
//! store lock.

use std::sync::Arc;

use crate::domain::market::Candle;

/// Why a sink refused a candle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The sink's bounded queue has no room.
    #[error("observer queue is full")]
    QueueFull,
    /// The sink is permanently gone.
    #[error("observer sink is closed")]
    Closed,
}

impl DeliveryError {
    /// Metric label for this error.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueueFull => "queue_full",
            Self::Closed => "closed",
        }
    }
}

/// A non-blocking hand-off into a subscriber's queue.
///
/// `try_deliver` runs on the ingestion path while the symbol's slot is held,
/// so implementations must only enqueue.
#[cfg_attr(test, mockall::automock)]
pub(crate) trait CandleSink: Send {
    /// Enqueue `candle` without waiting.
    fn try_deliver(&self, candle: Arc<Candle>) -> Result<(), DeliveryError>;
}

#[cfg(test)]
pub(crate) struct FnSink<F>(F);

#[cfg(test)]
pub(crate) const fn sink_fn<F>(f: F) -> FnSink<F>
where
    F: Fn(Arc<Candle>) -> Result<(), DeliveryError> + Send,
{
    FnSink(f)
}

#[cfg(test)]
impl<F> CandleSink for FnSink<F>
where
    F: Fn(Arc<Candle>) -> Result<(), DeliveryError> + Send,
{
    fn try_deliver(&self, candle: Arc<Candle>) -> Result<(), DeliveryError> {
        (self.0)(candle)
    }
}
