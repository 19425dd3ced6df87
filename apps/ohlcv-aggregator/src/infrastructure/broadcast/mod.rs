//! Channel-Based Candle Delivery
//!
//! Backs every hub registration with a bounded tokio mpsc channel so a
//! transport can consume updates as an async stream.
//!
//! # Architecture
//!
//! Each subscriber gets its own bounded channel. The hub only ever calls
//! `try_send`, so a subscriber that stops reading fills its own queue and is
//! then dropped (or skipped, depending on the overflow policy) without
//! slowing down ingestion or other subscribers. Subscriber code runs where
//! the receiving half is polled, outside every hub and store lock.
//!
//! [`CandleSubscription`] owns the receiving half and the registration
//! handle; dropping it unsubscribes.

use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::domain::market::Candle;
use crate::domain::subscription::{
    CandleSink, DeliveryError, SubscriptionHandle, SubscriptionHub,
};

// =============================================================================
// Channel Sink
// =============================================================================

/// Sending half of a subscriber's bounded candle queue.
#[derive(Debug, Clone)]
pub(crate) struct ChannelSink {
    tx: mpsc::Sender<Arc<Candle>>,
}

impl CandleSink for ChannelSink {
    fn try_deliver(&self, candle: Arc<Candle>) -> Result<(), DeliveryError> {
        self.tx.try_send(candle).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::QueueFull,
            TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

/// Create a bounded candle queue holding at most `capacity` pending candles.
pub(crate) fn candle_channel(
    capacity: NonZeroUsize,
) -> (ChannelSink, mpsc::Receiver<Arc<Candle>>) {
    let (tx, rx) = mpsc::channel(capacity.get());
    (ChannelSink { tx }, rx)
}

// =============================================================================
// Candle Subscription
// =============================================================================

/// A live candle stream bound to a hub registration.
///
/// Yields the initial snapshot (if any) followed by every update. The stream
/// ends if the hub drops the registration. Dropping the subscription
/// unsubscribes it.
pub struct CandleSubscription {
    handle: SubscriptionHandle,
    hub: Arc<SubscriptionHub>,
    inner: ReceiverStream<Arc<Candle>>,
}

impl CandleSubscription {
    /// Bind an already registered receiver to its handle.
    pub(crate) fn new(
        handle: SubscriptionHandle,
        hub: Arc<SubscriptionHub>,
        rx: mpsc::Receiver<Arc<Candle>>,
    ) -> Self {
        Self {
            handle,
            hub,
            inner: ReceiverStream::new(rx),
        }
    }

    /// Registration handle.
    #[must_use]
    pub const fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Receive the next candle, or `None` once the registration is gone.
    pub async fn recv(&mut self) -> Option<Arc<Candle>> {
        self.inner.as_mut().recv().await
    }

    /// Take the next candle if one is already queued.
    pub fn try_recv(&mut self) -> Option<Arc<Candle>> {
        self.inner.as_mut().try_recv().ok()
    }
}

impl std::fmt::Debug for CandleSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleSubscription")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Stream for CandleSubscription {
    type Item = Arc<Candle>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for CandleSubscription {
    fn drop(&mut self) {
        if self.hub.unsubscribe(&self.handle) {
            tracing::debug!(
                subscription_id = self.handle.id(),
                "Candle subscription dropped"
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
