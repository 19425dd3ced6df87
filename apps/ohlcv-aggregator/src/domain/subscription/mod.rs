//! Subscription Hub
//!
//! Tracks which observers want candle updates and fans every published
//! candle out to them.
//!
//! # Design
//!
//! The registry keeps one copy-on-write list of registrations per symbol plus
//! one list for "all symbols" observers:
//! - `publish` clones the matching `Arc` lists under a short read lock and
//!   delivers outside it, so subscribe/unsubscribe never race with iteration
//! - `subscribe`/`unsubscribe` rebuild only the affected list; an emptied list
//!   is removed so the registry cannot grow across churn
//! - delivery is `CandleSink::try_deliver` into a bounded queue the hub was
//!   handed at subscribe time; it never waits and never runs subscriber code
//!
//! A registration that fails delivery (sink closed, or queue full under
//! [`OverflowPolicy::Disconnect`]) is removed by the publish that saw it fail.
//!
//! Each registration guards its sink with its own lock. Unsubscribing takes the
//! sink out under that lock, so once `unsubscribe` returns no publish that is
//! still holding an older list can reach the sink.

mod sink;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

pub(crate) use sink::CandleSink;
pub use sink::DeliveryError;

#[cfg(test)]
pub(crate) use sink::{MockCandleSink, sink_fn};

use crate::domain::aggregate::AggregateStore;
use crate::domain::market::{Candle, Symbol};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a registration.
pub type SubscriptionId = u64;

/// What an observer is registered for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Updates for one symbol.
    Symbol(Symbol),
    /// Updates for every symbol.
    AllSymbols,
}

impl Topic {
    /// Topic for a single symbol.
    #[must_use]
    pub fn symbol(symbol: impl Into<Symbol>) -> Self {
        Self::Symbol(symbol.into())
    }
}

/// Handle returned by [`SubscriptionHub::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: Topic,
}

impl SubscriptionHandle {
    /// Registration identifier.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Topic the registration was made for.
    #[must_use]
    pub const fn topic(&self) -> &Topic {
        &self.topic
    }
}

/// What happens when an observer's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Drop the observer from the registry.
    #[default]
    Disconnect,
    /// Skip this update for the observer and keep it registered.
    DropUpdate,
}

impl OverflowPolicy {
    /// Parse a policy name (`disconnect` or `drop_update`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "disconnect" => Some(Self::Disconnect),
            "drop_update" => Some(Self::DropUpdate),
            _ => None,
        }
    }

    /// Policy name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnect => "disconnect",
            Self::DropUpdate => "drop_update",
        }
    }
}

/// Outcome of a single [`SubscriptionHub::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Observers that accepted the candle.
    pub delivered: usize,
    /// Observers that skipped it and stay registered.
    pub skipped: usize,
    /// Observers removed because delivery failed.
    pub dropped: usize,
    /// Of `dropped`, observers whose sink was already closed.
    pub closed: usize,
}

impl PublishReport {
    fn record(&mut self, outcome: Delivery) {
        match outcome {
            Delivery::Delivered => self.delivered += 1,
            Delivery::Skipped => self.skipped += 1,
            Delivery::Failed(err) => {
                self.dropped += 1;
                if err == DeliveryError::Closed {
                    self.closed += 1;
                }
            }
            Delivery::Inactive => {}
        }
    }
}

// =============================================================================
// Registration
// =============================================================================

enum Delivery {
    Delivered,
    Skipped,
    Failed(DeliveryError),
    Inactive,
}

struct Registration {
    id: SubscriptionId,
    sink: Mutex<Option<Box<dyn CandleSink>>>,
}

impl Registration {
    fn deliver(&self, candle: &Arc<Candle>, policy: OverflowPolicy) -> Delivery {
        let mut sink = self.sink.lock();
        let Some(active) = sink.as_ref() else {
            return Delivery::Inactive;
        };

        match active.try_deliver(Arc::clone(candle)) {
            Ok(()) => Delivery::Delivered,
            Err(DeliveryError::QueueFull) if policy == OverflowPolicy::DropUpdate => {
                Delivery::Skipped
            }
            Err(err) => {
                // Terminal: release the sink now, the registry entry follows.
                *sink = None;
                Delivery::Failed(err)
            }
        }
    }

    fn close(&self) {
        self.sink.lock().take();
    }
}

type RegistrationList = Arc<Vec<Arc<Registration>>>;

#[derive(Default)]
struct Registry {
    by_symbol: HashMap<Symbol, RegistrationList>,
    all_symbols: RegistrationList,
}

impl Registry {
    fn list_mut(&mut self, topic: &Topic) -> Option<&mut RegistrationList> {
        match topic {
            Topic::Symbol(symbol) => self.by_symbol.get_mut(symbol),
            Topic::AllSymbols => Some(&mut self.all_symbols),
        }
    }

    fn insert(&mut self, topic: &Topic, registration: Arc<Registration>) {
        let list = match topic {
            Topic::Symbol(symbol) => self.by_symbol.entry(symbol.clone()).or_default(),
            Topic::AllSymbols => &mut self.all_symbols,
        };

        let mut next = Vec::with_capacity(list.len() + 1);
        next.extend(list.iter().cloned());
        next.push(registration);
        *list = Arc::new(next);
    }

    fn remove(&mut self, topic: &Topic, id: SubscriptionId) -> Option<Arc<Registration>> {
        let list = self.list_mut(topic)?;
        let position = list.iter().position(|r| r.id == id)?;

        let mut next: Vec<_> = list.iter().cloned().collect();
        let removed = next.remove(position);
        *list = Arc::new(next);

        if let Topic::Symbol(symbol) = topic
            && self.by_symbol.get(symbol).is_some_and(|l| l.is_empty())
        {
            self.by_symbol.remove(symbol);
        }

        Some(removed)
    }

    fn targets(&self, symbol: &str) -> [Option<RegistrationList>; 2] {
        let specific = self.by_symbol.get(symbol).cloned();
        let wildcard = (!self.all_symbols.is_empty()).then(|| Arc::clone(&self.all_symbols));
        [specific, wildcard]
    }
}

// =============================================================================
// Subscription Hub
// =============================================================================

/// Registry of candle observers with non-blocking fan-out.
///
/// Observers are registered through
/// [`MarketAggregator::subscribe`](crate::MarketAggregator::subscribe), which
/// pairs each registration with its own bounded queue.
pub struct SubscriptionHub {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
    overflow_policy: OverflowPolicy,
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new(OverflowPolicy::default())
    }
}

impl std::fmt::Debug for SubscriptionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHub")
            .field("overflow_policy", &self.overflow_policy)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl SubscriptionHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new(overflow_policy: OverflowPolicy) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            next_id: AtomicU64::new(1),
            overflow_policy,
        }
    }

    /// Overflow policy applied to full observer queues.
    #[must_use]
    pub const fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow_policy
    }

    /// Register `sink` for `topic` and hand it the current state.
    ///
    /// The registration is made first, then the current candle (every current
    /// candle for [`Topic::AllSymbols`]) is delivered while its symbol slot is
    /// held. An update racing the subscription therefore arrives either
    /// after the snapshot or as a duplicate of it, never in a gap.
    pub(crate) fn subscribe<S>(
        &self,
        topic: Topic,
        store: &AggregateStore,
        sink: S,
    ) -> SubscriptionHandle
    where
        S: CandleSink + 'static,
    {
        let (handle, registration) = self.register(topic, Box::new(sink));

        match &handle.topic {
            Topic::Symbol(symbol) => {
                self.deliver_snapshot(&handle, &registration, store, symbol);
            }
            Topic::AllSymbols => {
                for symbol in store.symbols() {
                    if !self.deliver_snapshot(&handle, &registration, store, &symbol) {
                        break;
                    }
                }
            }
        }

        handle
    }

    /// Deliver `candle` to every observer of `symbol` and of all symbols.
    ///
    /// Never waits on an observer. Observers whose delivery fails are removed
    /// before this returns.
    pub fn publish(&self, symbol: &str, candle: &Arc<Candle>) -> PublishReport {
        let targets = self.registry.read().targets(symbol);
        let mut report = PublishReport::default();

        for (list, topic) in targets.iter().zip([Some(symbol), None]) {
            let Some(list) = list else {
                continue;
            };

            for registration in list.iter() {
                let outcome = registration.deliver(candle, self.overflow_policy);
                if let Delivery::Failed(err) = outcome {
                    let topic = topic.map_or(Topic::AllSymbols, |s| Topic::Symbol(s.to_owned()));
                    tracing::debug!(
                        subscription_id = registration.id,
                        symbol,
                        error = %err,
                        "Dropping observer after failed delivery"
                    );
                    self.registry.write().remove(&topic, registration.id);
                }
                report.record(outcome);
            }
        }

        report
    }

    /// Remove a registration.
    ///
    /// Returns `false` if it was already gone (unsubscribed before, or dropped
    /// after a failed delivery). No delivery reaches the observer after this
    /// returns.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = self.registry.write().remove(&handle.topic, handle.id);

        removed.is_some_and(|registration| {
            registration.close();
            true
        })
    }

    /// Whether `handle` is still registered.
    #[must_use]
    pub fn is_registered(&self, handle: &SubscriptionHandle) -> bool {
        let registry = self.registry.read();
        let list = match &handle.topic {
            Topic::Symbol(symbol) => registry.by_symbol.get(symbol),
            Topic::AllSymbols => Some(&registry.all_symbols),
        };
        list.is_some_and(|l| l.iter().any(|r| r.id == handle.id))
    }

    /// Number of observers registered for `symbol` specifically.
    #[must_use]
    pub fn registrations_for(&self, symbol: &str) -> usize {
        self.registry.read().by_symbol.get(symbol).map_or(0, |l| l.len())
    }

    /// Number of observers registered for all symbols.
    #[must_use]
    pub fn wildcard_registrations(&self) -> usize {
        self.registry.read().all_symbols.len()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        let registry = self.registry.read();
        SubscriptionStats {
            symbol_count: registry.by_symbol.len(),
            symbol_registrations: registry.by_symbol.values().map(|l| l.len()).sum(),
            wildcard_registrations: registry.all_symbols.len(),
        }
    }

    fn register(
        &self,
        topic: Topic,
        sink: Box<dyn CandleSink>,
    ) -> (SubscriptionHandle, Arc<Registration>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Arc::new(Registration {
            id,
            sink: Mutex::new(Some(sink)),
        });

        self.registry.write().insert(&topic, Arc::clone(&registration));
        tracing::debug!(subscription_id = id, topic = ?topic, "Observer registered");

        (SubscriptionHandle { id, topic }, registration)
    }

    /// Returns `false` once the registration has been dropped.
    fn deliver_snapshot(
        &self,
        handle: &SubscriptionHandle,
        registration: &Registration,
        store: &AggregateStore,
        symbol: &str,
    ) -> bool {
        let outcome = store.with_snapshot(symbol, |candle| {
            registration.deliver(candle, self.overflow_policy)
        });

        match outcome {
            Some(Delivery::Failed(err)) => {
                tracing::debug!(
                    subscription_id = handle.id,
                    symbol,
                    error = %err,
                    "Observer failed initial snapshot delivery"
                );
                self.registry.write().remove(&handle.topic, handle.id);
                false
            }
            Some(Delivery::Inactive) => false,
            _ => true,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Registry statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Symbols with at least one specific registration.
    pub symbol_count: usize,
    /// Registrations for specific symbols.
    pub symbol_registrations: usize,
    /// Registrations for all symbols.
    pub wildcard_registrations: usize,
}

impl SubscriptionStats {
    /// Total registrations.
    #[must_use]
    pub const fn total_registrations(&self) -> usize {
        self.symbol_registrations + self.wildcard_registrations
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::domain::market::Tick;

    fn recorder() -> (Arc<Mutex<Vec<Arc<Candle>>>>, impl CandleSink + 'static) {
        let seen: Arc<Mutex<Vec<Arc<Candle>>>> = Arc::default();
        let sink_seen = Arc::clone(&seen);
        let sink = sink_fn(move |candle| {
            sink_seen.lock().push(candle);
            Ok(())
        });
        (seen, sink)
    }

    fn tick(store: &AggregateStore, hub: &SubscriptionHub, symbol: &str, price: f64) -> PublishReport {
        let mut report = PublishReport::default();
        store.apply_with(&Tick::new(symbol, price, 1, 0), |candle| {
            report = hub.publish(symbol, candle);
        });
        report
    }

    #[test]
    fn subscriber_receives_updates_for_its_symbol_only() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();
        let (seen, sink) = recorder();

        hub.subscribe(Topic::symbol("AAPL"), &store, sink);
        tick(&store, &hub, "AAPL", 1.0);
        tick(&store, &hub, "MSFT", 2.0);
        tick(&store, &hub, "AAPL", 3.0);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|c| c.symbol == "AAPL"));
        assert_eq!(seen[1].close, 3.0);
    }

    #[test]
    fn wildcard_subscriber_receives_every_symbol() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();
        let (seen, sink) = recorder();

        hub.subscribe(Topic::AllSymbols, &store, sink);
        tick(&store, &hub, "AAPL", 1.0);
        tick(&store, &hub, "MSFT", 2.0);

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn late_subscriber_gets_current_snapshot_first() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();
        tick(&store, &hub, "AAPL", 10.0);
        tick(&store, &hub, "AAPL", 11.0);

        let (seen, sink) = recorder();
        hub.subscribe(Topic::symbol("AAPL"), &store, sink);
        tick(&store, &hub, "AAPL", 12.0);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].close, 11.0);
        assert_eq!(seen[1].close, 12.0);
    }

    #[test]
    fn late_wildcard_subscriber_gets_every_snapshot() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();
        tick(&store, &hub, "AAPL", 10.0);
        tick(&store, &hub, "MSFT", 20.0);

        let (seen, sink) = recorder();
        hub.subscribe(Topic::AllSymbols, &store, sink);

        let mut symbols: Vec<_> = seen.lock().iter().map(|c| c.symbol.clone()).collect();
        symbols.sort();
        assert_eq!(symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn subscriber_to_unknown_symbol_gets_nothing_until_first_tick() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();
        let (seen, sink) = recorder();

        hub.subscribe(Topic::symbol("ZZZZ"), &store, sink);
        assert!(seen.lock().is_empty());

        tick(&store, &hub, "ZZZZ", 1.0);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();
        let (seen, sink) = recorder();

        let handle = hub.subscribe(Topic::symbol("AAPL"), &store, sink);
        assert!(hub.is_registered(&handle));

        assert!(hub.unsubscribe(&handle));
        assert!(!hub.unsubscribe(&handle));
        assert!(!hub.is_registered(&handle));

        tick(&store, &hub, "AAPL", 1.0);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn unsubscribe_removes_empty_symbol_entry() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();

        let first = hub.subscribe(Topic::symbol("AAPL"), &store, sink_fn(|_| Ok(())));
        let second = hub.subscribe(Topic::symbol("AAPL"), &store, sink_fn(|_| Ok(())));
        assert_eq!(hub.registrations_for("AAPL"), 2);

        hub.unsubscribe(&first);
        assert_eq!(hub.registrations_for("AAPL"), 1);
        assert_eq!(hub.stats().symbol_count, 1);

        hub.unsubscribe(&second);
        assert_eq!(hub.stats(), SubscriptionStats::default());
    }

    #[test]
    fn closed_sink_is_dropped_without_affecting_others() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();
        let (seen, sink) = recorder();

        let mut closed = MockCandleSink::new();
        closed
            .expect_try_deliver()
            .times(1)
            .returning(|_| Err(DeliveryError::Closed));

        let dead = hub.subscribe(Topic::symbol("AAPL"), &store, closed);
        hub.subscribe(Topic::symbol("AAPL"), &store, sink);

        let report = tick(&store, &hub, "AAPL", 1.0);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(report.closed, 1);
        assert!(!hub.is_registered(&dead));
        assert!(!hub.unsubscribe(&dead));

        tick(&store, &hub, "AAPL", 2.0);
        assert_eq!(seen.lock().len(), 2);
        assert_eq!(hub.registrations_for("AAPL"), 1);
    }

    #[test]
    fn full_queue_disconnects_by_default() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();

        let mut full = MockCandleSink::new();
        full.expect_try_deliver()
            .times(1)
            .returning(|_| Err(DeliveryError::QueueFull));

        let handle = hub.subscribe(Topic::symbol("AAPL"), &store, full);
        let report = tick(&store, &hub, "AAPL", 1.0);

        assert_eq!(report.dropped, 1);
        assert_eq!(report.closed, 0);
        assert!(!hub.is_registered(&handle));
    }

    #[test]
    fn full_queue_skips_update_under_drop_update_policy() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::new(OverflowPolicy::DropUpdate);

        let mut full = MockCandleSink::new();
        full.expect_try_deliver()
            .times(2)
            .returning(|_| Err(DeliveryError::QueueFull));

        let handle = hub.subscribe(Topic::symbol("AAPL"), &store, full);
        let first = tick(&store, &hub, "AAPL", 1.0);
        let second = tick(&store, &hub, "AAPL", 2.0);

        assert_eq!(first.skipped, 1);
        assert_eq!(second.skipped, 1);
        assert!(hub.is_registered(&handle));
    }

    #[test]
    fn failed_initial_snapshot_drops_registration() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();
        tick(&store, &hub, "AAPL", 1.0);

        let handle = hub.subscribe(Topic::symbol("AAPL"), &store, sink_fn(|_| Err(DeliveryError::Closed)));

        assert!(!hub.is_registered(&handle));
        assert_eq!(hub.stats().total_registrations(), 0);
    }

    #[test]
    fn closed_wildcard_sink_is_dropped() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();

        let handle = hub.subscribe(Topic::AllSymbols, &store, sink_fn(|_| Err(DeliveryError::Closed)));
        assert_eq!(hub.wildcard_registrations(), 1);

        let report = tick(&store, &hub, "AAPL", 1.0);
        assert_eq!(report.dropped, 1);
        assert!(!hub.is_registered(&handle));
        assert_eq!(hub.wildcard_registrations(), 0);
    }

    #[test]
    fn subscribe_unsubscribe_churn_leaves_no_entries() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();
        tick(&store, &hub, "AAPL", 1.0);

        for _ in 0..100_000 {
            let handle = hub.subscribe(Topic::symbol("AAPL"), &store, sink_fn(|_| Ok(())));
            hub.unsubscribe(&handle);
        }

        assert_eq!(hub.registrations_for("AAPL"), 0);
        assert_eq!(hub.stats(), SubscriptionStats::default());
    }

    #[test]
    fn handles_are_unique() {
        let store = AggregateStore::new();
        let hub = SubscriptionHub::default();

        let a = hub.subscribe(Topic::symbol("AAPL"), &store, sink_fn(|_| Ok(())));
        let b = hub.subscribe(Topic::symbol("AAPL"), &store, sink_fn(|_| Ok(())));

        assert_ne!(a.id(), b.id());
        assert_eq!(a.topic(), &Topic::symbol("AAPL"));
    }

    #[test]
    fn overflow_policy_parsing() {
        assert_eq!(OverflowPolicy::parse("disconnect"), Some(OverflowPolicy::Disconnect));
        assert_eq!(OverflowPolicy::parse("DROP_UPDATE"), Some(OverflowPolicy::DropUpdate));
        assert_eq!(OverflowPolicy::parse("drop-update"), Some(OverflowPolicy::DropUpdate));
        assert_eq!(OverflowPolicy::parse("block"), None);
        assert_eq!(OverflowPolicy::DropUpdate.as_str(), "drop_update");
    }

    #[test]
    fn concurrent_subscribe_while_publishing() {
        use std::thread;

        let store = Arc::new(AggregateStore::new());
        let hub = Arc::new(SubscriptionHub::default());
        let delivered = Arc::new(AtomicUsize::new(0));

        let publisher = {
            let store = Arc::clone(&store);
            let hub = Arc::clone(&hub);
            thread::spawn(move || {
                for i in 0..5_000 {
                    store.apply_with(&Tick::new("AAPL", f64::from(i), 1, i64::from(i)), |c| {
                        hub.publish("AAPL", c);
                    });
                }
            })
        };

        let mut churners = vec![];
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let hub = Arc::clone(&hub);
            let delivered = Arc::clone(&delivered);
            churners.push(thread::spawn(move || {
                for _ in 0..1_000 {
                    let counter = Arc::clone(&delivered);
                    let sink = sink_fn(move |_| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        Ok(())
                    });
                    let handle = hub.subscribe(Topic::symbol("AAPL"), &store, sink);
                    hub.unsubscribe(&handle);
                }
            }));
        }

        publisher.join().unwrap();
        for churner in churners {
            churner.join().unwrap();
        }

        assert_eq!(hub.stats().total_registrations(), 0);
        assert_eq!(store.snapshot("AAPL").unwrap().volume, 5_000);
    }
}
