//! Aggregate Store
//!
//! Owns the current [`Candle`] for every symbol seen at least once and applies
//! ticks to it.
//!
//! # Design
//!
//! Each symbol gets its own slot, created lazily on the first tick and never
//! removed. A slot is a mutex around the current `Arc<Candle>`:
//! - applies to the same symbol serialize on the slot lock (no lost updates)
//! - applies to different symbols only share a read lock on the slot index,
//!   which is write-locked once per new symbol
//!
//! Snapshots clone the `Arc`, so readers never see a torn value.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::domain::market::{Candle, Symbol, Tick};

/// Current candle for one symbol. `None` only between slot creation and the
/// end of the first apply.
type Slot = Mutex<Option<Arc<Candle>>>;

// =============================================================================
// Aggregate Store
// =============================================================================

/// Per-symbol OHLCV state.
///
/// # Example
///
/// ```rust
/// use ohlcv_aggregator::{AggregateStore, Tick};
///
/// let store = AggregateStore::new();
/// assert!(store.snapshot("AAPL").is_none());
///
/// store.apply(&Tick::new("AAPL", 10.0, 100, 1));
/// let candle = store.apply(&Tick::new("AAPL", 12.0, 50, 2));
///
/// assert_eq!(candle.open, 10.0);
/// assert_eq!(candle.close, 12.0);
/// assert_eq!(candle.volume, 150);
/// assert_eq!(store.snapshot("AAPL").as_deref(), Some(&*candle));
/// ```
#[derive(Debug, Default)]
pub struct AggregateStore {
    slots: RwLock<HashMap<Symbol, Arc<Slot>>>,
}

impl AggregateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a tick and return the candle now stored for its symbol.
    pub fn apply(&self, tick: &Tick) -> Arc<Candle> {
        self.apply_with(tick, |_| {})
    }

    /// Apply a tick and run `on_update` with the new candle before the
    /// symbol's slot is released.
    ///
    /// Anything `on_update` does is therefore ordered exactly like the applies
    /// themselves. It must not block and must not call back into this store
    /// for the same symbol.
    pub(crate) fn apply_with<F>(&self, tick: &Tick, on_update: F) -> Arc<Candle>
    where
        F: FnOnce(&Arc<Candle>),
    {
        let slot = self.slot_or_insert(&tick.symbol);
        let mut current = slot.lock();

        let next = Arc::new(match current.as_deref() {
            Some(candle) => candle.advance(tick),
            None => Candle::open_from(tick),
        });
        *current = Some(Arc::clone(&next));

        on_update(&next);
        next
    }

    /// Current candle for `symbol`, or `None` if no tick was ever applied.
    #[must_use]
    pub fn snapshot(&self, symbol: &str) -> Option<Arc<Candle>> {
        let slot = self.slot(symbol)?;
        let current = slot.lock();
        current.clone()
    }

    /// Run `f` with the current candle for `symbol` while holding its slot.
    ///
    /// Returns `None` without calling `f` if the symbol has no candle. No
    /// apply for that symbol can complete while `f` runs.
    pub(crate) fn with_snapshot<F, R>(&self, symbol: &str, f: F) -> Option<R>
    where
        F: FnOnce(&Arc<Candle>) -> R,
    {
        let slot = self.slot(symbol)?;
        let current = slot.lock();
        current.as_ref().map(f)
    }

    /// Symbols that currently have a candle.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        self.populated_slots()
            .into_iter()
            .map(|(symbol, _)| symbol)
            .collect()
    }

    /// Number of symbols that currently have a candle.
    ///
    /// Always agrees with [`symbols`](Self::symbols): a slot whose first
    /// apply is still running is not counted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.populated_slots().len()
    }

    /// Whether no symbol has a candle yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots holding a candle. The index lock is released before any slot is
    /// locked.
    fn populated_slots(&self) -> Vec<(Symbol, Arc<Slot>)> {
        let slots: Vec<(Symbol, Arc<Slot>)> = self
            .slots
            .read()
            .iter()
            .map(|(symbol, slot)| (symbol.clone(), Arc::clone(slot)))
            .collect();

        slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().is_some())
            .collect()
    }

    fn slot(&self, symbol: &str) -> Option<Arc<Slot>> {
        self.slots.read().get(symbol).cloned()
    }

    fn slot_or_insert(&self, symbol: &str) -> Arc<Slot> {
        if let Some(slot) = self.slot(symbol) {
            return slot;
        }

        Arc::clone(
            self.slots
                .write()
                .entry(symbol.to_owned())
                .or_default(),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    fn apply_prices(store: &AggregateStore, symbol: &str, prices: &[f64]) -> Arc<Candle> {
        let mut last = None;
        for (i, price) in prices.iter().enumerate() {
            last = Some(store.apply(&Tick::new(symbol, *price, 1, i as i64)));
        }
        last.unwrap()
    }

    #[test]
    fn unknown_symbol_is_absent() {
        let store = AggregateStore::new();

        assert!(store.snapshot("ZZZZ").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn first_tick_creates_state() {
        let store = AggregateStore::new();

        let candle = store.apply(&Tick::new("AAPL", 100.0, 10, 7));

        assert_eq!(candle.open, 100.0);
        assert_eq!(candle.high, 100.0);
        assert_eq!(candle.low, 100.0);
        assert_eq!(candle.close, 100.0);
        assert_eq!(candle.volume, 10);
        assert_eq!(candle.timestamp, 7);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn documented_price_sequence() {
        let store = AggregateStore::new();

        let candle = apply_prices(&store, "AAPL", &[10.0, 15.0, 7.0, 12.0]);

        assert_eq!(candle.open, 10.0);
        assert_eq!(candle.high, 15.0);
        assert_eq!(candle.low, 7.0);
        assert_eq!(candle.close, 12.0);
        assert_eq!(candle.volume, 4);
    }

    #[test_case(&[5.0, 4.0, 3.0], 5.0, 3.0 ; "falling")]
    #[test_case(&[3.0, 4.0, 5.0], 5.0, 3.0 ; "rising")]
    #[test_case(&[4.0, 5.0, 3.0], 5.0, 3.0 ; "mixed")]
    #[test_case(&[4.0, 4.0, 4.0], 4.0, 4.0 ; "flat")]
    fn extremes_ignore_order(prices: &[f64], high: f64, low: f64) {
        let store = AggregateStore::new();

        let candle = apply_prices(&store, "SPY", prices);

        assert_eq!(candle.high, high);
        assert_eq!(candle.low, low);
    }

    #[test]
    fn returned_candle_matches_snapshot() {
        let store = AggregateStore::new();

        store.apply(&Tick::new("AAPL", 1.0, 1, 1));
        let returned = store.apply(&Tick::new("AAPL", 2.0, 1, 2));

        assert_eq!(store.snapshot("AAPL").unwrap(), returned);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_applies() {
        let store = AggregateStore::new();

        store.apply(&Tick::new("AAPL", 1.0, 1, 1));
        let held = store.snapshot("AAPL").unwrap();
        store.apply(&Tick::new("AAPL", 9.0, 1, 2));

        assert_eq!(held.close, 1.0);
        assert_eq!(store.snapshot("AAPL").unwrap().close, 9.0);
    }

    #[test]
    fn symbols_are_independent() {
        let store = AggregateStore::new();

        store.apply(&Tick::new("AAPL", 150.0, 10, 1));
        store.apply(&Tick::new("MSFT", 300.0, 20, 2));

        assert_eq!(store.snapshot("AAPL").unwrap().volume, 10);
        assert_eq!(store.snapshot("MSFT").unwrap().volume, 20);

        let mut symbols = store.symbols();
        symbols.sort();
        assert_eq!(symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn slot_without_candle_is_not_counted() {
        let store = AggregateStore::new();
        store.apply(&Tick::new("AAPL", 1.0, 1, 1));

        // Same state as a first apply that has created the slot but not yet
        // stored its candle.
        let _pending = store.slot_or_insert("MSFT");

        assert_eq!(store.symbols(), vec!["AAPL".to_string()]);
        assert_eq!(store.len(), 1);
        assert_eq!(store.len(), store.symbols().len());
        assert!(store.snapshot("MSFT").is_none());
    }

    #[test]
    fn only_pending_slots_is_empty() {
        let store = AggregateStore::new();
        let _pending = store.slot_or_insert("AAPL");

        assert!(store.is_empty());
        assert!(store.symbols().is_empty());
    }

    #[test]
    fn apply_with_sees_the_stored_value() {
        let store = AggregateStore::new();
        let mut seen = None;

        let returned = store.apply_with(&Tick::new("AAPL", 3.0, 1, 1), |candle| {
            seen = Some(Arc::clone(candle));
        });

        assert_eq!(seen.unwrap(), returned);
    }

    #[test]
    fn with_snapshot_skips_unknown_symbol() {
        let store = AggregateStore::new();
        let mut called = false;

        let result = store.with_snapshot("ZZZZ", |_| called = true);

        assert!(result.is_none());
        assert!(!called);
    }

    #[test]
    fn concurrent_applies_do_not_lose_updates() {
        use std::thread;

        const THREADS: usize = 8;
        const TICKS: usize = 10_000;

        let store = Arc::new(AggregateStore::new());
        let mut handles = vec![];

        for t in 0..THREADS {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for i in 0..TICKS {
                    let price = 100.0 + ((t * TICKS + i) % 50) as f64;
                    store.apply(&Tick::new("AAPL", price, 3, i as i64));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let candle = store.snapshot("AAPL").unwrap();
        assert_eq!(candle.volume, (THREADS * TICKS * 3) as i64);
        assert_eq!(candle.high, 149.0);
        assert_eq!(candle.low, 100.0);
        assert!(candle.is_consistent());
    }

    proptest! {
        #[test]
        fn invariants_hold_for_any_sequence(
            ticks in prop::collection::vec((1.0f64..10_000.0, 0i64..1_000_000), 1..200)
        ) {
            let store = AggregateStore::new();
            let mut expected_volume = 0i64;

            for (i, (price, volume)) in ticks.iter().enumerate() {
                expected_volume += volume;
                let candle = store.apply(&Tick::new("PROP", *price, *volume, i as i64));
                prop_assert!(candle.is_consistent());
            }

            let candle = store.snapshot("PROP").unwrap();
            let max = ticks.iter().map(|(p, _)| *p).fold(f64::MIN, f64::max);
            let min = ticks.iter().map(|(p, _)| *p).fold(f64::MAX, f64::min);

            prop_assert_eq!(candle.volume, expected_volume);
            prop_assert_eq!(candle.open, ticks[0].0);
            prop_assert_eq!(candle.close, ticks[ticks.len() - 1].0);
            prop_assert_eq!(candle.high, max);
            prop_assert_eq!(candle.low, min);
        }
    }
}
