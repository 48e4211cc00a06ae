//! Concurrently readable two-sided book for one product.

use std::cmp::Reverse;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use model::{LevelChange, PriceLevelUpdate};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{trace, warn};

use crate::callback::{BookCallback, CallbackId, CallbackRegistry};
use crate::error::OrderBookError;
use crate::gate::SnapshotGate;
use crate::level::PriceLevel;
use crate::side::{BookSide, PriceKey, PriceLevelMap};

/// Lifecycle of a product book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    /// No snapshot seen yet; reads return empty sides.
    Uninitialized,
    /// The first snapshot is being applied.
    Initializing,
    /// At least one snapshot has been applied.
    Live,
}

impl BookState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BookState::Uninitialized,
            1 => BookState::Initializing,
            _ => BookState::Live,
        }
    }
}

/// Owned copy of both sides at a requested depth.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookLevels {
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
}

/// One side with its own lock and first-snapshot gate.
#[derive(Debug, Default)]
struct Half<K: PriceKey> {
    levels: Mutex<PriceLevelMap<K>>,
    gate: SnapshotGate,
}

impl<K: PriceKey> Half<K> {
    fn replace(&self, levels: &[PriceLevelUpdate]) {
        // Built outside the lock so readers see either the old or the new side.
        let fresh = PriceLevelMap::from_levels(levels);
        *self.levels.lock() = fresh;
        self.gate.open();
    }

    fn apply(&self, price: Decimal, size: Decimal) -> Result<(), OrderBookError> {
        self.gate.wait();
        let mut levels = self.levels.lock();
        if size.is_zero() {
            levels.remove(price).map(|_| ())
        } else {
            levels.upsert(price, size);
            Ok(())
        }
    }

    fn top_n(&self, n: Option<usize>) -> Vec<PriceLevel> {
        self.levels.lock().top_n(n)
    }

    fn best(&self) -> Option<PriceLevel> {
        self.levels.lock().best()
    }

    fn len(&self) -> usize {
        self.levels.lock().len()
    }

    fn total_size(&self) -> Decimal {
        self.levels.lock().total_size()
    }
}

/// Level-2 order book for a single product.
///
/// Each side is guarded by its own mutex. Reads of one side are always
/// consistent; an ask read and a bid read made as two calls may observe
/// different points in feed time.
///
/// Diffs are never applied to a side before that side's first snapshot:
/// [`apply_diffs`](Self::apply_diffs) blocks until it lands.
pub struct ProductOrderBook {
    product_id: String,
    asks: Half<Decimal>,
    bids: Half<Reverse<Decimal>>,
    state: AtomicU8,
    callbacks: CallbackRegistry,
}

impl ProductOrderBook {
    /// Creates an empty, uninitialized book for the given product.
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            asks: Half::default(),
            bids: Half::default(),
            state: AtomicU8::new(BookState::Uninitialized as u8),
            callbacks: CallbackRegistry::default(),
        }
    }

    /// Returns the product this book tracks.
    pub fn product_id(&self) -> &str {
        &self.product_id
    }

    pub fn state(&self) -> BookState {
        BookState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns whether the book has been initialized with a snapshot.
    pub fn is_initialized(&self) -> bool {
        self.state() == BookState::Live
    }

    /// Replaces both sides with a snapshot, then fires callbacks once.
    ///
    /// Every level is validated before anything is touched, so a rejected
    /// snapshot leaves the book as it was. Asks and bids are swapped in as
    /// two separate critical sections.
    pub fn apply_snapshot(
        &self,
        bids: &[PriceLevelUpdate],
        asks: &[PriceLevelUpdate],
    ) -> Result<(), OrderBookError> {
        validate_levels(BookSide::Bid, bids)?;
        validate_levels(BookSide::Ask, asks)?;

        let _ = self.state.compare_exchange(
            BookState::Uninitialized as u8,
            BookState::Initializing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        self.asks.replace(asks);
        self.bids.replace(bids);
        self.state.store(BookState::Live as u8, Ordering::Release);

        trace!(
            product_id = %self.product_id,
            bids = bids.len(),
            asks = asks.len(),
            "Applied snapshot"
        );

        self.notify();
        Ok(())
    }

    /// Applies an ordered batch of level changes, then fires callbacks once.
    ///
    /// Blocks until the touched side has received its first snapshot. A zero
    /// size removes the level; removing a level that is not there is logged
    /// and skipped. Returns the number of changes applied.
    pub fn apply_diffs(&self, changes: &[LevelChange]) -> Result<usize, OrderBookError> {
        for change in changes {
            validate_level(change.side.into(), change.price, change.size)?;
        }

        let mut applied = 0;
        for change in changes {
            let result = match BookSide::from(change.side) {
                BookSide::Ask => self.asks.apply(change.price, change.size),
                BookSide::Bid => self.bids.apply(change.price, change.size),
            };

            match result {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(
                        product_id = %self.product_id,
                        error = %e,
                        "Skipping level change"
                    );
                }
            }
        }

        self.notify();
        Ok(applied)
    }

    /// Blocks until `side` has received its first snapshot or `timeout` elapses.
    pub fn wait_for_snapshot(&self, side: BookSide, timeout: Duration) -> bool {
        match side {
            BookSide::Ask => self.asks.gate.wait_timeout(timeout),
            BookSide::Bid => self.bids.gate.wait_timeout(timeout),
        }
    }

    /// Returns the top N ask levels (lowest to highest), or all of them.
    pub fn get_asks(&self, top_n: Option<usize>) -> Vec<PriceLevel> {
        self.asks.top_n(top_n)
    }

    /// Returns the top N bid levels (highest to lowest), or all of them.
    pub fn get_bids(&self, top_n: Option<usize>) -> Vec<PriceLevel> {
        self.bids.top_n(top_n)
    }

    pub fn get_book(&self, top_n: Option<usize>) -> BookLevels {
        BookLevels {
            asks: self.get_asks(top_n),
            bids: self.get_bids(top_n),
        }
    }

    /// Returns the best (highest) bid price level.
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.best()
    }

    /// Returns the best (lowest) ask price level.
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.best()
    }

    /// Returns the mid price (average of best bid and best ask).
    pub fn mid_price(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some((bid.price + ask.price) / Decimal::TWO)
    }

    /// Returns the spread (best ask - best bid).
    pub fn spread(&self) -> Option<Decimal> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some(ask.price - bid.price)
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    pub fn total_bid_size(&self) -> Decimal {
        self.bids.total_size()
    }

    pub fn total_ask_size(&self) -> Decimal {
        self.asks.total_size()
    }

    /// Registers a callback fired after every mutation.
    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&ProductOrderBook) + Send + Sync + 'static,
    {
        self.register_shared_callback(Arc::new(callback))
    }

    pub fn register_shared_callback(&self, callback: BookCallback) -> CallbackId {
        self.callbacks.register(callback)
    }

    /// Removes a callback. Returns `false` if it was not registered.
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.callbacks.remove(id)
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    fn notify(&self) {
        for callback in self.callbacks.current() {
            callback(self);
        }
    }
}

impl fmt::Debug for ProductOrderBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProductOrderBook")
            .field("product_id", &self.product_id)
            .field("state", &self.state())
            .field("bid_levels", &self.bid_levels())
            .field("ask_levels", &self.ask_levels())
            .field("callbacks", &self.callback_count())
            .finish()
    }
}

impl fmt::Display for ProductOrderBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BIDS:")?;
        for level in self.get_bids(None) {
            writeln!(f, "PRICE: {}, SIZE: {}", level.price, level.size)?;
        }
        writeln!(f)?;
        writeln!(f, "ASKS:")?;
        for level in self.get_asks(None) {
            writeln!(f, "PRICE: {}, SIZE: {}", level.price, level.size)?;
        }
        writeln!(f)
    }
}

fn validate_level(side: BookSide, price: Decimal, size: Decimal) -> Result<(), OrderBookError> {
    if price <= Decimal::ZERO {
        return Err(OrderBookError::InvalidPrice { side, price });
    }
    if size < Decimal::ZERO {
        return Err(OrderBookError::InvalidQuantity { side, price, size });
    }
    Ok(())
}

fn validate_levels(side: BookSide, levels: &[PriceLevelUpdate]) -> Result<(), OrderBookError> {
    levels
        .iter()
        .try_for_each(|(price, size)| validate_level(side, *price, *size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::Side;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn seeded_book() -> ProductOrderBook {
        let book = ProductOrderBook::new("BTC-USD");
        book.apply_snapshot(
            &[(dec!(100), dec!(1)), (dec!(99), dec!(2))],
            &[(dec!(101), dec!(3)), (dec!(102), dec!(1))],
        )
        .unwrap();
        book
    }

    fn levels(pairs: &[(Decimal, Decimal)]) -> Vec<PriceLevel> {
        pairs.iter().copied().map(PriceLevel::from).collect()
    }

    #[test]
    fn test_empty_book() {
        let book = ProductOrderBook::new("BTC-USD");
        assert_eq!(book.product_id(), "BTC-USD");
        assert_eq!(book.state(), BookState::Uninitialized);
        assert!(!book.is_initialized());
        assert!(book.get_asks(None).is_empty());
        assert!(book.get_bids(None).is_empty());
        assert!(book.best_bid().is_none());
        assert!(book.mid_price().is_none());
        assert!(book.spread().is_none());
    }

    #[test]
    fn test_end_to_end_scenario() {
        let book = seeded_book();
        assert_eq!(book.state(), BookState::Live);

        let snapshot = book.get_book(None);
        assert_eq!(
            snapshot.bids,
            levels(&[(dec!(100), dec!(1)), (dec!(99), dec!(2))])
        );
        assert_eq!(
            snapshot.asks,
            levels(&[(dec!(101), dec!(3)), (dec!(102), dec!(1))])
        );

        let applied = book
            .apply_diffs(&[
                LevelChange::new(Side::Buy, dec!(100), dec!(0)),
                LevelChange::new(Side::Sell, dec!(101), dec!(5)),
            ])
            .unwrap();

        assert_eq!(applied, 2);
        assert_eq!(book.get_bids(None), levels(&[(dec!(99), dec!(2))]));
        assert_eq!(
            book.get_asks(None),
            levels(&[(dec!(101), dec!(5)), (dec!(102), dec!(1))])
        );
    }

    #[test]
    fn test_top_of_book() {
        let book = seeded_book();
        assert_eq!(book.best_bid(), Some(PriceLevel::new(dec!(100), dec!(1))));
        assert_eq!(book.best_ask(), Some(PriceLevel::new(dec!(101), dec!(3))));
        assert_eq!(book.mid_price(), Some(dec!(100.5)));
        assert_eq!(book.spread(), Some(dec!(1)));
        assert_eq!(book.total_bid_size(), dec!(3));
        assert_eq!(book.total_ask_size(), dec!(4));
    }

    #[test]
    fn test_zero_size_diff_removes_level() {
        let book = seeded_book();
        book.apply_diffs(&[LevelChange::new(Side::Sell, dec!(101), dec!(0))])
            .unwrap();

        assert!(book.get_asks(None).iter().all(|l| l.price != dec!(101)));
        assert_eq!(book.ask_levels(), 1);
    }

    #[test]
    fn test_snapshot_replaces_not_merges() {
        let book = seeded_book();
        book.apply_snapshot(&[(dec!(50), dec!(1))], &[(dec!(60), dec!(1))])
            .unwrap();

        assert_eq!(book.get_bids(None), levels(&[(dec!(50), dec!(1))]));
        assert_eq!(book.get_asks(None), levels(&[(dec!(60), dec!(1))]));
    }

    #[test]
    fn test_depth_bound() {
        let book = ProductOrderBook::new("ETH-USD");
        book.apply_snapshot(
            &[],
            &[
                (dec!(105), dec!(1)),
                (dec!(103), dec!(1)),
                (dec!(101), dec!(1)),
                (dec!(104), dec!(1)),
            ],
        )
        .unwrap();

        let top = book.get_asks(Some(2));
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].price, dec!(101));
        assert_eq!(top[1].price, dec!(103));

        let limited = book.get_book(Some(1));
        assert_eq!(limited.asks.len(), 1);
        assert!(limited.bids.is_empty());
    }

    #[test]
    fn test_diff_order_preserved() {
        let book = seeded_book();
        book.apply_diffs(&[
            LevelChange::new(Side::Sell, dec!(100), dec!(1)),
            LevelChange::new(Side::Sell, dec!(100), dec!(0)),
            LevelChange::new(Side::Sell, dec!(100), dec!(2)),
        ])
        .unwrap();

        assert_eq!(book.best_ask(), Some(PriceLevel::new(dec!(100), dec!(2))));
    }

    #[test]
    fn test_ordering_invariant_after_diffs() {
        let book = seeded_book();
        book.apply_diffs(&[
            LevelChange::new(Side::Buy, dec!(99.5), dec!(1)),
            LevelChange::new(Side::Buy, dec!(98), dec!(1)),
            LevelChange::new(Side::Sell, dec!(101.5), dec!(1)),
            LevelChange::new(Side::Sell, dec!(110), dec!(1)),
        ])
        .unwrap();

        let asks = book.get_asks(None);
        assert!(asks.windows(2).all(|w| w[0].price <= w[1].price));
        let bids = book.get_bids(None);
        assert!(bids.windows(2).all(|w| w[0].price >= w[1].price));
    }

    #[test]
    fn test_missing_level_removal_is_skipped() {
        let book = seeded_book();
        let applied = book
            .apply_diffs(&[
                LevelChange::new(Side::Buy, dec!(42), dec!(0)),
                LevelChange::new(Side::Buy, dec!(98), dec!(7)),
            ])
            .unwrap();

        assert_eq!(applied, 1);
        assert_eq!(book.bid_levels(), 3);
    }

    #[test]
    fn test_malformed_diff_rejects_whole_batch() {
        let book = seeded_book();
        let err = book
            .apply_diffs(&[
                LevelChange::new(Side::Sell, dec!(101), dec!(9)),
                LevelChange::new(Side::Sell, dec!(103), dec!(-1)),
            ])
            .unwrap_err();

        assert!(matches!(err, OrderBookError::InvalidQuantity { .. }));
        assert_eq!(book.best_ask(), Some(PriceLevel::new(dec!(101), dec!(3))));
    }

    #[test]
    fn test_malformed_snapshot_leaves_book_untouched() {
        let book = seeded_book();
        let err = book
            .apply_snapshot(&[(dec!(0), dec!(1))], &[(dec!(200), dec!(1))])
            .unwrap_err();

        assert_eq!(
            err,
            OrderBookError::InvalidPrice {
                side: BookSide::Bid,
                price: dec!(0)
            }
        );
        assert_eq!(book.ask_levels(), 2);
        assert_eq!(book.best_ask().unwrap().price, dec!(101));
    }

    #[test]
    fn test_snapshot_skips_zero_sizes() {
        let book = ProductOrderBook::new("BTC-USD");
        book.apply_snapshot(&[(dec!(100), dec!(0))], &[(dec!(101), dec!(1))])
            .unwrap();
        assert_eq!(book.bid_levels(), 0);
        assert_eq!(book.ask_levels(), 1);
    }

    #[test]
    fn test_callbacks_fire_once_per_batch() {
        let book = ProductOrderBook::new("BTC-USD");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        book.register_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        book.apply_snapshot(&[(dec!(100), dec!(1))], &[(dec!(101), dec!(1))])
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        book.apply_diffs(&[
            LevelChange::new(Side::Buy, dec!(99), dec!(1)),
            LevelChange::new(Side::Sell, dec!(102), dec!(1)),
            LevelChange::new(Side::Sell, dec!(103), dec!(1)),
        ])
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_sees_post_mutation_state() {
        let book = seeded_book();
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        book.register_callback(move |b| {
            *slot.lock() = b.best_bid();
        });

        book.apply_diffs(&[LevelChange::new(Side::Buy, dec!(100.5), dec!(4))])
            .unwrap();

        assert_eq!(*seen.lock(), Some(PriceLevel::new(dec!(100.5), dec!(4))));
    }

    #[test]
    fn test_remove_callback_leaves_others() {
        let book = seeded_book();
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&first_calls);
        let first = book.register_callback(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&second_calls);
        book.register_callback(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        assert!(book.remove_callback(first));
        assert!(!book.remove_callback(first));

        book.apply_diffs(&[LevelChange::new(Side::Buy, dec!(98), dec!(1))])
            .unwrap();
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_read_both_sides() {
        // Side locks are released before callbacks run.
        let book = seeded_book();
        let dumps = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&dumps);
        book.register_callback(move |b| sink.lock().push(b.to_string()));

        book.apply_diffs(&[LevelChange::new(Side::Sell, dec!(102), dec!(0))])
            .unwrap();

        assert_eq!(dumps.lock().len(), 1);
    }

    #[test]
    fn test_diffs_wait_for_first_snapshot() {
        let book = Arc::new(ProductOrderBook::new("BTC-USD"));
        let writer = {
            let book = Arc::clone(&book);
            thread::spawn(move || {
                book.apply_diffs(&[LevelChange::new(Side::Sell, dec!(101), dec!(9))])
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!writer.is_finished());
        assert_eq!(book.ask_levels(), 0);

        book.apply_snapshot(&[(dec!(100), dec!(1))], &[(dec!(101), dec!(3))])
            .unwrap();

        assert_eq!(writer.join().unwrap(), Ok(1));
        assert_eq!(book.best_ask(), Some(PriceLevel::new(dec!(101), dec!(9))));
    }

    #[test]
    fn test_wait_for_snapshot_timeout() {
        let book = ProductOrderBook::new("BTC-USD");
        assert!(!book.wait_for_snapshot(BookSide::Ask, Duration::from_millis(10)));

        book.apply_snapshot(&[], &[]).unwrap();
        assert!(book.wait_for_snapshot(BookSide::Ask, Duration::ZERO));
        assert!(book.wait_for_snapshot(BookSide::Bid, Duration::ZERO));
    }

    #[test]
    fn test_concurrent_readers_see_ordered_sides() {
        let book = Arc::new(seeded_book());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let book = Arc::clone(&book);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let asks = book.get_asks(None);
                        assert!(asks.windows(2).all(|w| w[0].price < w[1].price));
                        let bids = book.get_bids(None);
                        assert!(bids.windows(2).all(|w| w[0].price > w[1].price));
                    }
                })
            })
            .collect();

        for i in 0..200u32 {
            let offset = Decimal::from(i % 10);
            book.apply_diffs(&[
                LevelChange::new(Side::Sell, dec!(110) + offset, Decimal::from(i % 3)),
                LevelChange::new(Side::Buy, dec!(90) - offset, Decimal::from(i % 2)),
            ])
            .unwrap();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_display_format() {
        let book = seeded_book();
        assert_eq!(
            book.to_string(),
            "BIDS:\nPRICE: 100, SIZE: 1\nPRICE: 99, SIZE: 2\n\n\
             ASKS:\nPRICE: 101, SIZE: 3\nPRICE: 102, SIZE: 1\n\n"
        );
    }

    #[test]
    fn test_display_empty() {
        let book = ProductOrderBook::new("BTC-USD");
        assert_eq!(book.to_string(), "BIDS:\n\nASKS:\n\n");
    }
}
