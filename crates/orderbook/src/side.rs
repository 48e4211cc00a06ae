//! One side of an order book: a price-sorted map of aggregate sizes.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

use model::Side;
use rust_decimal::Decimal;

use crate::error::OrderBookError;
use crate::level::PriceLevel;

/// Side of the book a price level rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookSide {
    Bid,
    Ask,
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookSide::Bid => write!(f, "bid"),
            BookSide::Ask => write!(f, "ask"),
        }
    }
}

impl From<Side> for BookSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => BookSide::Bid,
            Side::Sell => BookSide::Ask,
        }
    }
}

/// Map key encoding a side's canonical order.
///
/// Asks use `Decimal` directly (lowest first), bids use `Reverse<Decimal>`
/// (highest first), so iteration never needs a re-sort.
pub trait PriceKey: Ord + Copy + fmt::Debug + Send + 'static {
    const SIDE: BookSide;

    fn from_price(price: Decimal) -> Self;

    fn price(&self) -> Decimal;
}

impl PriceKey for Decimal {
    const SIDE: BookSide = BookSide::Ask;

    fn from_price(price: Decimal) -> Self {
        price
    }

    fn price(&self) -> Decimal {
        *self
    }
}

impl PriceKey for Reverse<Decimal> {
    const SIDE: BookSide = BookSide::Bid;

    fn from_price(price: Decimal) -> Self {
        Reverse(price)
    }

    fn price(&self) -> Decimal {
        self.0
    }
}

/// Ask side levels, iterated lowest price first.
pub type AskLevels = PriceLevelMap<Decimal>;

/// Bid side levels, iterated highest price first.
pub type BidLevels = PriceLevelMap<Reverse<Decimal>>;

/// Sorted price -> size map for one side of one product.
///
/// A level with zero size is never stored.
#[derive(Debug, Clone)]
pub struct PriceLevelMap<K: PriceKey> {
    levels: BTreeMap<K, Decimal>,
}

impl<K: PriceKey> Default for PriceLevelMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PriceKey> PriceLevelMap<K> {
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Builds a map from snapshot levels, skipping zero sizes.
    ///
    /// A price repeated in `levels` keeps its last size.
    pub fn from_levels(levels: &[(Decimal, Decimal)]) -> Self {
        let mut map = Self::new();
        for (price, size) in levels {
            map.upsert(*price, *size);
        }
        map
    }

    /// The side this map holds.
    pub fn side(&self) -> BookSide {
        K::SIDE
    }

    /// Inserts or replaces the size at `price`. A zero size removes the level.
    pub fn upsert(&mut self, price: Decimal, size: Decimal) {
        if size.is_zero() {
            self.levels.remove(&K::from_price(price));
        } else {
            self.levels.insert(K::from_price(price), size);
        }
    }

    /// Removes the level at `price`, returning its last size.
    pub fn remove(&mut self, price: Decimal) -> Result<Decimal, OrderBookError> {
        self.levels
            .remove(&K::from_price(price))
            .ok_or(OrderBookError::InvalidState {
                side: K::SIDE,
                price,
            })
    }

    /// Clears the map and fills it from `levels`.
    pub fn replace(&mut self, levels: &[(Decimal, Decimal)]) {
        *self = Self::from_levels(levels);
    }

    /// Size resting at `price`, if any.
    pub fn get(&self, price: Decimal) -> Option<Decimal> {
        self.levels.get(&K::from_price(price)).copied()
    }

    /// First level in canonical order.
    pub fn best(&self) -> Option<PriceLevel> {
        self.levels
            .iter()
            .next()
            .map(|(key, size)| PriceLevel::new(key.price(), *size))
    }

    /// Returns the first `n` levels in canonical order, or every level when `n` is `None`.
    pub fn top_n(&self, n: Option<usize>) -> Vec<PriceLevel> {
        self.iter().take(n.unwrap_or(usize::MAX)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = PriceLevel> + '_ {
        self.levels
            .iter()
            .map(|(key, size)| PriceLevel::new(key.price(), *size))
    }

    /// Sum of all resting sizes.
    pub fn total_size(&self) -> Decimal {
        self.levels.values().sum()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}
