use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of a level-2 change as reported by the feed.
///
/// `Buy` changes touch the bid side of the book, `Sell` changes the ask side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// A `(price, size)` pair.
pub type PriceLevelUpdate = (Decimal, Decimal);

/// Full initial state of one product's book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub product_id: String,
    pub bids: Vec<PriceLevelUpdate>,
    pub asks: Vec<PriceLevelUpdate>,
}

/// One entry of an `l2update` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub side: Side,
    pub price: Decimal,
    /// New aggregate size at `price`; zero removes the level.
    pub size: Decimal,
}

impl LevelChange {
    pub fn new(side: Side, price: Decimal, size: Decimal) -> Self {
        Self { side, price, size }
    }
}

/// Ordered batch of level changes for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct L2Update {
    pub product_id: String,
    pub changes: Vec<LevelChange>,
    pub time: Option<DateTime<Utc>>,
}

/// Book-relevant messages delivered by the market data feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedMessage {
    Snapshot(Snapshot),
    L2Update(L2Update),
}

impl FeedMessage {
    /// Product the message belongs to.
    pub fn product_id(&self) -> &str {
        match self {
            FeedMessage::Snapshot(snapshot) => &snapshot.product_id,
            FeedMessage::L2Update(update) => &update.product_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeedMessage::Snapshot(_) => "snapshot",
            FeedMessage::L2Update(_) => "l2update",
        }
    }
}
