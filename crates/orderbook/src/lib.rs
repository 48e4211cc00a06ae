//! Level-2 order book maintenance for streamed market data.
//!
//! This crate provides a per-product order book with independently locked
//! bid and ask sides, each a sorted `BTreeMap` of price levels. Books are
//! seeded by a snapshot and then advanced by ordered level changes;
//! registered callbacks fire after every mutation.
//!
//! # Example
//!
//! ```rust
//! use model::{LevelChange, Side};
//! use orderbook::ProductOrderBook;
//! use rust_decimal_macros::dec;
//!
//! let book = ProductOrderBook::new("BTC-USD");
//!
//! // Apply initial snapshot
//! let bids = vec![(dec!(100), dec!(1)), (dec!(99), dec!(2))];
//! let asks = vec![(dec!(101), dec!(3)), (dec!(102), dec!(1))];
//! book.apply_snapshot(&bids, &asks).unwrap();
//!
//! // Apply incremental changes
//! book.apply_diffs(&[
//!     LevelChange::new(Side::Buy, dec!(100), dec!(0)),
//!     LevelChange::new(Side::Sell, dec!(101), dec!(5)),
//! ])
//! .unwrap();
//!
//! println!("Best bid: {:?}", book.best_bid());
//! println!("Best ask: {:?}", book.best_ask());
//! print!("{}", book);
//! ```

mod book;
mod callback;
mod error;
mod gate;
mod level;
mod side;

pub use book::{BookLevels, BookState, ProductOrderBook};
pub use callback::{BookCallback, CallbackId};
pub use error::OrderBookError;
pub use gate::SnapshotGate;
pub use level::PriceLevel;
pub use side::{AskLevels, BidLevels, BookSide, PriceKey, PriceLevelMap};
