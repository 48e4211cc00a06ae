//! Registry of per-product order books fed by the Coinbase level-2 feed.

mod error;
mod registry;

pub use error::RegistryError;
pub use registry::CoinbaseOrderBook;
