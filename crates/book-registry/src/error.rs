use connector_core::FeedError;
use orderbook::OrderBookError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// The product has no book in this registry.
    #[error("product not tracked: {0}")]
    NotFound(String),

    #[error("order book error: {0}")]
    Book(#[from] OrderBookError),

    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// A feed was requested outside of a tokio runtime.
    #[error("no tokio runtime available to run the feed")]
    NoRuntime,
}
