//! Order book error types.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::side::BookSide;

/// Errors that can occur during order book operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderBookError {
    /// Removal of a price level the side does not hold.
    #[error("no {side} level at price {price}")]
    InvalidState { side: BookSide, price: Decimal },

    /// Invalid price level (negative or zero price).
    #[error("invalid {side} price: {price}")]
    InvalidPrice { side: BookSide, price: Decimal },

    /// Invalid size (negative size).
    #[error("invalid {side} size {size} at price {price}")]
    InvalidQuantity {
        side: BookSide,
        price: Decimal,
        size: Decimal,
    },
}

impl OrderBookError {
    /// Whether the error only concerns a single change and processing may continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, OrderBookError::InvalidState { .. })
    }
}
