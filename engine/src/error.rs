//! Error types for the Tote engine.

use crate::{phase::SyncPhase, ProductId};
use thiserror::Error;

/// All possible errors from the Tote engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("product id must not be empty")]
    EmptyProductId,

    #[error("invalid quantity {0}: lines hold at least one unit")]
    InvalidQuantity(i64),

    #[error("negative unit price for product {0}")]
    NegativePrice(ProductId),

    // State errors
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: SyncPhase, to: SyncPhase },

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::InvalidQuantity(0);
        assert_eq!(
            err.to_string(),
            "invalid quantity 0: lines hold at least one unit"
        );

        let err = Error::InvalidTransition {
            from: SyncPhase::Resyncing,
            to: SyncPhase::Mutating,
        };
        assert_eq!(
            err.to_string(),
            "invalid phase transition: resyncing -> mutating"
        );

        let err = Error::NegativePrice("bag-1".into());
        assert_eq!(err.to_string(), "negative unit price for product bag-1");
    }
}
