//! Unified error handling for the sync layer.

/// Sync layer error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Engine error: {0}")]
    Engine(#[from] tote_engine::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Another cart operation is in progress")]
    Busy,

    #[error("Identity changed while the write was pending")]
    ModeChanged,

    #[error("Identity has not been resolved yet")]
    IdentityUnresolved,
}

impl SyncError {
    /// Short message suitable for a toast in the storefront.
    pub fn user_message(&self) -> &'static str {
        match self {
            SyncError::Busy => "Please wait for the previous update to finish.",
            SyncError::Engine(tote_engine::Error::EmptyProductId)
            | SyncError::Engine(tote_engine::Error::InvalidQuantity(_))
            | SyncError::Engine(tote_engine::Error::NegativePrice(_)) => {
                "That item could not be added to your cart."
            }
            _ => "We couldn't sync your cart. Please try again.",
        }
    }
}

/// Result type alias for the sync layer.
pub type Result<T> = std::result::Result<T, SyncError>;
