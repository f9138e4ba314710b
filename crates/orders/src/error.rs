//! Application error taxonomy.

use store::StoreError;
use thiserror::Error;

/// Errors surfaced by the order, catalog, and archive services.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Malformed input, such as a missing idempotency key.
    #[error("validation error: {0}")]
    Validation(String),

    /// The referenced product or order does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique key is already taken (SKU, idempotency key, event id).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A business rule was violated (negative stock, illegal transition).
    #[error("business rule violation: {0}")]
    BusinessRule(String),

    /// The caller does not own the targeted resource.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// A serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An unexpected persistence failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for OrderError {
    /// Default mapping for store errors the service did not handle itself.
    ///
    /// Idempotency-key and stock-version races are recovered inside the
    /// services and never reach this conversion.
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => OrderError::NotFound(what),
            StoreError::DuplicateKey { constraint } => OrderError::Conflict(constraint),
            StoreError::CheckViolation { .. } => {
                OrderError::BusinessRule("stock cannot go negative".to_string())
            }
            StoreError::ConcurrencyConflict { product_id, .. } => {
                OrderError::Conflict(format!("concurrent update on stock {product_id}"))
            }
            StoreError::Serialization(e) => OrderError::Serialization(e),
            other => OrderError::Internal(other.to_string()),
        }
    }
}

/// Result type for the application services.
pub type Result<T> = std::result::Result<T, OrderError>;
