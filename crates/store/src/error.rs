use common::ProductId;
use thiserror::Error;

/// Names of the correctness-bearing constraints, shared by both datastore
/// implementations so callers can match on specific violations.
pub mod constraint {
    /// Unique index on `orders.idempotency_key`.
    pub const ORDER_IDEMPOTENCY_KEY: &str = "orders_idempotency_key";
    /// Unique index on `notifications.event_id`.
    pub const NOTIFICATION_EVENT_ID: &str = "notifications_event_id";
    /// Unique index on `products.sku`.
    pub const PRODUCT_SKU: &str = "products_sku";
    /// Check that `stocks.quantity` never goes negative.
    pub const STOCK_QUANTITY_NON_NEGATIVE: &str = "stocks_quantity_non_negative";
}

/// Errors that can occur when interacting with the datastore.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A conditional stock write lost against a concurrent writer.
    /// The expected version did not match the stored version.
    #[error(
        "concurrency conflict on stock {product_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        product_id: ProductId,
        expected: i64,
        actual: i64,
    },

    /// A unique constraint was violated.
    #[error("duplicate key: {constraint}")]
    DuplicateKey { constraint: String },

    /// A check constraint was violated.
    #[error("check constraint violated: {constraint}")]
    CheckViolation { constraint: String },

    /// The referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if this is a duplicate-key violation of the named constraint.
    pub fn is_duplicate_of(&self, name: &str) -> bool {
        matches!(self, StoreError::DuplicateKey { constraint } if constraint == name)
    }
}

/// Result type for datastore operations.
pub type Result<T> = std::result::Result<T, StoreError>;
