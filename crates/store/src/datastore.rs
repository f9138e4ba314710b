use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, OrderId, ProductId, UserId};

use crate::Result;
use crate::model::{
    Notification, Order, OrderArchive, OrderStatus, OutboxEvent, Product, Stock, StockDelta,
};

/// Storage seam for the order processing system.
///
/// Every method is an atomic unit on its own; `commit_order` and
/// `archive_batch` are the two multi-table units the correctness
/// guarantees depend on.
#[async_trait]
pub trait Datastore: Send + Sync {
    // -- Products --

    /// Inserts a product together with its initial stock row.
    ///
    /// A duplicate SKU fails with `DuplicateKey` and leaves no stock row behind.
    async fn insert_product(&self, product: &Product, initial_quantity: i64) -> Result<()>;

    /// Loads a product by ID.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Loads the given products, keyed by ID. Missing IDs are simply absent.
    async fn get_products(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>>;

    /// Lists products ordered by creation time, oldest first.
    async fn list_products(&self, offset: i64, limit: i64) -> Result<Vec<Product>>;

    /// Returns the total number of products.
    async fn count_products(&self) -> Result<i64>;

    // -- Stock --

    /// Loads the stock row for a product.
    async fn get_stock(&self, product_id: ProductId) -> Result<Option<Stock>>;

    /// Applies a signed delta under optimistic concurrency.
    ///
    /// The write succeeds only if the stored version still equals
    /// `delta.expected_version`; the version then advances by one.
    /// A stale version fails with `ConcurrencyConflict`; a result below
    /// zero fails with `CheckViolation`.
    async fn update_stock(&self, delta: StockDelta) -> Result<Stock>;

    // -- Orders --

    /// Loads an order with its lines.
    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Looks up an order by its caller-supplied idempotency key.
    async fn find_order_by_idempotency_key(&self, key: &str) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first.
    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Persists a status transition for an existing order.
    async fn update_order_status(&self, id: OrderId, status: OrderStatus) -> Result<()>;

    /// Commits an order placement as one atomic unit: the idempotency-key
    /// uniqueness check, every stock delta (version CAS), the order with its
    /// lines, and exactly one outbox event. Any failure leaves no effect.
    async fn commit_order(
        &self,
        order: &Order,
        deltas: &[StockDelta],
        event: &OutboxEvent,
    ) -> Result<()>;

    // -- Outbox --

    /// Fetches up to `limit` events in `READY` or `FAILED` status whose
    /// `available_at` has passed, oldest-created first.
    async fn fetch_due_outbox(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEvent>>;

    /// Persists a publication outcome (status, retries, timestamps).
    async fn update_outbox(&self, event: &OutboxEvent) -> Result<()>;

    /// Loads a single outbox event.
    async fn get_outbox_event(&self, id: EventId) -> Result<Option<OutboxEvent>>;

    // -- Notifications --

    /// Inserts a notification; a duplicate event ID fails with `DuplicateKey`.
    async fn insert_notification(&self, notification: &Notification) -> Result<()>;

    /// Looks up a notification by the event ID that produced it.
    async fn find_notification_by_event_id(&self, event_id: EventId)
    -> Result<Option<Notification>>;

    /// Lists a user's notifications, newest first.
    async fn list_notifications_for_user(&self, user_id: UserId) -> Result<Vec<Notification>>;

    // -- Archive --

    /// Fetches up to `limit` terminal orders created before `threshold`,
    /// oldest first.
    async fn fetch_terminal_orders_before(
        &self,
        threshold: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>>;

    /// Writes archive snapshots and deletes the corresponding live orders
    /// in one atomic unit.
    async fn archive_batch(&self, archives: &[OrderArchive], order_ids: &[OrderId]) -> Result<()>;

    /// Lists all archived orders.
    async fn list_archives(&self) -> Result<Vec<OrderArchive>>;
}
