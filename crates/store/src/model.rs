//! Persisted record types and their lifecycle transitions.

use chrono::{DateTime, Duration, Utc};
use common::{EventId, Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Created,
    Cancelled,
    Completed,
}

impl OrderStatus {
    /// Returns true for states that end the order's live lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Completed)
    }

    /// Returns the status as its persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Completed => "COMPLETED",
        }
    }

    /// Parses the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(OrderStatus::Created),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            "COMPLETED" => Some(OrderStatus::Completed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Publication state of an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Ready,
    Published,
    Failed,
}

impl OutboxStatus {
    /// Returns the status as its persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Ready => "READY",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }

    /// Parses the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "READY" => Some(OutboxStatus::Ready),
            "PUBLISHED" => Some(OutboxStatus::Published),
            "FAILED" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// State of a stored notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Received,
}

impl NotificationStatus {
    /// Returns the status as its persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Received => "RECEIVED",
        }
    }
}

/// A catalog product with an immutable SKU and a price snapshot source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Creates a new product with a fresh identifier.
    pub fn new(
        sku: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        price: Money,
    ) -> Self {
        Self {
            id: ProductId::new(),
            sku: sku.into(),
            name: name.into(),
            description: description.into(),
            price,
            created_at: Utc::now(),
        }
    }
}

/// Per-product quantity with a conflict-detection version.
///
/// The version advances on every committed write; a writer that read an
/// older version loses with a [`crate::StoreError::ConcurrencyConflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stock {
    pub product_id: ProductId,
    pub quantity: i64,
    pub version: i64,
}

impl Stock {
    /// Creates the initial stock row for a new product.
    pub fn initialize(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
            version: 0,
        }
    }
}

/// A signed quantity change conditioned on the stock version the writer read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDelta {
    pub product_id: ProductId,
    pub delta: i64,
    pub expected_version: i64,
}

/// A single product line within an order.
///
/// The unit price is a snapshot taken at order time and never changes,
/// even if the catalog price later does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderLine {
    /// Creates a new order line.
    pub fn new(product_id: ProductId, quantity: u32, unit_price: Money) -> Self {
        Self {
            product_id,
            quantity,
            unit_price,
        }
    }

    /// Returns the derived line amount (price × quantity).
    pub fn line_amount(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// The order cannot leave its current state via the attempted transition.
#[derive(Debug, Error)]
#[error("order cannot be cancelled from state {0}")]
pub struct InvalidTransition(pub OrderStatus);

/// An order aggregate: the order row plus its lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total: Money,
    pub idempotency_key: String,
    pub request_fingerprint: Option<String>,
    pub lines: Vec<OrderLine>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new order in `CREATED` state with the total derived
    /// from its lines.
    pub fn create(
        user_id: UserId,
        idempotency_key: impl Into<String>,
        request_fingerprint: Option<String>,
        lines: Vec<OrderLine>,
    ) -> Self {
        let mut total = Money::zero();
        for line in &lines {
            total += line.line_amount();
        }
        Self {
            id: OrderId::new(),
            user_id,
            status: OrderStatus::Created,
            total,
            idempotency_key: idempotency_key.into(),
            request_fingerprint,
            lines,
            created_at: Utc::now(),
        }
    }

    /// Transitions `CREATED` → `CANCELLED`. Any other current state is rejected.
    pub fn cancel(&mut self) -> Result<(), InvalidTransition> {
        if self.status != OrderStatus::Created {
            return Err(InvalidTransition(self.status));
        }
        self.status = OrderStatus::Cancelled;
        Ok(())
    }
}

/// An event awaiting publication, written in the same atomic unit as the
/// order it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: EventId,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: OutboxStatus,
    pub retries: u32,
    pub available_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Creates a `READY` event, available for publication immediately.
    pub fn ready(
        id: EventId,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Ready,
            retries: 0,
            available_at: now,
            created_at: now,
            published_at: None,
        }
    }

    /// Records a successful publication.
    pub fn mark_published(&mut self) {
        self.status = OutboxStatus::Published;
        self.published_at = Some(Utc::now());
    }

    /// Records a failed publication attempt and schedules the retry with
    /// linear backoff capped at `cap`.
    pub fn mark_failed_with_backoff(&mut self, step: Duration, cap: Duration) {
        self.status = OutboxStatus::Failed;
        self.retries += 1;
        let delay = std::cmp::min(cap, step * self.retries as i32);
        self.available_at = Utc::now() + delay;
    }
}

/// A deduplicated record of a consumed order event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub event_id: EventId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: NotificationStatus,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Creates a notification for a received event.
    pub fn received(
        event_id: EventId,
        order_id: OrderId,
        user_id: UserId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            order_id,
            user_id,
            status: NotificationStatus::Received,
            message: message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Cold-storage snapshot of a terminal order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderArchive {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total: Money,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
    pub archived_at: DateTime<Utc>,
}

impl OrderArchive {
    /// Snapshots an order together with its serialized payload.
    pub fn from_order(order: &Order, payload: serde_json::Value) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            status: order.status,
            total: order.total,
            idempotency_key: order.idempotency_key.clone(),
            payload,
            archived_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lines() -> Vec<OrderLine> {
        vec![
            OrderLine::new(ProductId::new(), 2, Money::from_cents(1000)),
            OrderLine::new(ProductId::new(), 1, Money::from_cents(500)),
        ]
    }

    #[test]
    fn order_total_is_sum_of_line_amounts() {
        let order = Order::create(UserId::new(), "k1", None, sample_lines());
        assert_eq!(order.total.cents(), 2500);
        assert_eq!(order.status, OrderStatus::Created);
    }

    #[test]
    fn cancel_only_from_created() {
        let mut order = Order::create(UserId::new(), "k1", None, sample_lines());
        order.cancel().unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);

        assert!(order.cancel().is_err());

        let mut completed = Order::create(UserId::new(), "k2", None, sample_lines());
        completed.status = OrderStatus::Completed;
        assert!(completed.cancel().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!OrderStatus::Created.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Completed.is_terminal());
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            OrderStatus::Created,
            OrderStatus::Cancelled,
            OrderStatus::Completed,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("SHIPPED"), None);
    }

    #[test]
    fn outbox_backoff_is_linear_and_capped() {
        let mut event = OutboxEvent::ready(
            EventId::new(),
            "ORDER",
            OrderId::new().to_string(),
            "ORDER_CREATED",
            serde_json::json!({}),
        );
        let step = Duration::seconds(5);
        let cap = Duration::seconds(60);

        event.mark_failed_with_backoff(step, cap);
        assert_eq!(event.status, OutboxStatus::Failed);
        assert_eq!(event.retries, 1);
        let delay = event.available_at - Utc::now();
        assert!(delay <= Duration::seconds(5));
        assert!(delay > Duration::seconds(3));

        // Drive retries past the cap
        for _ in 0..20 {
            event.mark_failed_with_backoff(step, cap);
        }
        let delay = event.available_at - Utc::now();
        assert!(delay <= Duration::seconds(60));
        assert!(delay > Duration::seconds(58));
    }

    #[test]
    fn outbox_mark_published_sets_timestamp() {
        let mut event = OutboxEvent::ready(
            EventId::new(),
            "ORDER",
            OrderId::new().to_string(),
            "ORDER_CREATED",
            serde_json::json!({}),
        );
        assert!(event.published_at.is_none());
        event.mark_published();
        assert_eq!(event.status, OutboxStatus::Published);
        assert!(event.published_at.is_some());
    }

    #[test]
    fn archive_preserves_order_fields() {
        let order = Order::create(UserId::new(), "k1", None, sample_lines());
        let payload = serde_json::to_value(&order).unwrap();
        let archive = OrderArchive::from_order(&order, payload);
        assert_eq!(archive.order_id, order.id);
        assert_eq!(archive.total, order.total);
        assert_eq!(archive.idempotency_key, order.idempotency_key);
    }
}
