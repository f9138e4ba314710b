//! Read views returned to callers and serialized into outbox payloads.

use chrono::{DateTime, Utc};
use common::{EventId, Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};
use store::{Order, OrderStatus, Product, Stock};

/// A single order line with its derived amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLineView {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
    pub line_amount: Money,
}

/// The full order view: what order endpoints return and what the outbox
/// payload snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderView {
    pub id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub total: Money,
    pub idempotency_key: String,
    pub lines: Vec<OrderLineView>,
    pub created_at: DateTime<Utc>,
}

impl OrderView {
    /// Builds the view from a persisted order.
    pub fn from_order(order: &Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            status: order.status,
            total: order.total,
            idempotency_key: order.idempotency_key.clone(),
            lines: order
                .lines
                .iter()
                .map(|line| OrderLineView {
                    product_id: line.product_id,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    line_amount: line.line_amount(),
                })
                .collect(),
            created_at: order.created_at,
        }
    }
}

/// A catalog product together with its current stock quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductView {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub quantity: i64,
}

impl ProductView {
    /// Builds the view from a product and its stock row.
    pub fn from_parts(product: &Product, stock: &Stock) -> Self {
        Self {
            id: product.id,
            sku: product.sku.clone(),
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price,
            quantity: stock.quantity,
        }
    }
}

/// One page of the product catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductPage {
    pub items: Vec<ProductView>,
    pub total: i64,
    pub offset: i64,
    pub limit: i64,
}

/// The payload published for every committed order.
///
/// `event_id` doubles as the consumer-side dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub event_id: EventId,
    pub order: OrderView,
}
