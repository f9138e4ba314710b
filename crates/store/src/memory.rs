use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, OrderId, ProductId, UserId};
use tokio::sync::RwLock;

use crate::datastore::Datastore;
use crate::error::{Result, StoreError, constraint};
use crate::model::{
    Notification, Order, OrderArchive, OrderStatus, OutboxEvent, OutboxStatus, Product, Stock,
    StockDelta,
};

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<ProductId, Product>,
    stocks: HashMap<ProductId, Stock>,
    orders: HashMap<OrderId, Order>,
    outbox: Vec<OutboxEvent>,
    notifications: Vec<Notification>,
    archives: Vec<OrderArchive>,
}

/// In-memory datastore implementation for testing and local runs.
///
/// All tables live behind a single lock, so every trait method is atomic
/// with respect to every other, matching the transaction boundaries of the
/// PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of outbox events stored.
    pub async fn outbox_count(&self) -> usize {
        self.tables.read().await.outbox.len()
    }

    /// Returns the total number of notifications stored.
    pub async fn notification_count(&self) -> usize {
        self.tables.read().await.notifications.len()
    }

    /// Clears all tables.
    pub async fn clear(&self) {
        let mut tables = self.tables.write().await;
        *tables = Tables::default();
    }
}

fn apply_delta(tables: &mut Tables, delta: StockDelta) -> Result<Stock> {
    let stock = tables
        .stocks
        .get_mut(&delta.product_id)
        .ok_or_else(|| StoreError::NotFound(format!("stock {}", delta.product_id)))?;

    if stock.version != delta.expected_version {
        return Err(StoreError::ConcurrencyConflict {
            product_id: delta.product_id,
            expected: delta.expected_version,
            actual: stock.version,
        });
    }
    if stock.quantity + delta.delta < 0 {
        return Err(StoreError::CheckViolation {
            constraint: constraint::STOCK_QUANTITY_NON_NEGATIVE.to_string(),
        });
    }

    stock.quantity += delta.delta;
    stock.version += 1;
    Ok(*stock)
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn insert_product(&self, product: &Product, initial_quantity: i64) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.products.values().any(|p| p.sku == product.sku) {
            return Err(StoreError::DuplicateKey {
                constraint: constraint::PRODUCT_SKU.to_string(),
            });
        }
        tables.products.insert(product.id, product.clone());
        tables
            .stocks
            .insert(product.id, Stock::initialize(product.id, initial_quantity));
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn get_products(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.products.get(id).map(|p| (*id, p.clone())))
            .collect())
    }

    async fn list_products(&self, offset: i64, limit: i64) -> Result<Vec<Product>> {
        let tables = self.tables.read().await;
        let mut products: Vec<_> = tables.products.values().cloned().collect();
        products.sort_by_key(|p| p.created_at);
        Ok(products
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_products(&self) -> Result<i64> {
        Ok(self.tables.read().await.products.len() as i64)
    }

    async fn get_stock(&self, product_id: ProductId) -> Result<Option<Stock>> {
        Ok(self.tables.read().await.stocks.get(&product_id).copied())
    }

    async fn update_stock(&self, delta: StockDelta) -> Result<Stock> {
        let mut tables = self.tables.write().await;
        apply_delta(&mut tables, delta)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.tables.read().await.orders.get(&id).cloned())
    }

    async fn find_order_by_idempotency_key(&self, key: &str) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .find(|o| o.idempotency_key == key)
            .cloned())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_order_status(&self, id: OrderId, status: OrderStatus) -> Result<()> {
        let mut tables = self.tables.write().await;
        let order = tables
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("order {id}")))?;
        order.status = status;
        Ok(())
    }

    async fn commit_order(
        &self,
        order: &Order,
        deltas: &[StockDelta],
        event: &OutboxEvent,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;

        if tables
            .orders
            .values()
            .any(|o| o.idempotency_key == order.idempotency_key)
        {
            return Err(StoreError::DuplicateKey {
                constraint: constraint::ORDER_IDEMPOTENCY_KEY.to_string(),
            });
        }

        // Validate every delta before applying any, so a late failure
        // cannot leave a partial reservation behind.
        for delta in deltas {
            let stock = tables
                .stocks
                .get(&delta.product_id)
                .ok_or_else(|| StoreError::NotFound(format!("stock {}", delta.product_id)))?;
            if stock.version != delta.expected_version {
                return Err(StoreError::ConcurrencyConflict {
                    product_id: delta.product_id,
                    expected: delta.expected_version,
                    actual: stock.version,
                });
            }
            if stock.quantity + delta.delta < 0 {
                return Err(StoreError::CheckViolation {
                    constraint: constraint::STOCK_QUANTITY_NON_NEGATIVE.to_string(),
                });
            }
        }

        for delta in deltas {
            apply_delta(&mut tables, *delta)?;
        }
        tables.orders.insert(order.id, order.clone());
        tables.outbox.push(event.clone());
        Ok(())
    }

    async fn fetch_due_outbox(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEvent>> {
        let tables = self.tables.read().await;
        let mut due: Vec<_> = tables
            .outbox
            .iter()
            .filter(|e| {
                matches!(e.status, OutboxStatus::Ready | OutboxStatus::Failed)
                    && e.available_at <= now
            })
            .cloned()
            .collect();
        due.sort_by_key(|e| e.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn update_outbox(&self, event: &OutboxEvent) -> Result<()> {
        let mut tables = self.tables.write().await;
        let stored = tables
            .outbox
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox event {}", event.id)))?;
        *stored = event.clone();
        Ok(())
    }

    async fn get_outbox_event(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        let tables = self.tables.read().await;
        Ok(tables.outbox.iter().find(|e| e.id == id).cloned())
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables
            .notifications
            .iter()
            .any(|n| n.event_id == notification.event_id)
        {
            return Err(StoreError::DuplicateKey {
                constraint: constraint::NOTIFICATION_EVENT_ID.to_string(),
            });
        }
        tables.notifications.push(notification.clone());
        Ok(())
    }

    async fn find_notification_by_event_id(
        &self,
        event_id: EventId,
    ) -> Result<Option<Notification>> {
        let tables = self.tables.read().await;
        Ok(tables
            .notifications
            .iter()
            .find(|n| n.event_id == event_id)
            .cloned())
    }

    async fn list_notifications_for_user(&self, user_id: UserId) -> Result<Vec<Notification>> {
        let tables = self.tables.read().await;
        let mut notifications: Vec<_> = tables
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn fetch_terminal_orders_before(
        &self,
        threshold: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        let mut orders: Vec<_> = tables
            .orders
            .values()
            .filter(|o| o.status.is_terminal() && o.created_at < threshold)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders.truncate(limit);
        Ok(orders)
    }

    async fn archive_batch(&self, archives: &[OrderArchive], order_ids: &[OrderId]) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.archives.extend(archives.iter().cloned());
        for id in order_ids {
            tables.orders.remove(id);
        }
        Ok(())
    }

    async fn list_archives(&self) -> Result<Vec<OrderArchive>> {
        Ok(self.tables.read().await.archives.clone())
    }
}
