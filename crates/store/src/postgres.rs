use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{EventId, Money, OrderId, ProductId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::datastore::Datastore;
use crate::error::{Result, StoreError};
use crate::model::{
    Notification, NotificationStatus, Order, OrderArchive, OrderLine, OrderStatus, OutboxEvent,
    OutboxStatus, Product, Stock, StockDelta,
};

/// PostgreSQL-backed datastore implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL datastore.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }
}

/// Translates named unique/check violations into their typed errors so
/// callers can match on the constraint instead of parsing driver messages.
fn map_db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && let Some(name) = db_err.constraint()
    {
        if db_err.is_unique_violation() {
            return StoreError::DuplicateKey {
                constraint: name.to_string(),
            };
        }
        if db_err.is_check_violation() {
            return StoreError::CheckViolation {
                constraint: name.to_string(),
            };
        }
    }
    StoreError::Database(e)
}

fn decode_err(msg: String) -> StoreError {
    StoreError::Serialization(serde_json::Error::io(std::io::Error::other(msg)))
}

fn product_from_row(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: Money::from_cents(row.try_get("price_cents")?),
        created_at: row.try_get("created_at")?,
    })
}

fn order_status_from_row(row: &PgRow) -> Result<OrderStatus> {
    let status: String = row.try_get("status")?;
    OrderStatus::parse(&status).ok_or_else(|| decode_err(format!("unknown order status {status}")))
}

fn order_from_row(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order> {
    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        status: order_status_from_row(row)?,
        total: Money::from_cents(row.try_get("total_cents")?),
        idempotency_key: row.try_get("idempotency_key")?,
        request_fingerprint: row.try_get("request_fingerprint")?,
        lines,
        created_at: row.try_get("created_at")?,
    })
}

fn line_from_row(row: &PgRow) -> Result<OrderLine> {
    Ok(OrderLine {
        product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
        quantity: row.try_get::<i32, _>("quantity")? as u32,
        unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
    })
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxEvent> {
    let status: String = row.try_get("status")?;
    Ok(OutboxEvent {
        id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        status: OutboxStatus::parse(&status)
            .ok_or_else(|| decode_err(format!("unknown outbox status {status}")))?,
        retries: row.try_get::<i32, _>("retries")? as u32,
        available_at: row.try_get("available_at")?,
        created_at: row.try_get("created_at")?,
        published_at: row.try_get("published_at")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<Notification> {
    Ok(Notification {
        id: row.try_get("id")?,
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        status: NotificationStatus::Received,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn archive_from_row(row: &PgRow) -> Result<OrderArchive> {
    Ok(OrderArchive {
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
        user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
        status: order_status_from_row(row)?,
        total: Money::from_cents(row.try_get("total_cents")?),
        idempotency_key: row.try_get("idempotency_key")?,
        payload: row.try_get("payload")?,
        archived_at: row.try_get("archived_at")?,
    })
}

const SELECT_ORDER: &str = "SELECT id, user_id, status, total_cents, idempotency_key, \
     request_fingerprint, created_at FROM orders";

const SELECT_LINES: &str = "SELECT order_id, product_id, quantity, unit_price_cents \
     FROM order_lines WHERE order_id = ANY($1) ORDER BY order_id, line_no";

impl PostgresStore {
    /// Loads the lines for a set of orders, grouped by order ID.
    async fn load_lines(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderLine>>> {
        let rows = sqlx::query(SELECT_LINES)
            .bind(order_ids)
            .fetch_all(&self.pool)
            .await?;

        let mut grouped: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in rows {
            let order_id: Uuid = row.try_get("order_id")?;
            grouped.entry(order_id).or_default().push(line_from_row(&row)?);
        }
        Ok(grouped)
    }

    async fn rows_to_orders(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids: Vec<Uuid> = rows
            .iter()
            .map(|r| r.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<_, _>>()?;
        let mut lines = self.load_lines(&ids).await?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                order_from_row(row, lines.remove(&id).unwrap_or_default())
            })
            .collect()
    }
}

#[async_trait]
impl Datastore for PostgresStore {
    async fn insert_product(&self, product: &Product, initial_quantity: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO products (id, sku, name, description, price_cents, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(product.id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.cents())
        .bind(product.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        sqlx::query("INSERT INTO stocks (product_id, quantity, version) VALUES ($1, $2, 0)")
            .bind(product.id.as_uuid())
            .bind(initial_quantity)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, sku, name, description, price_cents, created_at \
             FROM products WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn get_products(&self, ids: &[ProductId]) -> Result<HashMap<ProductId, Product>> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let rows = sqlx::query(
            "SELECT id, sku, name, description, price_cents, created_at \
             FROM products WHERE id = ANY($1)",
        )
        .bind(&uuids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| product_from_row(row).map(|p| (p.id, p)))
            .collect()
    }

    async fn list_products(&self, offset: i64, limit: i64) -> Result<Vec<Product>> {
        let rows = sqlx::query(
            "SELECT id, sku, name, description, price_cents, created_at \
             FROM products ORDER BY created_at ASC OFFSET $1 LIMIT $2",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(product_from_row).collect()
    }

    async fn count_products(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn get_stock(&self, product_id: ProductId) -> Result<Option<Stock>> {
        let row = sqlx::query("SELECT product_id, quantity, version FROM stocks WHERE product_id = $1")
            .bind(product_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(Stock {
                product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
                quantity: row.try_get("quantity")?,
                version: row.try_get("version")?,
            })
        })
        .transpose()
    }

    async fn update_stock(&self, delta: StockDelta) -> Result<Stock> {
        let row = sqlx::query(
            "UPDATE stocks SET quantity = quantity + $2, version = version + 1 \
             WHERE product_id = $1 AND version = $3 \
             RETURNING product_id, quantity, version",
        )
        .bind(delta.product_id.as_uuid())
        .bind(delta.delta)
        .bind(delta.expected_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_err)?;

        match row {
            Some(row) => Ok(Stock {
                product_id: delta.product_id,
                quantity: row.try_get("quantity")?,
                version: row.try_get("version")?,
            }),
            None => {
                let actual: Option<i64> =
                    sqlx::query_scalar("SELECT version FROM stocks WHERE product_id = $1")
                        .bind(delta.product_id.as_uuid())
                        .fetch_optional(&self.pool)
                        .await?;
                match actual {
                    Some(actual) => Err(StoreError::ConcurrencyConflict {
                        product_id: delta.product_id,
                        expected: delta.expected_version,
                        actual,
                    }),
                    None => Err(StoreError::NotFound(format!("stock {}", delta.product_id))),
                }
            }
        }
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("{SELECT_ORDER} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let mut lines = self.load_lines(&[id.as_uuid()]).await?;
                Ok(Some(order_from_row(
                    &row,
                    lines.remove(&id.as_uuid()).unwrap_or_default(),
                )?))
            }
            None => Ok(None),
        }
    }

    async fn find_order_by_idempotency_key(&self, key: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("{SELECT_ORDER} WHERE idempotency_key = $1"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let id: Uuid = row.try_get("id")?;
                let mut lines = self.load_lines(&[id]).await?;
                Ok(Some(order_from_row(
                    &row,
                    lines.remove(&id).unwrap_or_default(),
                )?))
            }
            None => Ok(None),
        }
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ORDER} WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        self.rows_to_orders(rows).await
    }

    async fn update_order_status(&self, id: OrderId, status: OrderStatus) -> Result<()> {
        let result = sqlx::query("UPDATE orders SET status = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("order {id}")));
        }
        Ok(())
    }

    async fn commit_order(
        &self,
        order: &Order,
        deltas: &[StockDelta],
        event: &OutboxEvent,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // The unique index on idempotency_key arbitrates racing first
        // submissions; the loser aborts here before touching stock.
        sqlx::query(
            "INSERT INTO orders (id, user_id, status, total_cents, idempotency_key, \
             request_fingerprint, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.total.cents())
        .bind(&order.idempotency_key)
        .bind(&order.request_fingerprint)
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_db_err)?;

        for (line_no, line) in order.lines.iter().enumerate() {
            sqlx::query(
                "INSERT INTO order_lines (order_id, line_no, product_id, quantity, \
                 unit_price_cents) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(order.id.as_uuid())
            .bind(line_no as i32)
            .bind(line.product_id.as_uuid())
            .bind(line.quantity as i32)
            .bind(line.unit_price.cents())
            .execute(&mut *tx)
            .await?;
        }

        for delta in deltas {
            let result = sqlx::query(
                "UPDATE stocks SET quantity = quantity + $2, version = version + 1 \
                 WHERE product_id = $1 AND version = $3",
            )
            .bind(delta.product_id.as_uuid())
            .bind(delta.delta)
            .bind(delta.expected_version)
            .execute(&mut *tx)
            .await
            .map_err(map_db_err)?;

            if result.rows_affected() == 0 {
                let actual: Option<i64> =
                    sqlx::query_scalar("SELECT version FROM stocks WHERE product_id = $1")
                        .bind(delta.product_id.as_uuid())
                        .fetch_optional(&mut *tx)
                        .await?;
                return Err(match actual {
                    Some(actual) => StoreError::ConcurrencyConflict {
                        product_id: delta.product_id,
                        expected: delta.expected_version,
                        actual,
                    },
                    None => StoreError::NotFound(format!("stock {}", delta.product_id)),
                });
            }
        }

        sqlx::query(
            "INSERT INTO outbox_events (id, aggregate_type, aggregate_id, event_type, payload, \
             status, retries, available_at, created_at, published_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(event.id.as_uuid())
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retries as i32)
        .bind(event.available_at)
        .bind(event.created_at)
        .bind(event.published_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_due_outbox(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            "SELECT id, aggregate_type, aggregate_id, event_type, payload, status, retries, \
             available_at, created_at, published_at \
             FROM outbox_events \
             WHERE status IN ('READY', 'FAILED') AND available_at <= $1 \
             ORDER BY created_at ASC LIMIT $2",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(outbox_from_row).collect()
    }

    async fn update_outbox(&self, event: &OutboxEvent) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outbox_events SET payload = $2, status = $3, retries = $4, \
             available_at = $5, published_at = $6 WHERE id = $1",
        )
        .bind(event.id.as_uuid())
        .bind(&event.payload)
        .bind(event.status.as_str())
        .bind(event.retries as i32)
        .bind(event.available_at)
        .bind(event.published_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("outbox event {}", event.id)));
        }
        Ok(())
    }

    async fn get_outbox_event(&self, id: EventId) -> Result<Option<OutboxEvent>> {
        let row = sqlx::query(
            "SELECT id, aggregate_type, aggregate_id, event_type, payload, status, retries, \
             available_at, created_at, published_at FROM outbox_events WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(outbox_from_row).transpose()
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (id, event_id, order_id, user_id, status, message, \
             created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(notification.id)
        .bind(notification.event_id.as_uuid())
        .bind(notification.order_id.as_uuid())
        .bind(notification.user_id.as_uuid())
        .bind(notification.status.as_str())
        .bind(&notification.message)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_db_err)?;
        Ok(())
    }

    async fn find_notification_by_event_id(
        &self,
        event_id: EventId,
    ) -> Result<Option<Notification>> {
        let row = sqlx::query(
            "SELECT id, event_id, order_id, user_id, status, message, created_at \
             FROM notifications WHERE event_id = $1",
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(notification_from_row).transpose()
    }

    async fn list_notifications_for_user(&self, user_id: UserId) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT id, event_id, order_id, user_id, status, message, created_at \
             FROM notifications WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(notification_from_row).collect()
    }

    async fn fetch_terminal_orders_before(
        &self,
        threshold: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ORDER} WHERE status IN ('CANCELLED', 'COMPLETED') AND created_at < $1 \
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(threshold)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        self.rows_to_orders(rows).await
    }

    async fn archive_batch(&self, archives: &[OrderArchive], order_ids: &[OrderId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for archive in archives {
            sqlx::query(
                "INSERT INTO orders_archive (order_id, user_id, status, total_cents, \
                 idempotency_key, payload, archived_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(archive.order_id.as_uuid())
            .bind(archive.user_id.as_uuid())
            .bind(archive.status.as_str())
            .bind(archive.total.cents())
            .bind(&archive.idempotency_key)
            .bind(&archive.payload)
            .bind(archive.archived_at)
            .execute(&mut *tx)
            .await?;
        }

        let uuids: Vec<Uuid> = order_ids.iter().map(|id| id.as_uuid()).collect();
        sqlx::query("DELETE FROM orders WHERE id = ANY($1)")
            .bind(&uuids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_archives(&self) -> Result<Vec<OrderArchive>> {
        let rows = sqlx::query(
            "SELECT order_id, user_id, status, total_cents, idempotency_key, payload, \
             archived_at FROM orders_archive ORDER BY archived_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(archive_from_row).collect()
    }
}
