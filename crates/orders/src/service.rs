//! Order placement and lifecycle service.

use std::collections::HashMap;

use common::{EventId, OrderId, ProductId, UserId};
use store::{Datastore, Order, OrderLine, OutboxEvent, StockDelta, StoreError, constraint};

use crate::error::{OrderError, Result};
use crate::view::{OrderCreatedEvent, OrderView};

/// Upper bound on rebuild-and-retry attempts after losing a stock CAS.
///
/// Every conflict means another writer committed, so the system makes
/// progress; the bound only guards against a livelock bug.
const MAX_PLACEMENT_ATTEMPTS: usize = 32;

/// One requested product line.
#[derive(Debug, Clone)]
pub struct OrderLineCommand {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Command to place an order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: UserId,
    /// Caller-supplied token identifying the logical request.
    pub idempotency_key: String,
    /// Hash of the request body, stored for audit (not compared on replay).
    pub request_fingerprint: Option<String>,
    pub lines: Vec<OrderLineCommand>,
}

/// Command to cancel an order the caller owns.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub user_id: UserId,
    pub order_id: OrderId,
}

/// Result of a placement: the order, and whether it already existed for
/// the submitted idempotency key.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: OrderView,
    pub replayed: bool,
}

/// Orchestrates order placement: idempotency check, stock reservation,
/// order persistence, and outbox append as one atomic unit.
pub struct OrderService<S: Datastore> {
    store: S,
}

impl<S: Datastore> OrderService<S> {
    /// Creates a new order service on the given datastore.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Places an order, or returns the existing one for a reused
    /// idempotency key.
    ///
    /// Retries of the same logical request are pure reads. A race between
    /// two first submissions with the same key is arbitrated by the unique
    /// index: the loser re-reads and returns the winner's order. A lost
    /// stock CAS rebuilds the attempt from fresh reads.
    #[tracing::instrument(skip(self, cmd), fields(user_id = %cmd.user_id))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<PlacedOrder> {
        validate_create(&cmd)?;

        if let Some(existing) = self
            .store
            .find_order_by_idempotency_key(&cmd.idempotency_key)
            .await?
        {
            metrics::counter!("orders_idempotent_replays_total").increment(1);
            return Ok(PlacedOrder {
                order: OrderView::from_order(&existing),
                replayed: true,
            });
        }

        for _ in 0..MAX_PLACEMENT_ATTEMPTS {
            let (order, deltas, event) = self.build_placement(&cmd).await?;

            match self.store.commit_order(&order, &deltas, &event).await {
                Ok(()) => {
                    metrics::counter!("orders_created_total").increment(1);
                    tracing::info!(order_id = %order.id, total = %order.total, "order placed");
                    return Ok(PlacedOrder {
                        order: OrderView::from_order(&order),
                        replayed: false,
                    });
                }
                Err(err) if err.is_duplicate_of(constraint::ORDER_IDEMPOTENCY_KEY) => {
                    // A concurrent submission with the same key won the
                    // insert; its committed row is the result of this call.
                    tracing::warn!(
                        idempotency_key = %cmd.idempotency_key,
                        "idempotency key collision, returning winner"
                    );
                    metrics::counter!("orders_idempotent_replays_total").increment(1);
                    let winner = self
                        .store
                        .find_order_by_idempotency_key(&cmd.idempotency_key)
                        .await?
                        .ok_or_else(|| {
                            OrderError::Internal(
                                "order vanished after idempotency collision".to_string(),
                            )
                        })?;
                    return Ok(PlacedOrder {
                        order: OrderView::from_order(&winner),
                        replayed: true,
                    });
                }
                Err(StoreError::ConcurrencyConflict { product_id, .. }) => {
                    tracing::debug!(%product_id, "stock version conflict, retrying placement");
                    metrics::counter!("orders_stock_conflicts_total").increment(1);
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(OrderError::Internal(
            "order placement did not converge under contention".to_string(),
        ))
    }

    /// Cancels an order; only the owner may cancel, and only from `CREATED`.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, cmd: CancelOrder) -> Result<OrderView> {
        let mut order = self
            .store
            .get_order(cmd.order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("order {}", cmd.order_id)))?;
        ensure_owner(&order, cmd.user_id)?;

        order
            .cancel()
            .map_err(|e| OrderError::BusinessRule(e.to_string()))?;
        self.store
            .update_order_status(order.id, order.status)
            .await?;

        metrics::counter!("orders_cancelled_total").increment(1);
        Ok(OrderView::from_order(&order))
    }

    /// Loads an order the caller owns.
    pub async fn get_order(&self, user_id: UserId, order_id: OrderId) -> Result<OrderView> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("order {order_id}")))?;
        ensure_owner(&order, user_id)?;
        Ok(OrderView::from_order(&order))
    }

    /// Lists the caller's orders, newest first.
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<OrderView>> {
        let orders = self.store.list_orders_for_user(user_id).await?;
        Ok(orders.iter().map(OrderView::from_order).collect())
    }

    /// Resolves products, validates stock from fresh reads, and assembles
    /// the order, its merged stock deltas, and the outbox event.
    async fn build_placement(
        &self,
        cmd: &CreateOrder,
    ) -> Result<(Order, Vec<StockDelta>, OutboxEvent)> {
        let product_ids: Vec<ProductId> = cmd.lines.iter().map(|l| l.product_id).collect();
        let products = self.store.get_products(&product_ids).await?;

        let mut lines = Vec::with_capacity(cmd.lines.len());
        let mut requested: HashMap<ProductId, i64> = HashMap::new();
        for line in &cmd.lines {
            let product = products
                .get(&line.product_id)
                .ok_or_else(|| OrderError::NotFound(format!("product {}", line.product_id)))?;
            lines.push(OrderLine::new(product.id, line.quantity, product.price));
            *requested.entry(product.id).or_default() += line.quantity as i64;
        }

        // One delta per product, so two lines for the same product cannot
        // race each other's version inside a single placement.
        let mut deltas = Vec::with_capacity(requested.len());
        for (product_id, quantity) in requested {
            let stock = self
                .store
                .get_stock(product_id)
                .await?
                .ok_or_else(|| OrderError::NotFound(format!("stock {product_id}")))?;
            if stock.quantity - quantity < 0 {
                return Err(OrderError::BusinessRule(format!(
                    "insufficient stock for product {product_id}"
                )));
            }
            deltas.push(StockDelta {
                product_id,
                delta: -quantity,
                expected_version: stock.version,
            });
        }

        let order = Order::create(
            cmd.user_id,
            cmd.idempotency_key.clone(),
            cmd.request_fingerprint.clone(),
            lines,
        );

        let event_id = EventId::new();
        let payload = serde_json::to_value(OrderCreatedEvent {
            event_id,
            order: OrderView::from_order(&order),
        })?;
        let event = OutboxEvent::ready(
            event_id,
            "ORDER",
            order.id.to_string(),
            "ORDER_CREATED",
            payload,
        );

        Ok((order, deltas, event))
    }
}

fn validate_create(cmd: &CreateOrder) -> Result<()> {
    if cmd.idempotency_key.trim().is_empty() {
        return Err(OrderError::Validation(
            "idempotency key is required".to_string(),
        ));
    }
    if cmd.lines.is_empty() {
        return Err(OrderError::Validation(
            "order must contain at least one line".to_string(),
        ));
    }
    if cmd.lines.iter().any(|l| l.quantity == 0) {
        return Err(OrderError::Validation(
            "line quantity must be positive".to_string(),
        ));
    }
    Ok(())
}

fn ensure_owner(order: &Order, user_id: UserId) -> Result<()> {
    if order.user_id != user_id {
        return Err(OrderError::Authorization(
            "order belongs to another user".to_string(),
        ));
    }
    Ok(())
}
