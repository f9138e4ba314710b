//! Order placement and lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use common::{OrderId, ProductId, UserId};
use notify::NotificationIngestor;
use orders::{CancelOrder, CreateOrder, OrderLineCommand, OrderService, OrderView, ProductService};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use store::Datastore;

use crate::error::ApiError;
use crate::routes::caller;

/// Shared application state accessible from all handlers.
pub struct AppState<S: Datastore + Clone> {
    pub order_service: OrderService<S>,
    pub product_service: ProductService<S>,
    pub ingestor: Arc<NotificationIngestor<S>>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub idempotency_key: String,
    pub lines: Vec<OrderLineRequest>,
}

#[derive(Deserialize)]
pub struct OrderLineRequest {
    pub product_id: uuid::Uuid,
    pub quantity: u32,
}

/// Hashes the request content for audit alongside the idempotency key.
fn request_fingerprint(user_id: UserId, key: &str, lines: &[OrderLineRequest]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_uuid().as_bytes());
    hasher.update(key.as_bytes());
    for line in lines {
        hasher.update(line.product_id.as_bytes());
        hasher.update(line.quantity.to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

// -- Handlers --

/// POST /orders — place an order.
///
/// Returns 201 for a new order and 200 with the original order when the
/// idempotency key was already used.
#[tracing::instrument(skip(state, headers, req))]
pub async fn create<S: Datastore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderView>), ApiError> {
    let user_id = caller(&headers)?;
    let fingerprint = request_fingerprint(user_id, &req.idempotency_key, &req.lines);

    let cmd = CreateOrder {
        user_id,
        idempotency_key: req.idempotency_key,
        request_fingerprint: Some(fingerprint),
        lines: req
            .lines
            .iter()
            .map(|line| OrderLineCommand {
                product_id: ProductId::from(line.product_id),
                quantity: line.quantity,
            })
            .collect(),
    };

    let placed = state.order_service.create_order(cmd).await?;
    let status = if placed.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(placed.order)))
}

/// GET /orders — list the caller's orders, newest first.
#[tracing::instrument(skip(state, headers))]
pub async fn list<S: Datastore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
) -> Result<Json<Vec<OrderView>>, ApiError> {
    let user_id = caller(&headers)?;
    let views = state.order_service.list_orders(user_id).await?;
    Ok(Json(views))
}

/// GET /orders/:id — load one of the caller's orders.
#[tracing::instrument(skip(state, headers))]
pub async fn get<S: Datastore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<OrderView>, ApiError> {
    let user_id = caller(&headers)?;
    let view = state
        .order_service
        .get_order(user_id, OrderId::from(id))
        .await?;
    Ok(Json(view))
}

/// POST /orders/:id/cancel — cancel one of the caller's orders.
#[tracing::instrument(skip(state, headers))]
pub async fn cancel<S: Datastore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<OrderView>, ApiError> {
    let user_id = caller(&headers)?;
    let view = state
        .order_service
        .cancel_order(CancelOrder {
            user_id,
            order_id: OrderId::from(id),
        })
        .await?;
    Ok(Json(view))
}
