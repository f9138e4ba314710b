//! Catalog administration endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::{Money, ProductId};
use orders::{AdjustStock, CreateProduct, ProductPage, ProductView};
use serde::Deserialize;
use store::Datastore;

use crate::error::ApiError;
use crate::routes::orders::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price_cents: i64,
    pub initial_quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct ListProductsQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub quantity_delta: i64,
}

// -- Handlers --

/// POST /products — register a product with its opening stock.
#[tracing::instrument(skip(state, req), fields(sku = %req.sku))]
pub async fn create<S: Datastore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ProductView>), ApiError> {
    let view = state
        .product_service
        .create_product(CreateProduct {
            sku: req.sku,
            name: req.name,
            description: req.description,
            price: Money::from_cents(req.price_cents),
            initial_quantity: req.initial_quantity,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /products — list a catalog page, oldest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: Datastore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(query): Query<ListProductsQuery>,
) -> Result<Json<ProductPage>, ApiError> {
    let page = state
        .product_service
        .list_products(query.offset.unwrap_or(0), query.limit.unwrap_or(20))
        .await?;
    Ok(Json(page))
}

/// GET /products/:id — load a product with its stock level.
#[tracing::instrument(skip(state))]
pub async fn get<S: Datastore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<ProductView>, ApiError> {
    let view = state.product_service.get_product(ProductId::from(id)).await?;
    Ok(Json(view))
}

/// POST /products/:id/stock — adjust a product's stock by a signed amount.
#[tracing::instrument(skip(state))]
pub async fn adjust_stock<S: Datastore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<uuid::Uuid>,
    Json(req): Json<AdjustStockRequest>,
) -> Result<Json<ProductView>, ApiError> {
    let view = state
        .product_service
        .adjust_stock(AdjustStock {
            product_id: ProductId::from(id),
            delta: req.quantity_delta,
        })
        .await?;
    Ok(Json(view))
}
