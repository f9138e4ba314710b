//! HTTP API server for the order processing system.
//!
//! Exposes order placement with idempotency, catalog administration, and
//! notification queries, with structured logging (tracing) and Prometheus
//! metrics. Background workers (outbox relay, event consumer, archive
//! sweeper) are wired up here and spawned by the binary.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use notify::NotificationIngestor;
use orders::{ArchiveSweeper, OrderService, ProductService};
use outbox::{InMemoryBroker, OutboxRelay};
use store::Datastore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Datastore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders", get(routes::orders::list::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/products", post(routes::products::create::<S>))
        .route("/products", get(routes::products::list::<S>))
        .route("/products/{id}", get(routes::products::get::<S>))
        .route(
            "/products/{id}/stock",
            post(routes::products::adjust_stock::<S>),
        )
        .route("/notifications", get(routes::notifications::list::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Application services plus the background workers the binary spawns.
pub struct Services<S: Datastore + Clone> {
    pub state: Arc<AppState<S>>,
    pub broker: Arc<InMemoryBroker>,
    pub relay: Arc<OutboxRelay<S, InMemoryBroker>>,
    pub sweeper: Arc<ArchiveSweeper<S>>,
}

/// Wires the services and workers onto one datastore.
pub fn create_services<S: Datastore + Clone + 'static>(store: S, config: &Config) -> Services<S> {
    let broker = InMemoryBroker::new();
    let relay = Arc::new(OutboxRelay::new(
        store.clone(),
        Arc::clone(&broker),
        config.relay_config(),
    ));
    let sweeper = Arc::new(ArchiveSweeper::new(
        store.clone(),
        chrono::Duration::days(config.archive_retention_days),
        config.archive_chunk_size,
    ));
    let ingestor = Arc::new(NotificationIngestor::new(store.clone()));

    let state = Arc::new(AppState {
        order_service: OrderService::new(store.clone()),
        product_service: ProductService::new(
            store,
            Duration::from_secs(config.product_cache_ttl_secs),
        ),
        ingestor,
    });

    Services {
        state,
        broker,
        relay,
        sweeper,
    }
}
