//! Application layer for order placement, catalog administration, and
//! archival of terminal orders.

mod archive;
mod cache;
mod catalog;
mod error;
mod service;
mod stock;
mod view;

pub use archive::ArchiveSweeper;
pub use cache::ProductCache;
pub use catalog::{AdjustStock, CreateProduct, ProductService};
pub use error::OrderError;
pub use service::{CancelOrder, CreateOrder, OrderLineCommand, OrderService, PlacedOrder};
pub use stock::StockLedger;
pub use view::{OrderCreatedEvent, OrderLineView, OrderView, ProductPage, ProductView};
