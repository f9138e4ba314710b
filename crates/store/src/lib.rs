//! Persistence layer for the order processing system.
//!
//! The data model mirrors the relational schema: orders with their lines,
//! products with a 1:1 stock row, the transactional outbox, notifications,
//! and the order archive. The [`Datastore`] trait is the single seam between
//! the application services and storage; [`MemoryStore`] backs tests and
//! local runs, [`PostgresStore`] is the durable implementation.

mod datastore;
mod error;
mod memory;
mod model;
mod postgres;

pub use datastore::Datastore;
pub use error::{Result, StoreError, constraint};
pub use memory::MemoryStore;
pub use model::{
    InvalidTransition, Notification, NotificationStatus, Order, OrderArchive, OrderLine,
    OrderStatus, OutboxEvent, OutboxStatus, Product, Stock, StockDelta,
};
pub use postgres::PostgresStore;
