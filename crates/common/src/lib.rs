//! Shared identifiers and the money type used across the order system.

mod ids;
mod money;

pub use ids::{EventId, OrderId, ProductId, UserId};
pub use money::Money;
