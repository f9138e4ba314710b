//! Outbox relay: moves committed events from the outbox table to the
//! message broker with at-least-once delivery.

mod broker;
mod relay;

pub use broker::{Broker, BrokerError, BrokerMessage, InMemoryBroker};
pub use relay::{OutboxRelay, RelayConfig, RelaySummary};
