//! Idempotent consumer of order events.
//!
//! The relay delivers at least once; this crate turns that into
//! exactly-once notification records by deduplicating on event ID.

use common::UserId;
use orders::OrderCreatedEvent;
use outbox::BrokerMessage;
use store::{Datastore, Notification, constraint};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors surfaced while consuming order events.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The message payload did not parse as an order event.
    #[error("malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// An unexpected persistence failure.
    #[error(transparent)]
    Store(#[from] store::StoreError),
}

/// Consumes order events and records one notification per event.
pub struct NotificationIngestor<S: Datastore> {
    store: S,
}

impl<S: Datastore> NotificationIngestor<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Processes one event payload. Returns `true` when a notification was
    /// recorded, `false` when the event was already seen.
    ///
    /// Dedup is two-layered: a lookup skips most redeliveries cheaply, and
    /// the unique index on event ID catches the remaining races. Only that
    /// specific collision is swallowed; any other failure propagates so the
    /// event is redelivered.
    #[tracing::instrument(skip(self, payload))]
    pub async fn handle(&self, payload: &serde_json::Value) -> Result<bool, NotifyError> {
        let event: OrderCreatedEvent = serde_json::from_value(payload.clone())?;

        if self
            .store
            .find_notification_by_event_id(event.event_id)
            .await?
            .is_some()
        {
            metrics::counter!("notifications_duplicates_total").increment(1);
            return Ok(false);
        }

        let notification = Notification::received(
            event.event_id,
            event.order.id,
            event.order.user_id,
            format!(
                "order {} created with total {}",
                event.order.id, event.order.total
            ),
        );
        match self.store.insert_notification(&notification).await {
            Ok(()) => {
                metrics::counter!("notifications_recorded_total").increment(1);
                tracing::info!(event_id = %event.event_id, order_id = %event.order.id, "notification recorded");
                Ok(true)
            }
            Err(err) if err.is_duplicate_of(constraint::NOTIFICATION_EVENT_ID) => {
                metrics::counter!("notifications_duplicates_total").increment(1);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Lists a user's notifications, newest first.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Notification>, NotifyError> {
        Ok(self.store.list_notifications_for_user(user_id).await?)
    }

    /// Consumes a broker subscription until the channel closes.
    ///
    /// Malformed payloads are logged and skipped; store errors are logged
    /// and the event is left to the relay's redelivery.
    pub async fn run(&self, mut rx: broadcast::Receiver<BrokerMessage>) {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if let Err(err) = self.handle(&message.payload).await {
                        tracing::error!(error = %err, key = %message.key, "failed to process event");
                        metrics::counter!("notifications_errors_total").increment(1);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "consumer lagged behind broker");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{EventId, Money, ProductId};
    use orders::OrderView;
    use store::{MemoryStore, Order, OrderLine};

    fn event_payload(event_id: EventId) -> serde_json::Value {
        let order = Order::create(
            UserId::new(),
            "k1",
            None,
            vec![OrderLine::new(ProductId::new(), 1, Money::from_cents(500))],
        );
        serde_json::to_value(OrderCreatedEvent {
            event_id,
            order: OrderView::from_order(&order),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn first_delivery_records_a_notification() {
        let store = MemoryStore::new();
        let ingestor = NotificationIngestor::new(store.clone());

        let payload = event_payload(EventId::new());
        assert!(ingestor.handle(&payload).await.unwrap());
        assert_eq!(store.notification_count().await, 1);
    }

    #[tokio::test]
    async fn redelivery_is_a_noop() {
        let store = MemoryStore::new();
        let ingestor = NotificationIngestor::new(store.clone());

        let payload = event_payload(EventId::new());
        assert!(ingestor.handle(&payload).await.unwrap());
        assert!(!ingestor.handle(&payload).await.unwrap());
        assert!(!ingestor.handle(&payload).await.unwrap());
        assert_eq!(store.notification_count().await, 1);
    }

    #[tokio::test]
    async fn insert_collision_is_swallowed() {
        let store = MemoryStore::new();
        let ingestor = NotificationIngestor::new(store.clone());
        let event_id = EventId::new();
        let payload = event_payload(event_id);

        // Another consumer instance already stored this event
        let parsed: OrderCreatedEvent = serde_json::from_value(payload.clone()).unwrap();
        store
            .insert_notification(&Notification::received(
                event_id,
                parsed.order.id,
                parsed.order.user_id,
                "order created",
            ))
            .await
            .unwrap();

        assert!(!ingestor.handle(&payload).await.unwrap());
        assert_eq!(store.notification_count().await, 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_an_error() {
        let ingestor = NotificationIngestor::new(MemoryStore::new());
        let err = ingestor
            .handle(&serde_json::json!({"not": "an event"}))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Malformed(_)));
    }

    #[tokio::test]
    async fn notifications_are_listed_per_user() {
        let store = MemoryStore::new();
        let ingestor = NotificationIngestor::new(store.clone());

        let order = Order::create(
            UserId::new(),
            "k1",
            None,
            vec![OrderLine::new(ProductId::new(), 1, Money::from_cents(500))],
        );
        let payload = serde_json::to_value(OrderCreatedEvent {
            event_id: EventId::new(),
            order: OrderView::from_order(&order),
        })
        .unwrap();
        ingestor.handle(&payload).await.unwrap();

        let own = ingestor.list_for_user(order.user_id).await.unwrap();
        assert_eq!(own.len(), 1);
        assert_eq!(own[0].order_id, order.id);

        let other = ingestor.list_for_user(UserId::new()).await.unwrap();
        assert!(other.is_empty());
    }
}
