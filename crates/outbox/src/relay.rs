//! Polling relay from the outbox table to the broker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use store::Datastore;

use crate::broker::Broker;

/// Tunables for the relay loop.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Topic order events are published on.
    pub topic: String,
    /// Maximum events taken per poll.
    pub batch_size: usize,
    /// How often the outbox is polled.
    pub poll_interval: Duration,
    /// Linear backoff step after a failed publish.
    pub backoff_step: chrono::Duration,
    /// Upper bound on the backoff delay.
    pub backoff_cap: chrono::Duration,
    /// How long a single publish may take before it counts as failed.
    pub publish_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            topic: "order.created".to_string(),
            batch_size: 100,
            poll_interval: Duration::from_secs(5),
            backoff_step: chrono::Duration::seconds(5),
            backoff_cap: chrono::Duration::seconds(60),
            publish_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySummary {
    pub published: usize,
    pub failed: usize,
}

/// Publishes due outbox events to the broker, oldest first.
///
/// Delivery is at least once: an event is only marked `PUBLISHED` after
/// the broker acknowledged it, so a crash between publish and mark causes
/// a redelivery that consumers deduplicate by event ID. Failed publishes
/// are rescheduled with linear capped backoff and never block newer events
/// beyond the batch they share.
pub struct OutboxRelay<S: Datastore, B: Broker> {
    store: S,
    broker: Arc<B>,
    config: RelayConfig,
}

impl<S: Datastore, B: Broker> OutboxRelay<S, B> {
    pub fn new(store: S, broker: Arc<B>, config: RelayConfig) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// Takes one batch of due events and attempts to publish each.
    ///
    /// Store errors abort the pass; broker errors only affect the event
    /// they occurred on.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> store::Result<RelaySummary> {
        let due = self
            .store
            .fetch_due_outbox(Utc::now(), self.config.batch_size)
            .await?;

        let mut summary = RelaySummary::default();
        for mut event in due {
            let publish = self
                .broker
                .publish(&self.config.topic, &event.aggregate_id, &event.payload);
            let outcome = tokio::time::timeout(self.config.publish_timeout, publish).await;

            match outcome {
                Ok(Ok(())) => {
                    event.mark_published();
                    summary.published += 1;
                    metrics::counter!("outbox_published_total").increment(1);
                }
                Ok(Err(err)) => {
                    tracing::warn!(event_id = %event.id, error = %err, "publish failed");
                    event.mark_failed_with_backoff(self.config.backoff_step, self.config.backoff_cap);
                    summary.failed += 1;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                }
                Err(_) => {
                    tracing::warn!(event_id = %event.id, "publish timed out");
                    event.mark_failed_with_backoff(self.config.backoff_step, self.config.backoff_cap);
                    summary.failed += 1;
                    metrics::counter!("outbox_publish_failures_total").increment(1);
                }
            }

            self.store.update_outbox(&event).await?;
        }

        if summary.published > 0 || summary.failed > 0 {
            tracing::debug!(
                published = summary.published,
                failed = summary.failed,
                "relay pass complete"
            );
        }
        Ok(summary)
    }

    /// Polls forever at the configured interval. Store errors are logged
    /// and the next poll proceeds on schedule.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                tracing::error!(error = %err, "relay pass failed");
                metrics::counter!("outbox_relay_errors_total").increment(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use common::{EventId, Money, ProductId, UserId};
    use store::{MemoryStore, Order, OrderLine, OutboxEvent, OutboxStatus, Product, StockDelta};

    fn test_config() -> RelayConfig {
        RelayConfig {
            topic: "order.created".to_string(),
            batch_size: 100,
            poll_interval: Duration::from_millis(10),
            backoff_step: chrono::Duration::seconds(5),
            backoff_cap: chrono::Duration::seconds(60),
            publish_timeout: Duration::from_secs(1),
        }
    }

    async fn commit_event(store: &MemoryStore, product_id: ProductId, key: &str) -> EventId {
        let order = Order::create(
            UserId::new(),
            key,
            None,
            vec![OrderLine::new(product_id, 1, Money::from_cents(100))],
        );
        let stock = store.get_stock(product_id).await.unwrap().unwrap();
        let event = OutboxEvent::ready(
            EventId::new(),
            "ORDER",
            order.id.to_string(),
            "ORDER_CREATED",
            serde_json::json!({"order_id": order.id.to_string()}),
        );
        let id = event.id;
        store
            .commit_order(
                &order,
                &[StockDelta {
                    product_id,
                    delta: -1,
                    expected_version: stock.version,
                }],
                &event,
            )
            .await
            .unwrap();
        id
    }

    async fn seed_product(store: &MemoryStore) -> ProductId {
        let product = Product::new("SKU-1", "Widget", "", Money::from_cents(100));
        store.insert_product(&product, 100).await.unwrap();
        product.id
    }

    #[tokio::test]
    async fn relay_publishes_due_events_oldest_first() {
        let store = MemoryStore::new();
        let product_id = seed_product(&store).await;
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe("order.created").await;

        let first = commit_event(&store, product_id, "k1").await;
        let second = commit_event(&store, product_id, "k2").await;

        let relay = OutboxRelay::new(store.clone(), broker, test_config());
        let summary = relay.run_once().await.unwrap();
        assert_eq!(summary, RelaySummary { published: 2, failed: 0 });

        // Delivered in commit order
        assert!(rx.recv().await.is_ok());
        assert!(rx.recv().await.is_ok());

        for id in [first, second] {
            let event = store.get_outbox_event(id).await.unwrap().unwrap();
            assert_eq!(event.status, OutboxStatus::Published);
            assert!(event.published_at.is_some());
        }

        // Nothing left to do
        assert_eq!(relay.run_once().await.unwrap(), RelaySummary::default());
    }

    #[tokio::test]
    async fn failed_publish_backs_off_and_recovers() {
        let store = MemoryStore::new();
        let product_id = seed_product(&store).await;
        let broker = InMemoryBroker::new();
        broker.set_fail_publishes(true);

        let id = commit_event(&store, product_id, "k1").await;

        let relay = OutboxRelay::new(store.clone(), broker.clone(), test_config());
        let summary = relay.run_once().await.unwrap();
        assert_eq!(summary, RelaySummary { published: 0, failed: 1 });

        let event = store.get_outbox_event(id).await.unwrap().unwrap();
        assert_eq!(event.status, OutboxStatus::Failed);
        assert_eq!(event.retries, 1);
        assert!(event.available_at > Utc::now());

        // Not due again until the backoff elapses
        assert_eq!(relay.run_once().await.unwrap(), RelaySummary::default());

        // Broker recovers and the backoff window passes
        broker.set_fail_publishes(false);
        let mut rewound = store.get_outbox_event(id).await.unwrap().unwrap();
        rewound.available_at = Utc::now() - chrono::Duration::seconds(1);
        store.update_outbox(&rewound).await.unwrap();

        let summary = relay.run_once().await.unwrap();
        assert_eq!(summary, RelaySummary { published: 1, failed: 0 });
        let event = store.get_outbox_event(id).await.unwrap().unwrap();
        assert_eq!(event.status, OutboxStatus::Published);
        assert_eq!(event.retries, 1);
    }

    #[tokio::test]
    async fn batch_size_limits_a_single_pass() {
        let store = MemoryStore::new();
        let product_id = seed_product(&store).await;
        let broker = InMemoryBroker::new();

        for i in 0..5 {
            commit_event(&store, product_id, &format!("k{i}")).await;
        }

        let mut config = test_config();
        config.batch_size = 2;
        let relay = OutboxRelay::new(store.clone(), broker, config);

        assert_eq!(relay.run_once().await.unwrap().published, 2);
        assert_eq!(relay.run_once().await.unwrap().published, 2);
        assert_eq!(relay.run_once().await.unwrap().published, 1);
        assert_eq!(relay.run_once().await.unwrap().published, 0);
    }

    #[tokio::test]
    async fn one_bad_event_does_not_block_the_batch() {
        let store = MemoryStore::new();
        let product_id = seed_product(&store).await;
        let broker = InMemoryBroker::new();

        commit_event(&store, product_id, "k1").await;
        commit_event(&store, product_id, "k2").await;

        // Fail the whole pass, then recover; both events retry independently
        broker.set_fail_publishes(true);
        let relay = OutboxRelay::new(store.clone(), broker.clone(), test_config());
        assert_eq!(relay.run_once().await.unwrap().failed, 2);

        broker.set_fail_publishes(false);
        let due = store
            .fetch_due_outbox(Utc::now() + chrono::Duration::minutes(5), 10)
            .await
            .unwrap();
        for mut event in due {
            event.available_at = Utc::now() - chrono::Duration::seconds(1);
            store.update_outbox(&event).await.unwrap();
        }
        assert_eq!(relay.run_once().await.unwrap().published, 2);
    }
}
