//! Message broker seam and the in-process implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};

/// Publication failures reported by a broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}

/// A message delivered on a topic, keyed by aggregate for partitioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
}

/// Publishing side of the broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes a message and waits for the broker's acknowledgement.
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), BrokerError>;
}

/// In-process broker backed by one broadcast channel per topic.
///
/// Publication succeeds whether or not anyone is subscribed; a message
/// with no subscriber is simply dropped, as with a real broker whose
/// consumers start later with a fresh offset.
pub struct InMemoryBroker {
    topics: RwLock<HashMap<String, broadcast::Sender<BrokerMessage>>>,
    fail_publishes: AtomicBool,
    capacity: usize,
}

impl InMemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            topics: RwLock::new(HashMap::new()),
            fail_publishes: AtomicBool::new(false),
            capacity: 256,
        })
    }

    /// Makes every subsequent publish fail, for exercising retry paths.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Subscribes to a topic. Only messages published after this call
    /// are delivered.
    pub async fn subscribe(&self, topic: &str) -> broadcast::Receiver<BrokerMessage> {
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<(), BrokerError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("publish disabled".to_string()));
        }

        let message = BrokerMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.clone(),
        };
        let topics = self.topics.read().await;
        if let Some(sender) = topics.get(topic) {
            // A send error only means there is no live subscriber
            let _ = sender.send(message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_messages() {
        let broker = InMemoryBroker::new();
        let mut rx = broker.subscribe("order.created").await;

        broker
            .publish("order.created", "k1", &serde_json::json!({"n": 1}))
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message.key, "k1");
        assert_eq!(message.payload, serde_json::json!({"n": 1}));
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let broker = InMemoryBroker::new();
        broker
            .publish("order.created", "k1", &serde_json::json!({}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn failure_toggle_rejects_publishes() {
        let broker = InMemoryBroker::new();
        broker.set_fail_publishes(true);
        let err = broker
            .publish("order.created", "k1", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));

        broker.set_fail_publishes(false);
        broker
            .publish("order.created", "k1", &serde_json::json!({}))
            .await
            .unwrap();
    }
}
