//! Optimistic stock mutation with automatic retry on version conflicts.

use common::ProductId;
use store::{Datastore, Stock, StockDelta, StoreError};

use crate::error::{OrderError, Result};

/// Retry bound for the read-then-CAS loop. Each conflict implies another
/// committed writer, so this only guards against a livelock bug.
const MAX_CAS_ATTEMPTS: usize = 32;

/// Applies signed quantity changes to stock rows under version CAS.
pub struct StockLedger<S: Datastore> {
    store: S,
}

impl<S: Datastore> StockLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Applies a signed delta to a product's stock.
    ///
    /// Re-reads and retries when a concurrent writer advanced the version.
    /// A result below zero is rejected before the write.
    #[tracing::instrument(skip(self))]
    pub async fn adjust(&self, product_id: ProductId, delta: i64) -> Result<Stock> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let stock = self
                .store
                .get_stock(product_id)
                .await?
                .ok_or_else(|| OrderError::NotFound(format!("stock {product_id}")))?;
            if stock.quantity + delta < 0 {
                return Err(OrderError::BusinessRule(format!(
                    "insufficient stock for product {product_id}"
                )));
            }

            match self
                .store
                .update_stock(StockDelta {
                    product_id,
                    delta,
                    expected_version: stock.version,
                })
                .await
            {
                Ok(updated) => {
                    metrics::counter!("stock_adjustments_total").increment(1);
                    return Ok(updated);
                }
                Err(StoreError::ConcurrencyConflict { .. }) => {
                    metrics::counter!("stock_conflicts_total").increment(1);
                    continue;
                }
                Err(StoreError::CheckViolation { .. }) => {
                    return Err(OrderError::BusinessRule(format!(
                        "insufficient stock for product {product_id}"
                    )));
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(OrderError::Internal(
            "stock adjustment did not converge under contention".to_string(),
        ))
    }

    /// Loads the current stock row.
    pub async fn get(&self, product_id: ProductId) -> Result<Stock> {
        self.store
            .get_stock(product_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("stock {product_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use store::{MemoryStore, Product};

    async fn seed(store: &MemoryStore, quantity: i64) -> ProductId {
        let product = Product::new("SKU-1", "Widget", "", Money::from_cents(100));
        store.insert_product(&product, quantity).await.unwrap();
        product.id
    }

    #[tokio::test]
    async fn adjust_applies_delta_and_advances_version() {
        let store = MemoryStore::new();
        let product_id = seed(&store, 10).await;
        let ledger = StockLedger::new(store);

        let stock = ledger.adjust(product_id, -4).await.unwrap();
        assert_eq!(stock.quantity, 6);
        assert_eq!(stock.version, 1);

        let stock = ledger.adjust(product_id, 2).await.unwrap();
        assert_eq!(stock.quantity, 8);
        assert_eq!(stock.version, 2);
    }

    #[tokio::test]
    async fn adjust_rejects_negative_result() {
        let store = MemoryStore::new();
        let product_id = seed(&store, 3).await;
        let ledger = StockLedger::new(store);

        let err = ledger.adjust(product_id, -4).await.unwrap_err();
        assert!(matches!(err, OrderError::BusinessRule(_)));
        assert_eq!(ledger.get(product_id).await.unwrap().quantity, 3);
    }

    #[tokio::test]
    async fn adjust_unknown_product_is_not_found() {
        let ledger = StockLedger::new(MemoryStore::new());
        let err = ledger.adjust(ProductId::new(), 1).await.unwrap_err();
        assert!(matches!(err, OrderError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_adjustments_all_land() {
        let store = MemoryStore::new();
        let product_id = seed(&store, 0).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ledger = StockLedger::new(store.clone());
            handles.push(tokio::spawn(
                async move { ledger.adjust(product_id, 5).await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stock = store.get_stock(product_id).await.unwrap().unwrap();
        assert_eq!(stock.quantity, 40);
        assert_eq!(stock.version, 8);
    }
}
