//! Catalog administration: products, stock levels, and the read cache.

use std::time::Duration;

use common::{Money, ProductId};
use store::{Datastore, Product, constraint};

use crate::cache::ProductCache;
use crate::error::{OrderError, Result};
use crate::stock::StockLedger;
use crate::view::{ProductPage, ProductView};

const MAX_PAGE_SIZE: i64 = 100;

/// Command to register a product with its opening stock.
#[derive(Debug, Clone)]
pub struct CreateProduct {
    pub sku: String,
    pub name: String,
    pub description: String,
    pub price: Money,
    pub initial_quantity: i64,
}

/// Command to change a product's stock level by a signed amount.
#[derive(Debug, Clone)]
pub struct AdjustStock {
    pub product_id: ProductId,
    pub delta: i64,
}

/// Manages the product catalog and its stock levels.
pub struct ProductService<S: Datastore + Clone> {
    store: S,
    ledger: StockLedger<S>,
    cache: ProductCache,
}

impl<S: Datastore + Clone> ProductService<S> {
    pub fn new(store: S, cache_ttl: Duration) -> Self {
        let ledger = StockLedger::new(store.clone());
        Self {
            store,
            ledger,
            cache: ProductCache::new(cache_ttl),
        }
    }

    /// Registers a product and its opening stock atomically.
    ///
    /// A taken SKU is a conflict and leaves no stock row behind.
    #[tracing::instrument(skip(self, cmd), fields(sku = %cmd.sku))]
    pub async fn create_product(&self, cmd: CreateProduct) -> Result<ProductView> {
        if cmd.sku.trim().is_empty() {
            return Err(OrderError::Validation("sku is required".to_string()));
        }
        if cmd.name.trim().is_empty() {
            return Err(OrderError::Validation("name is required".to_string()));
        }
        if cmd.price.is_negative() {
            return Err(OrderError::Validation(
                "price must not be negative".to_string(),
            ));
        }
        if cmd.initial_quantity < 0 {
            return Err(OrderError::Validation(
                "initial quantity must not be negative".to_string(),
            ));
        }

        let product = Product::new(cmd.sku, cmd.name, cmd.description, cmd.price);
        match self
            .store
            .insert_product(&product, cmd.initial_quantity)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_duplicate_of(constraint::PRODUCT_SKU) => {
                return Err(OrderError::Conflict(format!(
                    "sku {} already exists",
                    product.sku
                )));
            }
            Err(err) => return Err(err.into()),
        }

        metrics::counter!("products_created_total").increment(1);
        self.cache.evict(product.id).await;

        let stock = self.ledger.get(product.id).await?;
        Ok(ProductView::from_parts(&product, &stock))
    }

    /// Loads a product with its stock level, served from cache when fresh.
    pub async fn get_product(&self, id: ProductId) -> Result<ProductView> {
        if let Some(cached) = self.cache.get(id).await {
            metrics::counter!("product_cache_hits_total").increment(1);
            return Ok(cached);
        }
        metrics::counter!("product_cache_misses_total").increment(1);

        let product = self
            .store
            .get_product(id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("product {id}")))?;
        let stock = self.ledger.get(id).await?;
        let view = ProductView::from_parts(&product, &stock);
        self.cache.put(view.clone()).await;
        Ok(view)
    }

    /// Lists a catalog page, oldest product first.
    pub async fn list_products(&self, offset: i64, limit: i64) -> Result<ProductPage> {
        if offset < 0 {
            return Err(OrderError::Validation(
                "offset must not be negative".to_string(),
            ));
        }
        if limit <= 0 || limit > MAX_PAGE_SIZE {
            return Err(OrderError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        if let Some(page) = self.cache.get_page(offset, limit).await {
            metrics::counter!("product_cache_hits_total").increment(1);
            return Ok(page);
        }
        metrics::counter!("product_cache_misses_total").increment(1);

        let products = self.store.list_products(offset, limit).await?;
        let total = self.store.count_products().await?;
        let mut items = Vec::with_capacity(products.len());
        for product in &products {
            let stock = self.ledger.get(product.id).await?;
            items.push(ProductView::from_parts(product, &stock));
        }
        let page = ProductPage {
            items,
            total,
            offset,
            limit,
        };
        self.cache.put_page(page.clone()).await;
        Ok(page)
    }

    /// Adjusts a product's stock by a signed amount and evicts its cache entry.
    #[tracing::instrument(skip(self))]
    pub async fn adjust_stock(&self, cmd: AdjustStock) -> Result<ProductView> {
        if cmd.delta == 0 {
            return Err(OrderError::Validation("delta must not be zero".to_string()));
        }
        let product = self
            .store
            .get_product(cmd.product_id)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("product {}", cmd.product_id)))?;

        let stock = self.ledger.adjust(cmd.product_id, cmd.delta).await?;
        self.cache.evict(cmd.product_id).await;
        Ok(ProductView::from_parts(&product, &stock))
    }
}
