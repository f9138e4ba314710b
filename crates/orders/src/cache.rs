//! In-process TTL cache for catalog reads.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use common::ProductId;
use tokio::sync::RwLock;

use crate::view::{ProductPage, ProductView};

/// Caches product lookups and catalog pages for a fixed TTL.
///
/// Writes to the catalog evict the affected product and every cached page,
/// so readers never see a stale page after a mutation they made themselves.
pub struct ProductCache {
    ttl: Duration,
    products: RwLock<HashMap<ProductId, (Instant, ProductView)>>,
    pages: RwLock<HashMap<(i64, i64), (Instant, ProductPage)>>,
}

impl ProductCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            products: RwLock::new(HashMap::new()),
            pages: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: ProductId) -> Option<ProductView> {
        let products = self.products.read().await;
        products
            .get(&id)
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, view)| view.clone())
    }

    pub async fn put(&self, view: ProductView) {
        self.products
            .write()
            .await
            .insert(view.id, (Instant::now(), view));
    }

    pub async fn get_page(&self, offset: i64, limit: i64) -> Option<ProductPage> {
        let pages = self.pages.read().await;
        pages
            .get(&(offset, limit))
            .filter(|(stored_at, _)| stored_at.elapsed() < self.ttl)
            .map(|(_, page)| page.clone())
    }

    pub async fn put_page(&self, page: ProductPage) {
        self.pages
            .write()
            .await
            .insert((page.offset, page.limit), (Instant::now(), page));
    }

    /// Drops the cached product and all cached pages after a write.
    pub async fn evict(&self, id: ProductId) {
        self.products.write().await.remove(&id);
        self.pages.write().await.clear();
    }
}
