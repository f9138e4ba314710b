//! Periodic sweep of terminal orders into cold storage.

use chrono::{Duration, Utc};
use store::{Datastore, OrderArchive};

use crate::error::Result;
use crate::view::OrderView;

/// Moves old terminal orders into the archive table in bounded chunks.
///
/// Each chunk is archived and deleted in one atomic unit, so a crash
/// mid-sweep never loses or duplicates an order; the next run resumes
/// where the last one stopped.
pub struct ArchiveSweeper<S: Datastore> {
    store: S,
    retention: Duration,
    chunk_size: usize,
}

impl<S: Datastore> ArchiveSweeper<S> {
    pub fn new(store: S, retention: Duration, chunk_size: usize) -> Self {
        Self {
            store,
            retention,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Runs one full sweep and returns the number of orders archived.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<usize> {
        let threshold = Utc::now() - self.retention;
        let mut archived = 0usize;

        loop {
            let chunk = self
                .store
                .fetch_terminal_orders_before(threshold, self.chunk_size)
                .await?;
            if chunk.is_empty() {
                break;
            }

            let mut archives = Vec::with_capacity(chunk.len());
            let mut ids = Vec::with_capacity(chunk.len());
            for order in &chunk {
                let payload = serde_json::to_value(OrderView::from_order(order))?;
                archives.push(OrderArchive::from_order(order, payload));
                ids.push(order.id);
            }

            let moved = chunk.len();
            self.store.archive_batch(&archives, &ids).await?;
            archived += moved;
            metrics::counter!("orders_archived_total").increment(moved as u64);

            if moved < self.chunk_size {
                break;
            }
        }

        if archived > 0 {
            tracing::info!(archived, "archive sweep complete");
        }
        Ok(archived)
    }

    /// Runs sweeps forever at the given interval. Errors are logged and the
    /// next run proceeds on schedule.
    pub async fn run(&self, interval: std::time::Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                tracing::error!(error = %err, "archive sweep failed");
                metrics::counter!("archive_sweep_errors_total").increment(1);
            }
        }
    }
}
