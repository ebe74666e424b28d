//! Cache-aside reads over an [`OrderStore`].

use crate::OrderCache;
use crate::metrics;
use orderflow_core::{Order, OrderStore, StoreError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Why [`OrderService::get_order`] returned no aggregate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// No order row exists for the id.
    #[error("Order not found: {0}")]
    NotFound(String),

    /// The store could not answer.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of [`OrderService::restore_cache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WarmupReport {
    /// Ids returned by the store for warm-up.
    pub requested: usize,
    /// Aggregates placed in the cache.
    pub loaded: usize,
    /// Ids that failed to load or had disappeared.
    pub skipped: usize,
}

/// Read side of the pipeline.
///
/// Shares its cache with the ingestion worker; both hold the same
/// `Arc<OrderCache>`.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    cache: Arc<OrderCache>,
}

impl OrderService {
    /// Create a service over `store`, caching into `cache`.
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>, cache: Arc<OrderCache>) -> Self {
        Self { store, cache }
    }

    /// The shared cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<OrderCache> {
        &self.cache
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    /// Look up one aggregate, from the cache if possible.
    ///
    /// A miss reads the four projections, assembles them, and caches the
    /// result. Not-found answers are never cached.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotFound`] if no order row exists, or
    /// [`ServiceError::Store`] if any projection read fails.
    pub async fn get_order(&self, order_uid: &str) -> Result<Arc<Order>, ServiceError> {
        if let Some(order) = self.cache.get(order_uid) {
            metrics::cache::record_hit();
            tracing::debug!(order_uid, "Cache hit");
            return Ok(order);
        }
        metrics::cache::record_miss();

        let order = self
            .load(order_uid)
            .await?
            .ok_or_else(|| ServiceError::NotFound(order_uid.to_string()))?;

        let order = Arc::new(order);
        self.cache.set(order_uid.to_string(), Arc::clone(&order));
        metrics::cache::observe(&self.cache.stats());
        tracing::debug!(order_uid, "Loaded order from store");
        Ok(order)
    }

    /// Preload up to `limit` of the newest orders into the cache.
    ///
    /// Runs once at startup, before the read endpoint takes traffic. Ids are
    /// inserted oldest first so the newest order ends up most recently used.
    /// An order that fails to load is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only if the list of ids cannot be read.
    pub async fn restore_cache(&self, limit: usize) -> Result<WarmupReport, StoreError> {
        if limit == 0 {
            return Ok(WarmupReport::default());
        }

        let order_uids = self.store.list_recent_order_uids(limit).await?;
        let mut report = WarmupReport {
            requested: order_uids.len(),
            ..WarmupReport::default()
        };

        for order_uid in order_uids.iter().rev() {
            match self.load(order_uid).await {
                Ok(Some(order)) => {
                    self.cache.set(order_uid.clone(), Arc::new(order));
                    report.loaded += 1;
                }
                Ok(None) => {
                    tracing::warn!(order_uid = %order_uid, "Order vanished during warm-up");
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(order_uid = %order_uid, error = %e, "Skipping order during warm-up");
                    report.skipped += 1;
                }
            }
        }

        metrics::warmup::record_loaded(report.loaded);
        metrics::cache::observe(&self.cache.stats());
        tracing::info!(
            requested = report.requested,
            loaded = report.loaded,
            skipped = report.skipped,
            "Cache warm-up finished"
        );
        Ok(report)
    }

    async fn load(&self, order_uid: &str) -> Result<Option<Order>, StoreError> {
        let (record, delivery, payment, items) = tokio::try_join!(
            self.store.get_order(order_uid),
            self.store.get_delivery(order_uid),
            self.store.get_payment(order_uid),
            self.store.list_items(order_uid),
        )?;

        Ok(record.map(|record| Order::assemble(record, delivery, payment, items)))
    }
}
