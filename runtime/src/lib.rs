//! # Orderflow Runtime
//!
//! The moving parts of the pipeline, written against the traits in
//! `orderflow-core` so they run unchanged over Postgres/Kafka or the
//! in-memory fakes.
//!
//! ## Core Components
//!
//! - **[`IngestionWorker`]**: fetch → decode → atomic write → cache → acknowledge,
//!   with at-least-once delivery and a bounded poison-message policy
//! - **[`OrderService`]**: cache-aside reads and startup cache warm-up
//! - **[`retry`]**: exponential backoff for startup dependencies
//! - **[`metrics`]**: metric names and the Prometheus exporter
//!
//! ## Example
//!
//! ```ignore
//! use orderflow_runtime::{IngestConfig, IngestionWorker, OrderCache, OrderService};
//! use std::num::NonZeroUsize;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let cache = Arc::new(OrderCache::new(NonZeroUsize::new(30).unwrap()));
//! let service = OrderService::new(store.clone(), Arc::clone(&cache));
//! service.restore_cache(cache.capacity()).await?;
//!
//! let worker = IngestionWorker::new(source, store, cache, dead_letters, IngestConfig::new("order-topic"));
//! let shutdown = CancellationToken::new();
//! let summary = tokio::spawn(worker.run(shutdown.child_token()));
//! ```

use orderflow_core::{Order, RecencyCache};
use std::sync::Arc;

pub mod ingest;
pub mod metrics;
pub mod retry;
pub mod service;

pub use ingest::{
    IngestConfig, IngestError, IngestSummary, IngestionWorker, MessageOutcome, WorkerState,
};
pub use service::{OrderService, ServiceError, WarmupReport};

/// The cache shared by ingestion and the read path.
///
/// Values are reference-counted so a hit hands out the cached aggregate
/// without cloning it, and nobody can mutate it in place.
pub type OrderCache = RecencyCache<String, Arc<Order>>;
