//! # Orderflow Core
//!
//! Domain model and contracts for the order ingestion and retrieval pipeline.
//!
//! This crate has no I/O of its own. It provides:
//!
//! - [`order`]: the order aggregate (order, delivery, payment, items) and its JSON wire form
//! - [`cache`]: [`RecencyCache`], a bounded least-recently-used cache shared by
//!   the ingestion and read paths
//! - [`order_store`]: the [`OrderStore`] persistence boundary
//! - [`message_stream`]: the [`MessageSource`] / [`MessageStream`] delivery boundary
//! - [`dead_letter`]: the [`DeadLetterSink`] for messages that cannot be processed
//!
//! ## Data Flow
//!
//! ```text
//! stream ──► ingestion ──► OrderStore (write) ──► RecencyCache (populate)
//!                                                       │
//!                      HTTP ◄── read service ◄──────────┘ (hit)
//!                                   │
//!                                   └──► OrderStore (read on miss)
//! ```
//!
//! Implementations live in sibling crates: `orderflow-postgres` (store and
//! dead-letter queue), `orderflow-redpanda` (stream), `orderflow-testing`
//! (in-memory fakes).

pub mod cache;
pub mod dead_letter;
pub mod message_stream;
pub mod order;
pub mod order_store;

use std::future::Future;
use std::pin::Pin;

pub use cache::{CacheStats, RecencyCache};
pub use dead_letter::{DeadLetter, DeadLetterReason, DeadLetterSink};
pub use message_stream::{MessagePosition, MessageSource, MessageStream, StreamError, StreamMessage};
pub use order::{Delivery, Item, Order, OrderDecodeError, OrderRecord, Payment};
pub use order_store::{CreateOutcome, OrderStore, StoreError};

/// Boxed, sendable future returned by the dyn-compatible traits in this crate.
///
/// The storage and stream traits return this instead of using `async fn` so
/// they can be held as `Arc<dyn OrderStore>` / `Box<dyn MessageStream>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
