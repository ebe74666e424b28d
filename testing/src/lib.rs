//! # Orderflow Testing
//!
//! In-memory implementations of the Orderflow I/O boundaries, plus fixtures.
//!
//! - [`InMemoryOrderStore`]: all-or-nothing aggregate writes with failure
//!   injection and per-projection call counters
//! - [`InMemoryDeadLetterSink`]: captures dead letters
//! - [`InMemoryMessageSource`]: a single-partition log with acknowledgement
//!   tracking and redelivery of unacknowledged messages on resubscribe
//! - [`fixtures`]: sample orders and their wire payloads
//!
//! ## Example
//!
//! ```
//! use orderflow_core::OrderStore;
//! use orderflow_testing::{InMemoryOrderStore, fixtures::sample_order};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryOrderStore::new();
//! store.create_aggregate(&sample_order("order-1")).await?;
//!
//! assert!(store.get_order("order-1").await?.is_some());
//! assert_eq!(store.calls().get_order, 1);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod order_mocks;
pub mod stream_mocks;

pub use order_mocks::{CallCounts, InMemoryDeadLetterSink, InMemoryOrderStore, WriteStage};
pub use stream_mocks::InMemoryMessageSource;

/// Install a test-friendly `tracing` subscriber.
///
/// Safe to call from every test; only the first call installs anything.
/// Honors `RUST_LOG`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
