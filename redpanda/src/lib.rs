//! Redpanda (Kafka protocol) transport for Orderflow.
//!
//! - [`RedpandaOrderSource`] implements [`orderflow_core::MessageSource`]. Each
//!   subscription is a consumer-group member with auto-commit disabled.
//! - [`RedpandaOrderPublisher`] writes order documents to a topic. The ingestion
//!   path never uses it; it backs the synthetic order generator and tests.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - The ingestion worker acknowledges a message only after the order is
//!   persisted and cached; acknowledging commits `offset + 1` for its partition
//! - A message that is never acknowledged is delivered again after a restart
//!   or rebalance, so processing must be idempotent
//! - Ordering is guaranteed within a partition
//!
//! Works against Redpanda, Apache Kafka, or any Kafka-compatible broker.
//!
//! # Example
//!
//! ```no_run
//! use orderflow_core::MessageSource;
//! use orderflow_redpanda::RedpandaOrderSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let source = RedpandaOrderSource::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("orderflow")
//!     .build()?;
//!
//! let mut stream = source.subscribe(&["order-topic".to_string()]).await?;
//! while let Some(Ok(message)) = stream.next_message().await {
//!     // persist, then:
//!     stream.acknowledge(&message).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod consumer;
mod publisher;

pub use consumer::{RedpandaOrderSource, RedpandaOrderSourceBuilder, RedpandaOrderStream};
pub use publisher::{PublishError, RedpandaOrderPublisher};
