//! `PostgreSQL` storage for Orderflow.
//!
//! - [`PostgresOrderStore`] implements [`orderflow_core::OrderStore`]: each
//!   aggregate is written to `orders`, `deliveries`, `payments`, and `items`
//!   inside one READ COMMITTED transaction.
//! - [`PostgresDeadLetterQueue`] implements [`orderflow_core::DeadLetterSink`]
//!   on the `failed_messages` table and exposes the triage workflow.
//!
//! Schema lives in `migrations/` and is applied with
//! [`PostgresOrderStore::migrate`].
//!
//! # Example
//!
//! ```no_run
//! use orderflow_core::OrderStore;
//! use orderflow_postgres::PostgresOrderStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresOrderStore::connect("postgres://localhost/orders").await?;
//! store.migrate().await?;
//! let recent = store.list_recent_order_uids(30).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dead_letter_queue;
pub mod order_store;

pub use dead_letter_queue::{FailedMessage, FailedMessageStatus, PostgresDeadLetterQueue};
pub use order_store::{PoolConfig, PostgresOrderStore};
