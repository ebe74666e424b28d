//! # Orderflow Server
//!
//! Wires the Orderflow crates into a running service.
//!
//! - [`config`]: environment-driven configuration
//! - [`lifecycle`]: startup order and graceful shutdown
//! - [`generator`]: random orders for the `producer` binary
//!
//! # Usage
//!
//! ```bash
//! # Start Postgres and Redpanda, then:
//! cargo run --bin orderflow-server
//!
//! # Feed it synthetic orders
//! cargo run --bin producer
//! ```

pub mod config;
pub mod generator;
pub mod lifecycle;

pub use config::{Config, ConfigError, ProducerConfig};
pub use lifecycle::Application;

/// Default `tracing` filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "orderflow=info,tower_http=debug,sqlx=warn";
