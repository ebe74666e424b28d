//! Orderflow service.
//!
//! Consumes orders from Redpanda, stores them in `PostgreSQL`, and serves
//! them over HTTP from an in-memory cache.
//!
//! # Usage
//!
//! ```bash
//! # PostgreSQL and Redpanda must be reachable (see DATABASE_URL, KAFKA_BROKERS)
//! cargo run --bin orderflow-server
//! curl http://localhost:8080/order/<order_uid>
//! ```

use orderflow_runtime::metrics::MetricsServer;
use orderflow_server::{Application, Config, DEFAULT_LOG_FILTER};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let _ = dotenvy::from_filename("local.env");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Orderflow server...");

    let config = Config::from_env()?;
    tracing::info!(
        brokers = %config.kafka.brokers,
        topic = %config.kafka.topic,
        http = %config.server.http_addr(),
        cache_capacity = config.cache.capacity.get(),
        "Configuration loaded"
    );

    MetricsServer::new(config.server.metrics_addr()?).start()?;

    let app = Application::build(&config).await?;
    if let Some(summary) = app.run().await? {
        tracing::info!(
            messages = summary.messages,
            created = summary.created,
            duplicates = summary.duplicates,
            dead_lettered = summary.dead_lettered,
            "Ingestion summary"
        );
    }

    Ok(())
}
