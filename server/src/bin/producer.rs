//! Synthetic order producer.
//!
//! Publishes a random order to the configured topic every
//! `PRODUCER_INTERVAL_MS` until interrupted or `PRODUCER_COUNT` orders have
//! been sent.
//!
//! ```bash
//! PRODUCER_INTERVAL_MS=500 PRODUCER_COUNT=20 cargo run --bin producer
//! ```

use chrono::Utc;
use orderflow_redpanda::RedpandaOrderPublisher;
use orderflow_server::generator::random_order;
use orderflow_server::{Config, DEFAULT_LOG_FILTER, ProducerConfig};
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

    let config = Config::from_env()?;
    let settings = ProducerConfig::from_env()?;
    let publisher = RedpandaOrderPublisher::new(&config.kafka.brokers, &config.kafka.topic)?;

    tracing::info!(
        topic = publisher.topic(),
        interval_ms = u64::try_from(settings.interval.as_millis()).unwrap_or(u64::MAX),
        count = ?settings.count,
        "Producer started"
    );

    let mut ticker = tokio::time::interval(settings.interval);
    let mut sent: u64 = 0;

    loop {
        if settings.count.is_some_and(|limit| sent >= limit) {
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal");
                break;
            }
            _ = ticker.tick() => {}
        }

        let order = random_order(&mut rand::thread_rng(), Utc::now());
        match publisher.publish(&order).await {
            Ok((partition, offset)) => {
                sent += 1;
                tracing::info!(order_uid = %order.order_uid, partition, offset, "Order sent");
            }
            Err(e) => tracing::error!(order_uid = %order.order_uid, error = %e, "Failed to send order"),
        }
    }

    tracing::info!(sent, "Producer stopped");
    Ok(())
}
