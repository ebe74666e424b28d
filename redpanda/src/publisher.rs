//! Order publisher.

use orderflow_core::Order;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use thiserror::Error;

/// Errors from [`RedpandaOrderPublisher`].
#[derive(Error, Debug)]
pub enum PublishError {
    /// The producer could not be created.
    #[error("Failed to create producer: {0}")]
    Connection(String),

    /// The order could not be encoded.
    #[error("Failed to serialize order: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The broker did not accept the message.
    #[error("Failed to publish to {topic}: {reason}")]
    Send {
        /// Destination topic.
        topic: String,
        /// Broker error.
        reason: String,
    },
}

/// Writes order documents to one topic, keyed by `order_uid`.
pub struct RedpandaOrderPublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl RedpandaOrderPublisher {
    /// Connect a producer for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Connection`] if the producer cannot be created.
    pub fn new(brokers: &str, topic: impl Into<String>) -> Result<Self, PublishError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| PublishError::Connection(e.to_string()))?;

        Ok(Self {
            producer,
            topic: topic.into(),
            timeout: Duration::from_secs(5),
        })
    }

    /// Override the send timeout (default 5 seconds).
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Destination topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish `order` as JSON. Returns the partition and offset written.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if encoding or delivery fails.
    pub async fn publish(&self, order: &Order) -> Result<(i32, i64), PublishError> {
        let payload = serde_json::to_vec(order)?;
        self.publish_raw(order.order_uid.as_bytes(), &payload).await
    }

    /// Publish an arbitrary payload, for example a malformed one.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Send`] if the broker rejects it.
    pub async fn publish_raw(&self, key: &[u8], payload: &[u8]) -> Result<(i32, i64), PublishError> {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(topic = %self.topic, partition, offset, "Order published");
                Ok((partition, offset))
            }
            Err((kafka_error, _)) => {
                tracing::error!(topic = %self.topic, error = %kafka_error, "Failed to publish order");
                Err(PublishError::Send {
                    topic: self.topic.clone(),
                    reason: kafka_error.to_string(),
                })
            }
        }
    }
}
