//! Order consumer.
//!
//! Offsets are committed manually, one message at a time, after the worker
//! has settled it. A commit covers every earlier offset on the partition.

use orderflow_core::{BoxFuture, MessageSource, MessageStream, StreamError, StreamMessage};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use std::time::Duration;

const DEFAULT_CONSUMER_GROUP: &str = "orderflow";
const DEFAULT_AUTO_OFFSET_RESET: &str = "earliest";
const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_millis(6000);

/// Kafka-protocol [`MessageSource`].
///
/// Holds configuration only; every [`subscribe`](MessageSource::subscribe)
/// creates a fresh consumer, so resubscribing after a failure rejoins the
/// group from its last committed offsets.
#[derive(Clone, Debug)]
pub struct RedpandaOrderSource {
    brokers: String,
    consumer_group: String,
    auto_offset_reset: String,
    session_timeout: Duration,
}

impl RedpandaOrderSource {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> RedpandaOrderSourceBuilder {
        RedpandaOrderSourceBuilder::default()
    }

    /// Broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group id.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", &self.consumer_group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false");
        config
    }
}

/// Builder for [`RedpandaOrderSource`].
///
/// # Example
///
/// ```no_run
/// use orderflow_redpanda::RedpandaOrderSource;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = RedpandaOrderSource::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .consumer_group("orderflow")
///     .auto_offset_reset("earliest")
///     .session_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaOrderSourceBuilder {
    brokers: Option<String>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
}

impl RedpandaOrderSourceBuilder {
    /// Comma-separated broker addresses (required).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Consumer group id. Default: `orderflow`.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where a group with no committed offset starts: `earliest`, `latest`,
    /// or `error`. Default: `earliest`.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Group session timeout. Default: 6 seconds.
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Build the source.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ConnectionFailed`] if no brokers were set.
    pub fn build(self) -> Result<RedpandaOrderSource, StreamError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| StreamError::ConnectionFailed("Brokers not configured".to_string()))?;

        let source = RedpandaOrderSource {
            brokers,
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| DEFAULT_AUTO_OFFSET_RESET.to_string()),
            session_timeout: self.session_timeout.unwrap_or(DEFAULT_SESSION_TIMEOUT),
        };

        tracing::info!(
            brokers = %source.brokers,
            consumer_group = %source.consumer_group,
            auto_offset_reset = %source.auto_offset_reset,
            "RedpandaOrderSource configured"
        );

        Ok(source)
    }
}

impl MessageSource for RedpandaOrderSource {
    fn subscribe<'a>(
        &'a self,
        topics: &'a [String],
    ) -> BoxFuture<'a, Result<Box<dyn MessageStream>, StreamError>> {
        Box::pin(async move {
            let consumer: StreamConsumer =
                self.client_config()
                    .create()
                    .map_err(|e| StreamError::SubscriptionFailed {
                        topics: topics.to_vec(),
                        reason: format!("Failed to create consumer: {e}"),
                    })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| StreamError::SubscriptionFailed {
                    topics: topics.to_vec(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %self.consumer_group,
                manual_commit = true,
                "Subscribed to topics"
            );

            Ok(Box::new(RedpandaOrderStream { consumer }) as Box<dyn MessageStream>)
        })
    }
}

/// One consumer-group membership.
///
/// Dropping it leaves the group; uncommitted messages go to whichever member
/// picks up the partition next.
pub struct RedpandaOrderStream {
    consumer: StreamConsumer,
}

impl MessageStream for RedpandaOrderStream {
    fn next_message(&mut self) -> BoxFuture<'_, Option<Result<StreamMessage, StreamError>>> {
        Box::pin(async move {
            let received = match self.consumer.recv().await {
                Ok(message) => Ok(StreamMessage {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    key: message.key().map(<[u8]>::to_vec),
                    payload: message.payload().map(<[u8]>::to_vec),
                }),
                Err(e) => Err(StreamError::Transport(format!("Failed to receive message: {e}"))),
            };

            if let Ok(message) = &received {
                tracing::trace!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Received message"
                );
            }
            Some(received)
        })
    }

    fn acknowledge<'a>(&'a self, message: &'a StreamMessage) -> BoxFuture<'a, Result<(), StreamError>> {
        let result = commit(&self.consumer, message);
        Box::pin(async move { result })
    }
}

/// Commit the position after `message` for its partition.
fn commit(consumer: &StreamConsumer, message: &StreamMessage) -> Result<(), StreamError> {
    let mut offsets = TopicPartitionList::new();
    offsets
        .add_partition_offset(&message.topic, message.partition, Offset::Offset(message.offset + 1))
        .map_err(|e| StreamError::CommitFailed(e.to_string()))?;

    consumer.commit(&offsets, CommitMode::Async).map_err(|e| {
        tracing::warn!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
        StreamError::CommitFailed(e.to_string())
    })
}
