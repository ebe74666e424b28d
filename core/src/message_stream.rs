//! Delivery boundary for inbound order messages.
//!
//! A [`MessageSource`] subscribes to topics and yields a [`MessageStream`].
//! Messages are redelivered until acknowledged; acknowledging one is the
//! commit point that lets the broker move past it for this consumer group.

use crate::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from the message transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Could not reach the brokers.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Subscription was rejected.
    #[error("Failed to subscribe to {topics:?}: {reason}")]
    SubscriptionFailed {
        /// Requested topics.
        topics: Vec<String>,
        /// Broker error.
        reason: String,
    },

    /// A receive failed; the stream may still be usable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The acknowledgement was not recorded.
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// The stream has been closed.
    #[error("Stream closed")]
    Closed,
}

/// Where a message sits in the log.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessagePosition {
    /// Topic name.
    pub topic: String,
    /// Partition index.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

impl fmt::Display for MessagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A message as delivered by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMessage {
    /// Topic name.
    pub topic: String,
    /// Partition index.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Optional message key.
    pub key: Option<Vec<u8>>,
    /// Message body. `None` for tombstones.
    pub payload: Option<Vec<u8>>,
}

impl StreamMessage {
    /// This message's log position.
    #[must_use]
    pub fn position(&self) -> MessagePosition {
        MessagePosition {
            topic: self.topic.clone(),
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// An open subscription.
pub trait MessageStream: Send + Sync {
    /// Wait for the next message.
    ///
    /// Returns `None` once the stream is exhausted or closed. A
    /// `Some(Err(_))` is a transient receive failure; callers may keep polling.
    fn next_message(&mut self) -> BoxFuture<'_, Option<Result<StreamMessage, StreamError>>>;

    /// Mark `message` as processed for this consumer group.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::CommitFailed`] if the broker did not accept it.
    fn acknowledge<'a>(&'a self, message: &'a StreamMessage) -> BoxFuture<'a, Result<(), StreamError>>;
}

/// Something that can open subscriptions.
pub trait MessageSource: Send + Sync {
    /// Join the consumer group on `topics`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError`] if the connection or subscription fails.
    fn subscribe<'a>(
        &'a self,
        topics: &'a [String],
    ) -> BoxFuture<'a, Result<Box<dyn MessageStream>, StreamError>>;
}
