//! Parking place for messages the ingestion loop gives up on.

use crate::BoxFuture;
use crate::message_stream::{MessagePosition, StreamMessage};
use crate::order_store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a message was dead-lettered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterReason {
    /// The payload never decodes, so retrying is pointless.
    Malformed,
    /// The store rejected it on every allowed delivery.
    RetriesExhausted,
}

impl DeadLetterReason {
    /// Stable identifier used in storage and metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message that will not be retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    /// Where it came from.
    pub position: MessagePosition,
    /// Original key.
    pub key: Option<Vec<u8>>,
    /// Original body.
    pub payload: Option<Vec<u8>>,
    /// Classification.
    pub reason: DeadLetterReason,
    /// Last error text.
    pub error: String,
    /// Deliveries seen before giving up.
    pub attempts: u32,
}

impl DeadLetter {
    /// Build a dead letter from the delivered message.
    #[must_use]
    pub fn from_message(
        message: &StreamMessage,
        reason: DeadLetterReason,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            position: message.position(),
            key: message.key.clone(),
            payload: message.payload.clone(),
            reason,
            error: error.into(),
            attempts,
        }
    }
}

/// Destination for dead letters.
pub trait DeadLetterSink: Send + Sync {
    /// Durably record `letter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the letter was not recorded. The caller must
    /// then leave the original message unacknowledged.
    fn record<'a>(&'a self, letter: &'a DeadLetter) -> BoxFuture<'a, Result<(), StoreError>>;
}
