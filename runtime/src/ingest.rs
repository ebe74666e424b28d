//! The ingestion worker.
//!
//! One worker owns one subscription at a time and processes its messages
//! strictly in delivery order:
//!
//! ```text
//! Idle ─► Fetching ─► Processing ─► Acknowledging ─► Idle
//!   └──────────┴───────────┴──────────────┴─────────► Cancelled
//! ```
//!
//! A message is acknowledged only after its aggregate is durably stored and
//! cached, so a crash anywhere before that point means redelivery. Redelivery
//! of an already-stored order is a no-op in the store and still acknowledged.
//!
//! Acknowledging an offset commits every earlier offset on the partition, so
//! the worker never reads past a message it has not settled. When a store
//! write fails the message stays unacknowledged and the worker drops the
//! subscription. After an exponential pause it subscribes again, resuming
//! from the last committed offset, and the message is delivered again.
//! Attempt counts survive across subscriptions.
//!
//! Messages that can never succeed are parked in a [`DeadLetterSink`] and
//! then acknowledged so the partition keeps moving:
//!
//! - a payload that is missing or does not decode, immediately;
//! - a store write that keeps failing, once it has been attempted
//!   [`IngestConfig::max_delivery_attempts`] times.
//!
//! If the dead letter itself cannot be recorded the message is treated like
//! a failed write.

use crate::OrderCache;
use crate::metrics;
use crate::retry::RetryPolicy;
use orderflow_core::{
    CreateOutcome, DeadLetter, DeadLetterReason, DeadLetterSink, MessagePosition, MessageSource,
    MessageStream, Order, OrderDecodeError, OrderStore, StreamMessage,
};
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_DELIVERY_ATTEMPTS: NonZeroU32 = NonZeroU32::MIN.saturating_add(4);
const DEFAULT_RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Why a message payload is not an order.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The payload is not an order document.
    #[error(transparent)]
    Decode(#[from] OrderDecodeError),

    /// The message carried no payload.
    #[error("Message has no payload")]
    EmptyPayload,
}

/// Worker settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestConfig {
    /// Topics to subscribe to.
    pub topics: Vec<String>,
    /// Deliveries of one message with failing store writes before it is
    /// dead-lettered.
    pub max_delivery_attempts: NonZeroU32,
    /// Pause before subscribing again after a session ends or fails.
    pub resubscribe_delay: Duration,
    /// Pause before redelivering an unsettled message for the first time.
    /// Doubles per attempt.
    pub retry_delay: Duration,
    /// Cap on the pause before a redelivery.
    pub max_retry_delay: Duration,
}

impl IngestConfig {
    /// Consume `topic` with default settings.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topics: vec![topic.into()],
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            resubscribe_delay: DEFAULT_RESUBSCRIBE_DELAY,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }

    /// Set the delivery attempt budget for store failures.
    #[must_use]
    pub const fn with_max_delivery_attempts(mut self, attempts: NonZeroU32) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    /// Set the resubscribe pause.
    #[must_use]
    pub const fn with_resubscribe_delay(mut self, delay: Duration) -> Self {
        self.resubscribe_delay = delay;
        self
    }

    /// Set the redelivery backoff: first pause and cap.
    #[must_use]
    pub const fn with_retry_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_delay = initial;
        self.max_retry_delay = max;
        self
    }

    fn backoff(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .initial_delay(self.retry_delay)
            .max_delay(self.max_retry_delay)
            .build()
    }
}

/// Where the worker is in its loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    /// Between subscriptions or messages.
    Idle,
    /// Waiting for the next message.
    Fetching,
    /// Decoding and storing a message.
    Processing,
    /// Committing the message's offset.
    Acknowledging,
    /// Stopped by cancellation.
    Cancelled,
}

/// What happened to one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The aggregate was written. Acknowledged.
    Created,
    /// The aggregate already existed. Acknowledged.
    Duplicate,
    /// Parked in the dead-letter sink. Acknowledged.
    DeadLettered(DeadLetterReason),
    /// Left unacknowledged. The subscription is dropped so the message is
    /// delivered again.
    Deferred {
        /// Deliveries of this message seen so far.
        attempts: u32,
    },
}

impl MessageOutcome {
    /// Whether the message's offset should be committed.
    #[must_use]
    pub const fn acknowledges(self) -> bool {
        !matches!(self, Self::Deferred { .. })
    }

    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Duplicate => "duplicate",
            Self::DeadLettered(_) => "dead_lettered",
            Self::Deferred { .. } => "deferred",
        }
    }
}

/// Totals reported when the worker stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Messages fetched and processed.
    pub messages: u64,
    /// New aggregates stored.
    pub created: u64,
    /// Redeliveries of stored aggregates.
    pub duplicates: u64,
    /// Messages moved to the dead-letter sink.
    pub dead_lettered: u64,
    /// Messages left unacknowledged for redelivery.
    pub deferred: u64,
    /// Acknowledgements the stream rejected.
    pub ack_failures: u64,
    /// Receive errors reported by the stream.
    pub transport_errors: u64,
    /// Subscriptions opened.
    pub subscriptions: u64,
}

impl IngestSummary {
    fn record(&mut self, outcome: MessageOutcome) {
        self.messages += 1;
        match outcome {
            MessageOutcome::Created => self.created += 1,
            MessageOutcome::Duplicate => self.duplicates += 1,
            MessageOutcome::DeadLettered(_) => self.dead_lettered += 1,
            MessageOutcome::Deferred { .. } => self.deferred += 1,
        }
    }
}

enum SessionEnd {
    Drained,
    Rewind { attempts: u32 },
    Cancelled,
}

/// Moves orders from a [`MessageSource`] into an [`OrderStore`] and the
/// shared cache.
pub struct IngestionWorker {
    source: Arc<dyn MessageSource>,
    store: Arc<dyn OrderStore>,
    cache: Arc<OrderCache>,
    dead_letters: Arc<dyn DeadLetterSink>,
    config: IngestConfig,
    attempts: HashMap<MessagePosition, u32>,
    state: watch::Sender<WorkerState>,
    summary: IngestSummary,
}

impl IngestionWorker {
    /// Create an idle worker.
    #[must_use]
    pub fn new(
        source: Arc<dyn MessageSource>,
        store: Arc<dyn OrderStore>,
        cache: Arc<OrderCache>,
        dead_letters: Arc<dyn DeadLetterSink>,
        config: IngestConfig,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            source,
            store,
            cache,
            dead_letters,
            config,
            attempts: HashMap::new(),
            state,
            summary: IngestSummary::default(),
        }
    }

    /// Watch the worker's state. Take this before calling [`run`](Self::run).
    #[must_use]
    pub fn state(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Consume until `shutdown` is cancelled.
    ///
    /// Cancellation interrupts a pending subscribe, fetch, or resubscribe
    /// pause. A message that has already been fetched is processed to
    /// completion first. Sessions that end or fail are reopened after
    /// [`IngestConfig::resubscribe_delay`]; a session dropped for a deferred
    /// message is reopened after the redelivery backoff.
    pub async fn run(mut self, shutdown: CancellationToken) -> IngestSummary {
        tracing::info!(topics = ?self.config.topics, "Ingestion worker started");

        loop {
            self.set_state(WorkerState::Idle);
            let subscribed = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                result = self.source.subscribe(&self.config.topics) => result,
            };

            // The stream is dropped before the pause: a rewind leaves the group
            // and the next subscription starts at the last commit.
            let pause = match subscribed {
                Ok(mut stream) => {
                    self.summary.subscriptions += 1;
                    match self.consume(stream.as_mut(), &shutdown).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Rewind { attempts } => {
                            let delay = self.config.backoff().delay_for_retry(attempts.saturating_sub(1));
                            tracing::warn!(
                                attempts,
                                retry_in_ms = millis(delay),
                                "Message left unacknowledged, resubscribing from the last committed offset"
                            );
                            delay
                        }
                        SessionEnd::Drained => {
                            tracing::info!("Stream ended, resubscribing");
                            self.config.resubscribe_delay
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = millis(self.config.resubscribe_delay),
                        "Subscription failed"
                    );
                    self.config.resubscribe_delay
                }
            };

            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(pause) => {}
            }
        }

        self.set_state(WorkerState::Cancelled);
        tracing::info!(
            messages = self.summary.messages,
            created = self.summary.created,
            duplicates = self.summary.duplicates,
            dead_lettered = self.summary.dead_lettered,
            deferred = self.summary.deferred,
            "Ingestion worker stopped"
        );
        self.summary
    }

    async fn consume(
        &mut self,
        stream: &mut dyn MessageStream,
        shutdown: &CancellationToken,
    ) -> SessionEnd {
        loop {
            self.set_state(WorkerState::Fetching);
            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => return SessionEnd::Cancelled,
                next = stream.next_message() => next,
            };

            match next {
                None => return SessionEnd::Drained,
                Some(Err(e)) => {
                    self.summary.transport_errors += 1;
                    tracing::warn!(error = %e, "Failed to receive message");
                }
                Some(Ok(message)) => {
                    if let MessageOutcome::Deferred { attempts } =
                        self.handle_message(stream, &message).await
                    {
                        return SessionEnd::Rewind { attempts };
                    }
                }
            }
        }
    }

    async fn handle_message(
        &mut self,
        stream: &mut dyn MessageStream,
        message: &StreamMessage,
    ) -> MessageOutcome {
        let started = Instant::now();
        self.set_state(WorkerState::Processing);
        let position = message.position();
        let attempts = self.bump_attempts(&position);

        let outcome = match decode(message) {
            Ok(order) => self.store_order(message, order, attempts).await,
            Err(e) => {
                self.dead_letter(message, DeadLetterReason::Malformed, e.to_string(), attempts)
                    .await
            }
        };

        if outcome.acknowledges() {
            self.set_state(WorkerState::Acknowledging);
            match stream.acknowledge(message).await {
                Ok(()) => self.forget_through(&position),
                Err(e) => {
                    self.summary.ack_failures += 1;
                    tracing::warn!(position = %position, error = %e, "Failed to acknowledge message");
                }
            }
        }

        self.summary.record(outcome);
        metrics::ingest::record_outcome(outcome.as_str(), started.elapsed());
        metrics::cache::observe(&self.cache.stats());
        self.set_state(WorkerState::Idle);
        outcome
    }

    async fn store_order(
        &self,
        message: &StreamMessage,
        order: Order,
        attempts: u32,
    ) -> MessageOutcome {
        match self.store.create_aggregate(&order).await {
            Ok(created) => {
                tracing::info!(
                    order_uid = %order.order_uid,
                    partition = message.partition,
                    offset = message.offset,
                    duplicate = created == CreateOutcome::AlreadyExists,
                    "Order stored"
                );
                self.cache.set(order.order_uid.clone(), Arc::new(order));
                match created {
                    CreateOutcome::Created => MessageOutcome::Created,
                    CreateOutcome::AlreadyExists => MessageOutcome::Duplicate,
                }
            }
            Err(e) if attempts >= self.config.max_delivery_attempts.get() => {
                self.dead_letter(message, DeadLetterReason::RetriesExhausted, e.to_string(), attempts)
                    .await
            }
            Err(e) => {
                tracing::warn!(
                    position = %message.position(),
                    attempts,
                    error = %e,
                    "Failed to store order, leaving message for redelivery"
                );
                MessageOutcome::Deferred { attempts }
            }
        }
    }

    async fn dead_letter(
        &self,
        message: &StreamMessage,
        reason: DeadLetterReason,
        error: String,
        attempts: u32,
    ) -> MessageOutcome {
        let letter = DeadLetter::from_message(message, reason, error, attempts);
        match self.dead_letters.record(&letter).await {
            Ok(()) => {
                metrics::ingest::record_dead_letter(reason.as_str());
                tracing::error!(
                    position = %letter.position,
                    reason = %reason,
                    attempts,
                    error = %letter.error,
                    "Message dead-lettered"
                );
                MessageOutcome::DeadLettered(reason)
            }
            Err(e) => {
                tracing::error!(
                    position = %letter.position,
                    reason = %reason,
                    error = %e,
                    "Failed to record dead letter, leaving message for redelivery"
                );
                MessageOutcome::Deferred { attempts }
            }
        }
    }

    fn bump_attempts(&mut self, position: &MessagePosition) -> u32 {
        let attempts = self.attempts.entry(position.clone()).or_insert(0);
        *attempts = attempts.saturating_add(1);
        *attempts
    }

    // Commits are cumulative per partition: nothing at or below an
    // acknowledged offset comes back.
    fn forget_through(&mut self, acked: &MessagePosition) {
        self.attempts.retain(|p, _| {
            p.topic != acked.topic || p.partition != acked.partition || p.offset > acked.offset
        });
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

fn decode(message: &StreamMessage) -> Result<Order, IngestError> {
    let payload = message
        .payload
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or(IngestError::EmptyPayload)?;
    Ok(Order::from_json(payload)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use orderflow_testing::fixtures::{order_payload, sample_order};
    use orderflow_testing::{InMemoryDeadLetterSink, InMemoryMessageSource, InMemoryOrderStore};
    use std::num::NonZeroUsize;

    const TOPIC: &str = "order-topic";

    struct Harness {
        source: InMemoryMessageSource,
        store: InMemoryOrderStore,
        cache: Arc<OrderCache>,
        dead_letters: InMemoryDeadLetterSink,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                source: InMemoryMessageSource::new(TOPIC),
                store: InMemoryOrderStore::new(),
                cache: Arc::new(OrderCache::new(NonZeroUsize::new(8).unwrap())),
                dead_letters: InMemoryDeadLetterSink::new(),
            }
        }

        fn worker(&self, max_attempts: u32) -> IngestionWorker {
            IngestionWorker::new(
                Arc::new(self.source.clone()),
                Arc::new(self.store.clone()),
                Arc::clone(&self.cache),
                Arc::new(self.dead_letters.clone()),
                IngestConfig::new(TOPIC)
                    .with_max_delivery_attempts(NonZeroU32::new(max_attempts).unwrap())
                    .with_resubscribe_delay(Duration::from_millis(5))
                    .with_retry_backoff(Duration::from_millis(1), Duration::from_millis(4)),
            )
        }

        async fn next(&self, worker: &mut IngestionWorker) -> MessageOutcome {
            let topics = vec![TOPIC.to_string()];
            let mut stream = self.source.subscribe(&topics).await.unwrap();
            let message = stream.next_message().await.unwrap().unwrap();
            worker.handle_message(stream.as_mut(), &message).await
        }
    }

    #[test]
    fn defaults() {
        let config = IngestConfig::new(TOPIC);
        assert_eq!(config.topics, vec![TOPIC.to_string()]);
        assert_eq!(config.max_delivery_attempts.get(), 5);
        assert_eq!(config.resubscribe_delay, Duration::from_secs(5));
        assert_eq!(config.backoff().delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(config.backoff().delay_for_retry(10), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn stored_order_is_cached_then_acknowledged() {
        let h = Harness::new();
        let mut worker = h.worker(3);
        let offset = h.source.publish_order(&sample_order("O1"));

        let outcome = h.next(&mut worker).await;

        assert_eq!(outcome, MessageOutcome::Created);
        assert!(h.source.is_acked(offset));
        assert_eq!(*h.cache.get("O1").unwrap(), sample_order("O1"));
        assert_eq!(h.store.order_count(), 1);
    }

    #[tokio::test]
    async fn redelivered_order_is_acknowledged_as_duplicate() {
        let h = Harness::new();
        let mut worker = h.worker(3);
        h.store.insert(&sample_order("O1"));
        let offset = h.source.publish_order(&sample_order("O1"));

        assert_eq!(h.next(&mut worker).await, MessageOutcome::Duplicate);
        assert!(h.source.is_acked(offset));
        assert_eq!(h.store.order_count(), 1);
        assert!(h.cache.contains("O1"));
    }

    #[tokio::test]
    async fn store_failure_is_not_acknowledged() {
        let h = Harness::new();
        let mut worker = h.worker(3);
        h.store.fail_writes_at(orderflow_testing::WriteStage::Payment);
        let offset = h.source.publish_order(&sample_order("O1"));

        let outcome = h.next(&mut worker).await;

        assert_eq!(outcome, MessageOutcome::Deferred { attempts: 1 });
        assert!(!h.source.is_acked(offset));
        assert!(!h.cache.contains("O1"));
        assert!(!h.store.has_any_row("O1"));
    }

    #[tokio::test]
    async fn redelivered_message_succeeds_once_store_recovers() {
        let h = Harness::new();
        let mut worker = h.worker(3);
        h.store.fail_next_writes(1);
        let offset = h.source.publish_order(&sample_order("O1"));

        assert_eq!(h.next(&mut worker).await, MessageOutcome::Deferred { attempts: 1 });
        assert_eq!(h.next(&mut worker).await, MessageOutcome::Created);

        assert!(h.source.is_acked(offset));
        assert!(h.cache.contains("O1"));
        assert!(worker.attempts.is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_dead_lettered_once_budget_is_spent() {
        let h = Harness::new();
        let mut worker = h.worker(3);
        h.store.fail_writes_at(orderflow_testing::WriteStage::Items);
        let offset = h.source.publish_order(&sample_order("O1"));

        assert_eq!(h.next(&mut worker).await, MessageOutcome::Deferred { attempts: 1 });
        assert_eq!(h.next(&mut worker).await, MessageOutcome::Deferred { attempts: 2 });
        let outcome = h.next(&mut worker).await;

        assert_eq!(outcome, MessageOutcome::DeadLettered(DeadLetterReason::RetriesExhausted));
        assert!(h.source.is_acked(offset));
        assert!(!h.store.has_any_row("O1"));
        assert_eq!(h.dead_letters.letters()[0].attempts, 3);
    }

    #[tokio::test]
    async fn failed_dead_letter_is_recorded_on_a_later_delivery() {
        let h = Harness::new();
        let mut worker = h.worker(2);
        h.store.fail_writes_at(orderflow_testing::WriteStage::Order);
        h.dead_letters.fail_records(true);
        let offset = h.source.publish_order(&sample_order("O1"));

        assert_eq!(h.next(&mut worker).await, MessageOutcome::Deferred { attempts: 1 });
        assert_eq!(h.next(&mut worker).await, MessageOutcome::Deferred { attempts: 2 });
        assert!(!h.source.is_acked(offset));

        h.dead_letters.fail_records(false);
        let outcome = h.next(&mut worker).await;

        assert_eq!(outcome, MessageOutcome::DeadLettered(DeadLetterReason::RetriesExhausted));
        assert_eq!(h.store.calls().create_aggregate, 3);
        assert_eq!(h.dead_letters.letters()[0].attempts, 3);
        assert!(h.source.is_acked(offset));
    }

    #[tokio::test]
    async fn malformed_payload_is_dead_lettered_and_acknowledged() {
        let h = Harness::new();
        let mut worker = h.worker(3);
        let offset = h.source.publish(b"{not json".to_vec());

        let outcome = h.next(&mut worker).await;

        assert_eq!(outcome, MessageOutcome::DeadLettered(DeadLetterReason::Malformed));
        assert!(h.source.is_acked(offset));
        let letters = h.dead_letters.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].position.offset, offset);
        assert_eq!(letters[0].payload.as_deref(), Some(&b"{not json"[..]));
    }

    #[tokio::test]
    async fn empty_payload_is_malformed() {
        let h = Harness::new();
        let mut worker = h.worker(3);
        h.source.publish_tombstone();

        let outcome = h.next(&mut worker).await;

        assert_eq!(outcome, MessageOutcome::DeadLettered(DeadLetterReason::Malformed));
        assert_eq!(h.dead_letters.letters()[0].error, "Message has no payload");
    }

    #[tokio::test]
    async fn failed_dead_letter_keeps_message_unacknowledged() {
        let h = Harness::new();
        let mut worker = h.worker(3);
        h.dead_letters.fail_records(true);
        let offset = h.source.publish(b"garbage".to_vec());

        let outcome = h.next(&mut worker).await;

        assert_eq!(outcome, MessageOutcome::Deferred { attempts: 1 });
        assert!(!h.source.is_acked(offset));
    }

    #[tokio::test]
    async fn acknowledgement_failure_is_counted_not_fatal() {
        let h = Harness::new();
        let mut worker = h.worker(3);
        h.source.fail_acks(true);
        h.source.publish(order_payload(&sample_order("O1")));

        assert_eq!(h.next(&mut worker).await, MessageOutcome::Created);
        assert_eq!(worker.summary.ack_failures, 1);
        assert!(h.cache.contains("O1"));
    }

    #[test]
    fn acknowledgement_forgets_earlier_attempts_on_same_partition() {
        let h = Harness::new();
        let mut worker = h.worker(3);
        let at = |topic: &str, partition, offset| MessagePosition {
            topic: topic.to_string(),
            partition,
            offset,
        };
        worker.bump_attempts(&at(TOPIC, 0, 3));
        worker.bump_attempts(&at(TOPIC, 0, 9));
        worker.bump_attempts(&at(TOPIC, 1, 2));

        worker.forget_through(&at(TOPIC, 0, 5));

        let mut left: Vec<_> = worker.attempts.keys().cloned().collect();
        left.sort_by_key(|p| (p.partition, p.offset));
        assert_eq!(left, vec![at(TOPIC, 0, 9), at(TOPIC, 1, 2)]);
    }

    #[tokio::test]
    async fn run_stops_promptly_while_waiting_for_messages() {
        let h = Harness::new();
        let worker = h.worker(3);
        let mut state = worker.state();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        state
            .wait_for(|s| *s == WorkerState::Fetching)
            .await
            .expect("worker dropped");
        shutdown.cancel();

        let summary = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not stop")
            .expect("worker panicked");
        assert_eq!(summary.messages, 0);
        assert_eq!(summary.subscriptions, 1);
        assert_eq!(*state.borrow(), WorkerState::Cancelled);
    }

    #[tokio::test]
    async fn run_resubscribes_after_subscribe_failure() {
        let h = Harness::new();
        h.source.fail_next_subscribes(2);
        let offset = h.source.publish_order(&sample_order("O1"));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.worker(3).run(shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(2), h.source.wait_for_ack(offset))
            .await
            .expect("message never acknowledged");
        shutdown.cancel();

        let summary = handle.await.unwrap();
        assert_eq!(summary.created, 1);
        assert_eq!(summary.subscriptions, 1);
    }

    #[tokio::test]
    async fn run_survives_transport_errors() {
        let h = Harness::new();
        h.source.inject_transport_error("broker went away");
        let offset = h.source.publish_order(&sample_order("O1"));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.worker(3).run(shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(2), h.source.wait_for_ack(offset))
            .await
            .expect("message never acknowledged");
        shutdown.cancel();

        let summary = handle.await.unwrap();
        assert_eq!(summary.transport_errors, 1);
        assert_eq!(summary.created, 1);
    }

    #[tokio::test]
    async fn run_does_not_read_past_a_deferred_message() {
        let h = Harness::new();
        h.store.fail_next_writes(1);
        let first = h.source.publish_order(&sample_order("O1"));
        let second = h.source.publish_order(&sample_order("O2"));
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.worker(3).run(shutdown.clone()));

        tokio::time::timeout(Duration::from_secs(2), h.source.wait_for_ack(second))
            .await
            .expect("message never acknowledged");
        shutdown.cancel();

        let summary = handle.await.unwrap();
        assert!(h.source.is_acked(first));
        assert!(h.store.has_any_row("O1"));
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.messages, 3);
        assert_eq!(summary.subscriptions, 2);
    }
}
