//! In-memory message source.
//!
//! Models one topic with one partition and commits the way a Kafka consumer
//! group does: acknowledging offset `n` sets the committed offset to `n + 1`,
//! covering every earlier message whether or not it was acknowledged itself.
//! Every subscription starts reading at the committed offset. Within one
//! subscription messages keep flowing past an unacknowledged one.

#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

use orderflow_core::{BoxFuture, MessageSource, MessageStream, Order, StreamError, StreamMessage};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
struct Log {
    messages: Vec<StreamMessage>,
    committed: i64,
    closed: bool,
    end_when_drained: bool,
    subscriptions: usize,
    failing_subscribes: usize,
    failing_acks: bool,
    transport_errors: VecDeque<String>,
}

/// Single-partition, in-memory [`MessageSource`].
///
/// Clones share the same log.
#[derive(Clone)]
pub struct InMemoryMessageSource {
    topic: String,
    log: Arc<Mutex<Log>>,
    changed: Arc<Notify>,
}

impl InMemoryMessageSource {
    /// Create an empty log for `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            log: Arc::new(Mutex::new(Log::default())),
            changed: Arc::new(Notify::new()),
        }
    }

    /// Append a message and return its offset.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> i64 {
        self.append(Some(payload.into()))
    }

    /// Append the JSON form of `order`.
    pub fn publish_order(&self, order: &Order) -> i64 {
        self.publish(crate::fixtures::order_payload(order))
    }

    /// Append a message with no payload.
    pub fn publish_tombstone(&self) -> i64 {
        self.append(None)
    }

    fn append(&self, payload: Option<Vec<u8>>) -> i64 {
        let mut log = self.log.lock().unwrap();
        let offset = i64::try_from(log.messages.len()).unwrap();
        log.messages.push(StreamMessage {
            topic: self.topic.clone(),
            partition: 0,
            offset,
            key: None,
            payload,
        });
        drop(log);
        self.changed.notify_waiters();
        offset
    }

    /// End every open and future stream once it has nothing left to deliver.
    pub fn close(&self) {
        self.log.lock().unwrap().closed = true;
        self.changed.notify_waiters();
    }

    /// Make each subscription end once it has delivered the whole log,
    /// forcing the consumer to resubscribe.
    pub fn end_sessions_when_drained(&self) {
        self.log.lock().unwrap().end_when_drained = true;
        self.changed.notify_waiters();
    }

    /// Reject the next `times` subscribe calls.
    pub fn fail_next_subscribes(&self, times: usize) {
        self.log.lock().unwrap().failing_subscribes = times;
    }

    /// Make the next fetch on an open stream return a transport error.
    pub fn inject_transport_error(&self, reason: impl Into<String>) {
        self.log.lock().unwrap().transport_errors.push_back(reason.into());
        self.changed.notify_waiters();
    }

    /// Make acknowledgements fail.
    pub fn fail_acks(&self, fail: bool) {
        self.log.lock().unwrap().failing_acks = fail;
    }

    /// Whether `offset` is covered by the committed offset.
    #[must_use]
    pub fn is_acked(&self, offset: i64) -> bool {
        offset < self.committed_offset()
    }

    /// Next offset a new subscription will read.
    #[must_use]
    pub fn committed_offset(&self) -> i64 {
        self.log.lock().unwrap().committed
    }

    /// Number of successful subscribe calls.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.log.lock().unwrap().subscriptions
    }

    /// Wait until `offset` is acknowledged.
    pub async fn wait_for_ack(&self, offset: i64) {
        loop {
            let notified = self.changed.notified();
            if self.is_acked(offset) {
                return;
            }
            notified.await;
        }
    }

    /// Wait until at least `count` subscriptions have been opened.
    pub async fn wait_for_subscriptions(&self, count: usize) {
        loop {
            let notified = self.changed.notified();
            if self.subscription_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

impl MessageSource for InMemoryMessageSource {
    fn subscribe<'a>(
        &'a self,
        topics: &'a [String],
    ) -> BoxFuture<'a, Result<Box<dyn MessageStream>, StreamError>> {
        let result = {
            let mut log = self.log.lock().unwrap();
            if log.failing_subscribes > 0 {
                log.failing_subscribes -= 1;
                Err(StreamError::SubscriptionFailed {
                    topics: topics.to_vec(),
                    reason: "injected subscribe failure".to_string(),
                })
            } else if !topics.contains(&self.topic) {
                Err(StreamError::SubscriptionFailed {
                    topics: topics.to_vec(),
                    reason: format!("unknown topic, only {} exists", self.topic),
                })
            } else {
                log.subscriptions += 1;
                Ok(Box::new(InMemoryMessageStream {
                    log: Arc::clone(&self.log),
                    changed: Arc::clone(&self.changed),
                    cursor: log.committed,
                }) as Box<dyn MessageStream>)
            }
        };
        self.changed.notify_waiters();
        Box::pin(async move { result })
    }
}

struct InMemoryMessageStream {
    log: Arc<Mutex<Log>>,
    changed: Arc<Notify>,
    cursor: i64,
}

impl InMemoryMessageStream {
    fn poll_log(&mut self) -> Option<Option<Result<StreamMessage, StreamError>>> {
        let mut log = self.log.lock().unwrap();
        if let Some(reason) = log.transport_errors.pop_front() {
            return Some(Some(Err(StreamError::Transport(reason))));
        }
        let next = usize::try_from(self.cursor)
            .ok()
            .and_then(|i| log.messages.get(i))
            .cloned();
        if let Some(message) = next {
            self.cursor = message.offset + 1;
            return Some(Some(Ok(message)));
        }
        if log.closed || log.end_when_drained {
            return Some(None);
        }
        None
    }
}

impl MessageStream for InMemoryMessageStream {
    fn next_message(&mut self) -> BoxFuture<'_, Option<Result<StreamMessage, StreamError>>> {
        Box::pin(async move {
            loop {
                let changed = Arc::clone(&self.changed);
                let notified = changed.notified();
                if let Some(outcome) = self.poll_log() {
                    return outcome;
                }
                notified.await;
            }
        })
    }

    fn acknowledge<'a>(&'a self, message: &'a StreamMessage) -> BoxFuture<'a, Result<(), StreamError>> {
        let result = {
            let mut log = self.log.lock().unwrap();
            if log.failing_acks {
                Err(StreamError::CommitFailed("injected commit failure".to_string()))
            } else {
                log.committed = log.committed.max(message.offset + 1);
                Ok(())
            }
        };
        self.changed.notify_waiters();
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> Vec<String> {
        vec!["order-topic".to_string()]
    }

    #[tokio::test]
    async fn unacked_messages_are_redelivered_on_resubscribe() {
        let source = InMemoryMessageSource::new("order-topic");
        source.publish(b"one".to_vec());
        source.publish(b"two".to_vec());
        source.end_sessions_when_drained();

        let mut stream = source.subscribe(&topics()).await.unwrap();
        let first = stream.next_message().await.unwrap().unwrap();
        let _second = stream.next_message().await.unwrap().unwrap();
        stream.acknowledge(&first).await.unwrap();
        assert!(stream.next_message().await.is_none());

        let mut stream = source.subscribe(&topics()).await.unwrap();
        let again = stream.next_message().await.unwrap().unwrap();
        assert_eq!(again.offset, 1);
        assert!(stream.next_message().await.is_none());
    }

    #[tokio::test]
    async fn acknowledging_later_offset_commits_earlier_ones() {
        let source = InMemoryMessageSource::new("order-topic");
        source.publish(b"one".to_vec());
        source.publish(b"two".to_vec());
        source.publish(b"three".to_vec());
        source.end_sessions_when_drained();

        let mut stream = source.subscribe(&topics()).await.unwrap();
        let _first = stream.next_message().await.unwrap().unwrap();
        let second = stream.next_message().await.unwrap().unwrap();
        stream.acknowledge(&second).await.unwrap();

        assert!(source.is_acked(0));
        assert_eq!(source.committed_offset(), 2);

        let mut stream = source.subscribe(&topics()).await.unwrap();
        assert_eq!(stream.next_message().await.unwrap().unwrap().offset, 2);
        assert!(stream.next_message().await.is_none());
    }

    #[tokio::test]
    async fn stale_acknowledgement_does_not_move_commit_back() {
        let source = InMemoryMessageSource::new("order-topic");
        source.publish(b"one".to_vec());
        source.publish(b"two".to_vec());

        let mut stream = source.subscribe(&topics()).await.unwrap();
        let first = stream.next_message().await.unwrap().unwrap();
        let second = stream.next_message().await.unwrap().unwrap();
        stream.acknowledge(&second).await.unwrap();
        stream.acknowledge(&first).await.unwrap();

        assert_eq!(source.committed_offset(), 2);
    }

    #[tokio::test]
    async fn fetch_waits_for_publish() {
        let source = InMemoryMessageSource::new("order-topic");
        let mut stream = source.subscribe(&topics()).await.unwrap();

        let publisher = source.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            publisher.publish(b"late".to_vec());
        });

        let message = stream.next_message().await.unwrap().unwrap();
        assert_eq!(message.payload.as_deref(), Some(&b"late"[..]));
    }

    #[tokio::test]
    async fn wait_for_ack_resolves_on_acknowledge() {
        let source = InMemoryMessageSource::new("order-topic");
        let offset = source.publish(b"one".to_vec());
        let mut stream = source.subscribe(&topics()).await.unwrap();
        let message = stream.next_message().await.unwrap().unwrap();

        let mut waiting = tokio_test::task::spawn(source.wait_for_ack(offset));
        tokio_test::assert_pending!(waiting.poll());

        stream.acknowledge(&message).await.unwrap();
        assert!(waiting.is_woken());
        tokio_test::assert_ready!(waiting.poll());
    }

    #[tokio::test]
    async fn unknown_topic_is_rejected() {
        let source = InMemoryMessageSource::new("order-topic");
        let result = source.subscribe(&["other".to_string()]).await;
        assert!(matches!(result, Err(StreamError::SubscriptionFailed { .. })));
    }
}
