//! Integration tests for [`RedpandaOrderSource`] against a real Kafka broker.
//!
//! Marked `#[ignore]`: they need Docker and take tens of seconds to start the
//! broker.
//!
//! ```bash
//! cargo test -p orderflow-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use orderflow_core::{MessageSource, MessageStream, Order, StreamMessage};
use orderflow_redpanda::{RedpandaOrderPublisher, RedpandaOrderSource};
use orderflow_testing::fixtures::sample_order;
use std::time::Duration;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

const TOPIC: &str = "order-topic";

async fn wait_for_broker(brokers: &str) -> RedpandaOrderPublisher {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(publisher) = RedpandaOrderPublisher::new(brokers, TOPIC) {
            if publisher.publish_raw(b"warmup", b"warmup").await.is_ok() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                return publisher;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
    unreachable!()
}

async fn next_order(stream: &mut Box<dyn MessageStream>) -> (StreamMessage, Order) {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(20), stream.next_message())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("Failed to receive message");
        let payload = message.payload.clone().unwrap_or_default();
        if let Ok(order) = Order::from_json(&payload) {
            return (message, order);
        }
        stream.acknowledge(&message).await.expect("Failed to ack warmup");
    }
}

#[tokio::test]
#[ignore]
async fn unacknowledged_message_is_redelivered_to_next_member() {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");
    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");
    let publisher = wait_for_broker(&brokers).await;

    publisher
        .publish(&sample_order("kafka-1"))
        .await
        .expect("Failed to publish first order");
    publisher
        .publish(&sample_order("kafka-2"))
        .await
        .expect("Failed to publish second order");

    let source = RedpandaOrderSource::builder()
        .brokers(&brokers)
        .consumer_group("orderflow-it")
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to build source");
    let topics = vec![TOPIC.to_string()];

    let mut stream = source.subscribe(&topics).await.expect("Failed to subscribe");
    let (first, order) = next_order(&mut stream).await;
    assert_eq!(order.order_uid, "kafka-1");
    stream.acknowledge(&first).await.expect("Failed to ack");
    let (_second, order) = next_order(&mut stream).await;
    assert_eq!(order.order_uid, "kafka-2");

    // Let the async commit land, then leave the group without acking kafka-2.
    tokio::time::sleep(Duration::from_secs(2)).await;
    drop(stream);

    let mut stream = source.subscribe(&topics).await.expect("Failed to resubscribe");
    let (_again, order) = next_order(&mut stream).await;
    assert_eq!(order.order_uid, "kafka-2");
}
