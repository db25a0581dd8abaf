//! Integration tests against a live cluster.
//!
//! These tests need a reachable broker; set `KAFKA_BROKERS` (for example
//! `localhost:9092`) and run with `--ignored`:
//!
//! ```sh
//! KAFKA_BROKERS=localhost:9092 cargo test -p conduit-kafka -- --ignored
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use conduit_kafka::{
    FnMessageHandler, KafkaConfig, KafkaManager, MessageHandler, OutboundMessage,
};

fn live_config() -> Option<KafkaConfig> {
    let brokers = std::env::var("KAFKA_BROKERS").ok()?;
    let mut config = KafkaConfig::default();
    config.brokers = brokers.split(',').map(str::to_string).collect();
    config.client_id = format!("conduit-it-{}", Uuid::new_v4());
    config.consumer.group_id = format!("conduit-it-group-{}", Uuid::new_v4());
    config.consumer.topics = vec!["conduit-it".to_string()];
    config.consumer.offset_initial = -2;
    Some(config)
}

async fn connected_manager() -> (KafkaManager, CancellationToken) {
    let config = live_config().expect("KAFKA_BROKERS must be set for integration tests");
    let manager = KafkaManager::new(config).unwrap();
    let ctx = CancellationToken::new();
    manager.connect(ctx.clone()).await.unwrap();
    (manager, ctx)
}

#[tokio::test]
#[ignore]
async fn ping_reaches_cluster() {
    let (manager, ctx) = connected_manager().await;
    manager.ping(ctx).await.unwrap();
    manager.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn topic_admin_round_trip() {
    let (manager, ctx) = connected_manager().await;
    let topic = format!("conduit-it-admin-{}", Uuid::new_v4());

    manager
        .create_topic(ctx.clone(), &topic, 3, 1)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let topics = manager.list_topics(ctx.clone()).await.unwrap();
    assert!(topics.contains(&topic));

    let info = manager.describe_topic(ctx.clone(), &topic).await.unwrap();
    assert_eq!(info.name, topic);
    assert_eq!(info.partitions.len(), 3);

    manager.delete_topic(ctx, &topic).await.unwrap();
    manager.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn send_and_consume_round_trip() {
    let (manager, ctx) = connected_manager().await;
    let topic = format!("conduit-it-rt-{}", Uuid::new_v4());
    manager
        .create_topic(ctx.clone(), &topic, 1, 1)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let producer = manager.producer().await.unwrap();
    let sent = OutboundMessage::new(topic.clone(), b"payload".to_vec())
        .with_key("key-1")
        .with_header("X-Trace", "abc");
    let result = producer.send(&sent).await.unwrap();
    assert_eq!(result.topic, topic);
    assert!(result.offset >= 0);

    let received = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let handler: Arc<dyn MessageHandler> = Arc::new(FnMessageHandler(move |msg| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().await.push(msg);
            anyhow::Ok(())
        }
    }));

    let mut policy = manager.config().consumer.clone();
    policy.topics = vec![topic.clone()];
    let consumer = manager.create_consumer("rt", policy).await.unwrap();
    consumer.start(ctx.clone(), handler).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    consumer.stop().await;

    let messages = received.lock().await;
    assert_eq!(messages.len(), 1);
    let msg = &messages[0];
    assert_eq!(msg.topic, topic);
    assert_eq!(msg.key_string().as_deref(), Some("key-1"));
    assert_eq!(msg.value, b"payload".to_vec());
    assert_eq!(msg.headers.get("X-Trace").map(String::as_str), Some("abc"));

    manager.delete_topic(ctx, &topic).await.unwrap();
    manager.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn async_producer_notification_saturation() {
    let (manager, ctx) = connected_manager().await;
    let topic = format!("conduit-it-async-{}", Uuid::new_v4());
    manager
        .create_topic(ctx.clone(), &topic, 1, 1)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let producer = manager.async_producer().await.unwrap();
    let total = 200usize;
    for i in 0..total {
        let msg = OutboundMessage::new(topic.clone(), format!("m-{i}").into_bytes());
        producer.send_detached(msg, None).unwrap();
    }

    // Let deliveries land; the channel only holds 100 notifications but no
    // message is lost at the broker.
    tokio::time::sleep(Duration::from_secs(5)).await;

    let mut notified = 0usize;
    while let Ok(Some(_)) =
        tokio::time::timeout(Duration::from_millis(100), producer.next_success()).await
    {
        notified += 1;
    }
    assert!(notified <= 100, "bounded channel held {notified} results");

    // Broker-side count proves no message loss.
    let offsets = manager
        .get_offset(ctx.clone(), manager.config().consumer.group_id.as_str(), &topic)
        .await;
    assert!(offsets.is_ok());

    manager.delete_topic(ctx, &topic).await.unwrap();
    manager.close().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn graceful_shutdown_with_multiple_consumers() {
    let (manager, ctx) = connected_manager().await;
    let topic = format!("conduit-it-shutdown-{}", Uuid::new_v4());
    manager
        .create_topic(ctx.clone(), &topic, 3, 1)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let handled = Arc::new(AtomicUsize::new(0));
    for i in 0..3 {
        let counter = Arc::clone(&handled);
        let handler: Arc<dyn MessageHandler> = Arc::new(FnMessageHandler(move |_msg| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::Ok(())
            }
        }));

        let mut policy = manager.config().consumer.clone();
        policy.topics = vec![topic.clone()];
        policy.group_id = format!("shutdown-group-{i}");
        let consumer = manager
            .create_consumer(&format!("shutdown-{i}"), policy)
            .await
            .unwrap();
        consumer.start(ctx.clone(), handler).await.unwrap();
    }

    ctx.cancel();
    let closed = tokio::time::timeout(Duration::from_secs(45), manager.close()).await;
    assert!(matches!(closed, Ok(Ok(()))));
}
