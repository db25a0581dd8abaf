//! # Consumer Group Module
//!
//! One logical group membership with a session loop, at-least-once delivery
//! and explicit offset marking. Handler errors are logged and the offset is
//! still marked; offsets never regress on handler failure. The
//! [`SimpleConsumer`] variant reads a single topic/partition from an
//! explicit offset with no group coordination.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rdkafka::consumer::{
    Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::KafkaResult;
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::ClientContext;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConsumerConfig, KafkaConfig, OFFSET_OLDEST};
use crate::error::{KafkaError, Result};
use crate::message::InboundMessage;

/// Per-message handler invoked by consumer loops
///
/// Errors returned from `handle` are logged with topic/partition/offset and
/// the message's offset is still marked: delivery is at-least-once and a
/// failing handler does not roll the group back. Handlers that must not lose
/// records persist failures themselves (for example into a dead-letter
/// topic) before returning.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: InboundMessage) -> anyhow::Result<()>;
}

/// Adapter implementing [`MessageHandler`] for plain async closures
pub struct FnMessageHandler<F>(pub F);

#[async_trait]
impl<F, Fut> MessageHandler for FnMessageHandler<F>
where
    F: Fn(InboundMessage) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, msg: InboundMessage) -> anyhow::Result<()> {
        (self.0)(msg).await
    }
}

/// Consumer context logging session transitions (the setup/cleanup hooks of
/// a group session)
pub struct SessionContext {
    name: String,
}

impl ClientContext for SessionContext {}

impl ConsumerContext for SessionContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                info!(
                    consumer = %self.name,
                    partitions = tpl.count(),
                    "session setup: partitions assigned"
                );
            }
            Rebalance::Revoke(tpl) => {
                info!(
                    consumer = %self.name,
                    partitions = tpl.count(),
                    "session cleanup: partitions revoked"
                );
            }
            Rebalance::Error(e) => {
                warn!(consumer = %self.name, error = %e, "rebalance error");
            }
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Assign(tpl) = rebalance {
            debug!(
                consumer = %self.name,
                partitions = tpl.count(),
                "rebalance applied"
            );
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        if let Err(e) = result {
            warn!(consumer = %self.name, error = %e, "offset commit failed");
        }
    }
}

type GroupStreamConsumer = StreamConsumer<SessionContext>;

struct LoopState {
    running: bool,
    handle: Option<JoinHandle<()>>,
}

/// One group membership owned by the manager
pub struct GroupConsumer {
    name: String,
    policy: ConsumerConfig,
    consumer: Arc<GroupStreamConsumer>,
    state: tokio::sync::Mutex<LoopState>,
    stop: CancellationToken,
}

impl GroupConsumer {
    /// Build a consumer from the shared tree plus a per-consumer policy
    pub(crate) fn new(name: &str, shared: &KafkaConfig, policy: ConsumerConfig) -> Result<Self> {
        policy.validate()?;

        let consumer: GroupStreamConsumer = shared
            .consumer_client_config(&policy)
            .create_with_context(SessionContext {
                name: name.to_string(),
            })
            .map_err(|e| KafkaError::config(format!("failed to create consumer {name}: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            policy,
            consumer: Arc::new(consumer),
            state: tokio::sync::Mutex::new(LoopState {
                running: false,
                handle: None,
            }),
            stop: CancellationToken::new(),
        })
    }

    /// Consumer name as registered with the manager
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The per-consumer policy in effect
    pub fn policy(&self) -> &ConsumerConfig {
        &self.policy
    }

    /// Subscribe and spawn the session loop; double-start is an error
    pub async fn start(&self, ctx: CancellationToken, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.running {
            return Err(KafkaError::ConsumerAlreadyRunning {
                name: self.name.clone(),
            });
        }

        let topics: Vec<&str> = self.policy.topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;
        info!(
            consumer = %self.name,
            group = %self.policy.group_id,
            member_id = ?self.consumer.memberid(),
            "session setup: subscribed, joining group"
        );

        let consumer = Arc::clone(&self.consumer);
        let stop = self.stop.clone();
        let name = self.name.clone();
        let max_processing = self.policy.max_processing_time_duration();

        let handle = tokio::spawn(async move {
            info!(consumer = %name, "consumer loop started");
            loop {
                let msg = tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = stop.cancelled() => break,
                    msg = consumer.recv() => msg,
                };

                match msg {
                    Err(e) => {
                        // Protocol-level errors are transient; the session
                        // loop keeps going.
                        warn!(consumer = %name, error = %e, "consume error, retrying");
                    }
                    Ok(borrowed) => {
                        let inbound = InboundMessage::from_borrowed(&borrowed);
                        let topic = inbound.topic.clone();
                        let partition = inbound.partition;
                        let offset = inbound.offset;

                        let outcome =
                            tokio::time::timeout(max_processing, handler.handle(inbound)).await;
                        match outcome {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                error!(
                                    consumer = %name,
                                    topic = %topic,
                                    partition,
                                    offset,
                                    error = %e,
                                    "message handler failed"
                                );
                            }
                            Err(_) => {
                                error!(
                                    consumer = %name,
                                    topic = %topic,
                                    partition,
                                    offset,
                                    "message handler exceeded processing deadline"
                                );
                            }
                        }

                        // Offsets are marked after every attempt; handler
                        // failures do not roll the group back.
                        if let Err(e) = consumer.store_offset_from_message(&borrowed) {
                            warn!(
                                consumer = %name,
                                topic = %topic,
                                partition,
                                error = %e,
                                "failed to store offset"
                            );
                        }
                    }
                }
            }
            info!(consumer = %name, "consumer loop stopped");
        });

        state.running = true;
        state.handle = Some(handle);
        Ok(())
    }

    /// Stop the loop and leave the group; repeated calls are no-ops
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if !state.running && state.handle.is_none() {
            return;
        }
        state.running = false;
        self.stop.cancel();

        if let Some(handle) = state.handle.take() {
            let _ = handle.await;
        }
        self.consumer.unsubscribe();
    }

    /// Whether the session loop is live
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }
}

/// A groupless consumer reading one topic/partition from an explicit offset
pub struct SimpleConsumer {
    name: String,
    consumer: Arc<GroupStreamConsumer>,
    state: tokio::sync::Mutex<LoopState>,
    stop: CancellationToken,
    max_processing: std::time::Duration,
}

impl SimpleConsumer {
    /// Build a simple consumer from the shared tree
    pub fn new(name: &str, shared: &KafkaConfig) -> Result<Self> {
        // A throwaway group id keeps the wire client happy; the consumer
        // never joins the group.
        let mut policy = shared.consumer.clone();
        policy.group_id = format!("{}-{name}-simple", shared.client_id);
        policy.auto_commit = false;

        let consumer: GroupStreamConsumer = shared
            .consumer_client_config(&policy)
            .create_with_context(SessionContext {
                name: name.to_string(),
            })
            .map_err(|e| {
                KafkaError::config(format!("failed to create simple consumer {name}: {e}"))
            })?;

        Ok(Self {
            name: name.to_string(),
            consumer: Arc::new(consumer),
            state: tokio::sync::Mutex::new(LoopState {
                running: false,
                handle: None,
            }),
            stop: CancellationToken::new(),
            max_processing: shared.consumer.max_processing_time_duration(),
        })
    }

    /// Assign the partition and spawn the read loop
    pub async fn start(
        &self,
        ctx: CancellationToken,
        topic: &str,
        partition: i32,
        offset: i64,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.running {
            return Err(KafkaError::ConsumerAlreadyRunning {
                name: self.name.clone(),
            });
        }
        if topic.is_empty() {
            return Err(KafkaError::EmptyTopic);
        }

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, offset_position(offset))?;
        self.consumer.assign(&tpl)?;

        let consumer = Arc::clone(&self.consumer);
        let stop = self.stop.clone();
        let name = self.name.clone();
        let max_processing = self.max_processing;

        let handle = tokio::spawn(async move {
            info!(consumer = %name, "simple consumer loop started");
            loop {
                let msg = tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = stop.cancelled() => break,
                    msg = consumer.recv() => msg,
                };

                match msg {
                    Err(e) => {
                        warn!(consumer = %name, error = %e, "consume error, retrying");
                    }
                    Ok(borrowed) => {
                        let inbound = InboundMessage::from_borrowed(&borrowed);
                        let (topic, partition, offset) =
                            (inbound.topic.clone(), inbound.partition, inbound.offset);
                        let outcome =
                            tokio::time::timeout(max_processing, handler.handle(inbound)).await;
                        match outcome {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                error!(
                                    consumer = %name,
                                    topic = %topic,
                                    partition,
                                    offset,
                                    error = %e,
                                    "message handler failed"
                                );
                            }
                            Err(_) => {
                                error!(
                                    consumer = %name,
                                    topic = %topic,
                                    partition,
                                    offset,
                                    "message handler exceeded processing deadline"
                                );
                            }
                        }
                    }
                }
            }
            info!(consumer = %name, "simple consumer loop stopped");
        });

        state.running = true;
        state.handle = Some(handle);
        Ok(())
    }

    /// Stop the loop; repeated calls are no-ops
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if !state.running && state.handle.is_none() {
            return;
        }
        state.running = false;
        self.stop.cancel();
        if let Some(handle) = state.handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether the read loop is live
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.running
    }
}

/// Translate an offset sentinel into a wire-client position
fn offset_position(offset: i64) -> Offset {
    match offset {
        o if o == OFFSET_OLDEST => Offset::Beginning,
        -1 => Offset::End,
        o => Offset::Offset(o),
    }
}

/// Extract `{partition -> offset}` from a wire-client offset list
pub(crate) fn offsets_by_partition(tpl: &TopicPartitionList) -> HashMap<i32, i64> {
    tpl.elements()
        .iter()
        .map(|e| {
            let offset = match e.offset() {
                Offset::Offset(o) => o,
                _ => -1,
            };
            (e.partition(), offset)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OFFSET_NEWEST;

    fn shared_config() -> KafkaConfig {
        let mut config = KafkaConfig::default();
        config.consumer.topics = vec!["events".to_string()];
        config
    }

    #[test]
    fn test_offset_position_mapping() {
        assert_eq!(offset_position(OFFSET_NEWEST), Offset::End);
        assert_eq!(offset_position(OFFSET_OLDEST), Offset::Beginning);
        assert_eq!(offset_position(42), Offset::Offset(42));
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let shared = shared_config();
        let mut policy = shared.consumer.clone();
        policy.group_id = String::new();
        let err = GroupConsumer::new("bad", &shared, policy).unwrap_err();
        assert!(err.to_string().contains("group_id"));
    }

    #[tokio::test]
    async fn test_consumer_starts_idle() {
        let shared = shared_config();
        let consumer =
            GroupConsumer::new("orders", &shared, shared.consumer.clone()).unwrap();
        assert!(!consumer.is_running().await);
        assert_eq!(consumer.name(), "orders");
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let shared = shared_config();
        let consumer =
            GroupConsumer::new("orders", &shared, shared.consumer.clone()).unwrap();
        consumer.stop().await;
        consumer.stop().await;
        assert!(!consumer.is_running().await);
    }

    #[tokio::test]
    async fn test_offsets_by_partition() {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset("t", 0, Offset::Offset(5)).unwrap();
        tpl.add_partition_offset("t", 1, Offset::Invalid).unwrap();
        let map = offsets_by_partition(&tpl);
        assert_eq!(map.get(&0), Some(&5));
        assert_eq!(map.get(&1), Some(&-1));
    }
}
