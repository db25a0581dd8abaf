//! # Kafka Manager Module
//!
//! Owns the cluster client, the producers and the consumer registry, and
//! exposes topic/offset/consumer-group administration. Connection failures
//! are not retried here; callers own their retry strategy. Admin operations
//! open a short-lived admin client scoped to the call; `ping` and metadata
//! reads use the retained cluster client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::async_producer::AsyncProducer;
use crate::config::{ConsumerConfig, KafkaConfig, OFFSET_NEWEST, OFFSET_OLDEST};
use crate::consumer::{offsets_by_partition, GroupConsumer};
use crate::error::{KafkaError, Result};
use crate::producer::SyncProducer;

/// Hard cap on the reachability probe
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const ADMIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Description of one topic partition
#[derive(Debug, Clone, Serialize)]
pub struct PartitionInfo {
    pub id: i32,
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

/// Description of one topic
#[derive(Debug, Clone, Serialize)]
pub struct TopicInfo {
    pub name: String,
    pub partitions: Vec<PartitionInfo>,
}

/// One member of a consumer group
#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    pub member_id: String,
    pub client_id: String,
    pub client_host: String,
}

/// Description of one consumer group
#[derive(Debug, Clone, Serialize)]
pub struct ConsumerGroupInfo {
    pub group_id: String,
    pub state: String,
    pub protocol: String,
    pub protocol_type: String,
    pub members: Vec<GroupMember>,
}

struct ManagerInner {
    closed: bool,
    cluster: Option<Arc<AdminClient<DefaultClientContext>>>,
    producer: Option<Arc<SyncProducer>>,
    async_producer: Option<Arc<AsyncProducer>>,
    consumers: HashMap<String, Arc<GroupConsumer>>,
}

/// Owns the cluster client, producers and consumers built from one
/// validated configuration
pub struct KafkaManager {
    config: KafkaConfig,
    inner: RwLock<ManagerInner>,
}

impl KafkaManager {
    /// Validate the configuration and build an unconnected manager
    pub fn new(config: KafkaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            inner: RwLock::new(ManagerInner {
                closed: false,
                cluster: None,
                producer: None,
                async_producer: None,
                consumers: HashMap::new(),
            }),
        })
    }

    /// The configuration this manager was built from
    pub fn config(&self) -> &KafkaConfig {
        &self.config
    }

    /// Open the cluster client, verify broker reachability, and create the
    /// sync producer when enabled
    ///
    /// Fails with [`KafkaError::ManagerClosed`] after `close`.
    pub async fn connect(&self, ctx: CancellationToken) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(KafkaError::ManagerClosed);
        }
        if inner.cluster.is_some() {
            return Ok(());
        }

        let cluster: AdminClient<DefaultClientContext> = self
            .config
            .base_client_config()
            .create()
            .map_err(|e| KafkaError::config(format!("failed to create cluster client: {e}")))?;
        let cluster = Arc::new(cluster);

        let brokers = {
            let probe = Arc::clone(&cluster);
            let handle = tokio::task::spawn_blocking(move || {
                probe
                    .inner()
                    .fetch_metadata(None, METADATA_TIMEOUT)
                    .map(|m| m.brokers().len())
            });

            tokio::select! {
                _ = ctx.cancelled() => return Err(KafkaError::Cancelled),
                joined = handle => joined
                    .map_err(|e| KafkaError::transport(format!("metadata probe panicked: {e}")))?
                    .map_err(KafkaError::from)?,
            }
        };
        if brokers == 0 {
            return Err(KafkaError::transport("cluster reported no brokers"));
        }

        info!(
            brokers = %self.config.brokers.join(","),
            client_id = %self.config.client_id,
            "connected to cluster"
        );
        inner.cluster = Some(cluster);

        if self.config.producer.enabled {
            inner.producer = Some(Arc::new(SyncProducer::new(&self.config)?));
            debug!("sync producer created");
        }

        Ok(())
    }

    /// Probe controller reachability, bounded by min(caller deadline, 5s)
    pub async fn ping(&self, ctx: CancellationToken) -> Result<()> {
        let cluster = {
            let inner = self.inner.read().await;
            if inner.closed {
                return Err(KafkaError::ManagerClosed);
            }
            inner.cluster.clone().ok_or(KafkaError::NotConnected)?
        };

        let handle = tokio::task::spawn_blocking(move || {
            cluster
                .inner()
                .fetch_metadata(None, PING_TIMEOUT)
                .map(|_| ())
        });

        tokio::select! {
            _ = ctx.cancelled() => Err(KafkaError::Cancelled),
            joined = tokio::time::timeout(PING_TIMEOUT, handle) => match joined {
                Err(_) => Err(KafkaError::timeout("ping", PING_TIMEOUT.as_millis() as u64)),
                Ok(Err(e)) => Err(KafkaError::transport(format!("ping task failed: {e}"))),
                Ok(Ok(result)) => result.map_err(KafkaError::from),
            },
        }
    }

    /// List every topic known to the cluster
    pub async fn list_topics(&self, ctx: CancellationToken) -> Result<Vec<String>> {
        let cluster = {
            let inner = self.inner.read().await;
            if inner.closed {
                return Err(KafkaError::ManagerClosed);
            }
            inner.cluster.clone().ok_or(KafkaError::NotConnected)?
        };

        let handle = tokio::task::spawn_blocking(move || {
            let metadata = cluster.inner().fetch_metadata(None, METADATA_TIMEOUT)?;
            Ok(metadata
                .topics()
                .iter()
                .map(|t| t.name().to_string())
                .collect())
        });
        Self::race_cancel(&ctx, handle, "metadata").await
    }

    /// Create a topic with the given partition and replication counts
    pub async fn create_topic(
        &self,
        ctx: CancellationToken,
        name: &str,
        partitions: i32,
        replication: i32,
    ) -> Result<()> {
        if name.is_empty() {
            return Err(KafkaError::EmptyTopic);
        }
        self.ensure_open().await?;

        let admin = self.admin_client()?;
        let topic = NewTopic::new(name, partitions, TopicReplication::Fixed(replication));
        let options = AdminOptions::new()
            .request_timeout(Some(ADMIN_TIMEOUT))
            .operation_timeout(Some(ADMIN_TIMEOUT));

        let results = tokio::select! {
            _ = ctx.cancelled() => return Err(KafkaError::Cancelled),
            results = admin.create_topics(&[topic], &options) => results?,
        };
        for result in results {
            if let Err((topic, code)) = result {
                return Err(KafkaError::transport_for_topic(
                    format!("create failed: {code}"),
                    topic,
                ));
            }
        }
        info!(topic = %name, partitions, replication, "topic created");
        Ok(())
    }

    /// Delete a topic
    pub async fn delete_topic(&self, ctx: CancellationToken, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(KafkaError::EmptyTopic);
        }
        self.ensure_open().await?;

        let admin = self.admin_client()?;
        let options = AdminOptions::new()
            .request_timeout(Some(ADMIN_TIMEOUT))
            .operation_timeout(Some(ADMIN_TIMEOUT));

        let results = tokio::select! {
            _ = ctx.cancelled() => return Err(KafkaError::Cancelled),
            results = admin.delete_topics(&[name], &options) => results?,
        };
        for result in results {
            if let Err((topic, code)) = result {
                return Err(KafkaError::transport_for_topic(
                    format!("delete failed: {code}"),
                    topic,
                ));
            }
        }
        info!(topic = %name, "topic deleted");
        Ok(())
    }

    /// Describe a topic's partition layout
    pub async fn describe_topic(&self, ctx: CancellationToken, name: &str) -> Result<TopicInfo> {
        if name.is_empty() {
            return Err(KafkaError::EmptyTopic);
        }
        self.ensure_open().await?;

        let admin = self.admin_client()?;
        let topic = name.to_string();
        let handle = tokio::task::spawn_blocking(move || {
            let metadata = admin
                .inner()
                .fetch_metadata(Some(&topic), METADATA_TIMEOUT)?;
            let entry = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| KafkaError::TopicNotFound {
                    topic: topic.clone(),
                })?;

            if entry.partitions().is_empty() {
                return Err(KafkaError::TopicNotFound {
                    topic: topic.clone(),
                });
            }

            Ok(TopicInfo {
                name: entry.name().to_string(),
                partitions: entry
                    .partitions()
                    .iter()
                    .map(|p| PartitionInfo {
                        id: p.id(),
                        leader: p.leader(),
                        replicas: p.replicas().to_vec(),
                        isr: p.isr().to_vec(),
                    })
                    .collect(),
            })
        });
        Self::race_cancel(&ctx, handle, "metadata").await
    }

    /// List the cluster's consumer groups
    pub async fn list_consumer_groups(&self, ctx: CancellationToken) -> Result<Vec<String>> {
        self.ensure_open().await?;

        let admin = self.admin_client()?;
        let handle = tokio::task::spawn_blocking(move || {
            let groups = admin.inner().fetch_group_list(None, METADATA_TIMEOUT)?;
            Ok(groups
                .groups()
                .iter()
                .map(|g| g.name().to_string())
                .collect())
        });
        Self::race_cancel(&ctx, handle, "group list").await
    }

    /// Describe one consumer group's state and membership
    pub async fn describe_consumer_group(
        &self,
        ctx: CancellationToken,
        group_id: &str,
    ) -> Result<ConsumerGroupInfo> {
        self.ensure_open().await?;

        let admin = self.admin_client()?;
        let group = group_id.to_string();
        let handle = tokio::task::spawn_blocking(move || {
            let groups = admin
                .inner()
                .fetch_group_list(Some(&group), METADATA_TIMEOUT)?;
            let entry = groups
                .groups()
                .iter()
                .find(|g| g.name() == group)
                .ok_or_else(|| KafkaError::GroupNotFound {
                    group: group.clone(),
                })?;

            Ok(ConsumerGroupInfo {
                group_id: entry.name().to_string(),
                state: entry.state().to_string(),
                protocol: entry.protocol().to_string(),
                protocol_type: entry.protocol_type().to_string(),
                members: entry
                    .members()
                    .iter()
                    .map(|m| GroupMember {
                        member_id: m.id().to_string(),
                        client_id: m.client_id().to_string(),
                        client_host: m.client_host().to_string(),
                    })
                    .collect(),
            })
        });
        Self::race_cancel(&ctx, handle, "group describe").await
    }

    /// Rewrite a group's committed offsets on every partition of a topic
    ///
    /// `offset` is -1 for newest, -2 for oldest, or an explicit position.
    /// This is a maintenance-mode operation: it does not coordinate with a
    /// live rebalancing group.
    pub async fn reset_offset(
        &self,
        ctx: CancellationToken,
        group_id: &str,
        topic: &str,
        offset: i64,
    ) -> Result<()> {
        if topic.is_empty() {
            return Err(KafkaError::EmptyTopic);
        }
        self.ensure_open().await?;

        let mut config = self.config.base_client_config();
        config.set("group.id", group_id);
        let topic = topic.to_string();
        let group = group_id.to_string();

        let handle = tokio::task::spawn_blocking(move || {
            let consumer: BaseConsumer = config
                .create()
                .map_err(|e| KafkaError::config(format!("failed to create admin consumer: {e}")))?;

            let metadata = consumer.fetch_metadata(Some(&topic), METADATA_TIMEOUT)?;
            let entry = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| KafkaError::TopicNotFound {
                    topic: topic.clone(),
                })?;

            let mut tpl = TopicPartitionList::new();
            for partition in entry.partitions() {
                let (low, high) =
                    consumer.fetch_watermarks(&topic, partition.id(), METADATA_TIMEOUT)?;
                let target = match offset {
                    OFFSET_NEWEST => high,
                    OFFSET_OLDEST => low,
                    explicit => explicit,
                };
                tpl.add_partition_offset(&topic, partition.id(), Offset::Offset(target))?;
            }

            consumer.commit(&tpl, CommitMode::Sync)?;
            info!(group = %group, topic = %topic, offset, "group offsets reset");
            Ok(())
        });
        Self::race_cancel(&ctx, handle, "offset reset").await
    }

    /// Read a group's committed offsets for every partition of a topic
    pub async fn get_offset(
        &self,
        ctx: CancellationToken,
        group_id: &str,
        topic: &str,
    ) -> Result<HashMap<i32, i64>> {
        if topic.is_empty() {
            return Err(KafkaError::EmptyTopic);
        }
        self.ensure_open().await?;

        let mut config = self.config.base_client_config();
        config.set("group.id", group_id);
        let topic = topic.to_string();

        let handle = tokio::task::spawn_blocking(move || {
            let consumer: BaseConsumer = config
                .create()
                .map_err(|e| KafkaError::config(format!("failed to create admin consumer: {e}")))?;

            let metadata = consumer.fetch_metadata(Some(&topic), METADATA_TIMEOUT)?;
            let entry = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| KafkaError::TopicNotFound {
                    topic: topic.clone(),
                })?;

            let mut tpl = TopicPartitionList::new();
            for partition in entry.partitions() {
                tpl.add_partition(&topic, partition.id());
            }

            let committed = consumer.committed_offsets(tpl, METADATA_TIMEOUT)?;
            Ok(offsets_by_partition(&committed))
        });
        Self::race_cancel(&ctx, handle, "offset fetch").await
    }

    /// The sync producer, if connected with the producer enabled
    pub async fn producer(&self) -> Result<Arc<SyncProducer>> {
        let inner = self.inner.read().await;
        if inner.closed {
            return Err(KafkaError::ManagerClosed);
        }
        inner.producer.clone().ok_or(KafkaError::NotConnected)
    }

    /// The async producer; created lazily on first use
    pub async fn async_producer(&self) -> Result<Arc<AsyncProducer>> {
        {
            let inner = self.inner.read().await;
            if inner.closed {
                return Err(KafkaError::ManagerClosed);
            }
            if let Some(producer) = &inner.async_producer {
                return Ok(Arc::clone(producer));
            }
        }

        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(KafkaError::ManagerClosed);
        }
        if let Some(producer) = &inner.async_producer {
            return Ok(Arc::clone(producer));
        }

        let producer = Arc::new(AsyncProducer::new(&self.config)?);
        inner.async_producer = Some(Arc::clone(&producer));
        debug!("async producer created");
        Ok(producer)
    }

    /// Create and register a named consumer from a per-consumer policy
    ///
    /// The policy's auto-commit flags override the shared configuration.
    /// Duplicate names and closed managers are rejected.
    pub async fn create_consumer(
        &self,
        name: &str,
        policy: ConsumerConfig,
    ) -> Result<Arc<GroupConsumer>> {
        if name.trim().is_empty() {
            return Err(KafkaError::validation("consumer.name", "must not be empty"));
        }

        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(KafkaError::ManagerClosed);
        }
        if inner.consumers.contains_key(name) {
            return Err(KafkaError::DuplicateConsumer {
                name: name.to_string(),
            });
        }

        let consumer = Arc::new(GroupConsumer::new(name, &self.config, policy)?);
        inner.consumers.insert(name.to_string(), Arc::clone(&consumer));
        info!(consumer = %name, "consumer registered");
        Ok(consumer)
    }

    /// Look up a registered consumer
    pub async fn consumer(&self, name: &str) -> Option<Arc<GroupConsumer>> {
        self.inner.read().await.consumers.get(name).cloned()
    }

    /// Names of all registered consumers
    pub async fn consumer_names(&self) -> Vec<String> {
        self.inner.read().await.consumers.keys().cloned().collect()
    }

    /// Whether `close` has been called
    pub async fn is_closed(&self) -> bool {
        self.inner.read().await.closed
    }

    /// Tear down consumers, the async producer, the sync producer and the
    /// cluster client, in that order; errors are aggregated
    ///
    /// Idempotent: repeated calls return `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;

        let mut errors = Vec::new();

        let consumers: Vec<_> = inner.consumers.drain().collect();
        for (name, consumer) in consumers {
            consumer.stop().await;
            debug!(consumer = %name, "consumer stopped");
        }

        if let Some(async_producer) = inner.async_producer.take() {
            if let Err(e) = async_producer.close().await {
                errors.push(format!("async producer: {e}"));
            }
        }

        if let Some(producer) = inner.producer.take() {
            if let Err(e) = producer.close() {
                errors.push(format!("producer: {e}"));
            }
        }

        inner.cluster = None;
        info!("kafka manager closed");

        if errors.is_empty() {
            Ok(())
        } else {
            warn!(errors = errors.len(), "manager close completed with errors");
            Err(KafkaError::Teardown { errors })
        }
    }

    async fn ensure_open(&self) -> Result<()> {
        let inner = self.inner.read().await;
        if inner.closed {
            return Err(KafkaError::ManagerClosed);
        }
        Ok(())
    }

    /// Race an admin task against the caller's cancellation signal, the
    /// same way `ping` and `connect` bound their probes
    async fn race_cancel<T>(
        ctx: &CancellationToken,
        handle: tokio::task::JoinHandle<Result<T>>,
        operation: &str,
    ) -> Result<T> {
        tokio::select! {
            _ = ctx.cancelled() => Err(KafkaError::Cancelled),
            joined = handle => joined
                .map_err(|e| KafkaError::transport(format!("{operation} task failed: {e}")))?,
        }
    }

    fn admin_client(&self) -> Result<AdminClient<DefaultClientContext>> {
        self.config
            .base_client_config()
            .create()
            .map_err(|e| KafkaError::config(format!("failed to create admin client: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> KafkaConfig {
        let mut config = KafkaConfig::default();
        config.consumer.topics = vec!["events".to_string()];
        config
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = test_config();
        config.brokers.clear();
        assert!(KafkaManager::new(config).is_err());
    }

    #[tokio::test]
    async fn test_manager_starts_open_and_unconnected() {
        let manager = KafkaManager::new(test_config()).unwrap();
        assert!(!manager.is_closed().await);
        assert!(matches!(
            manager.producer().await,
            Err(KafkaError::NotConnected)
        ));
        assert!(manager.consumer_names().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let manager = KafkaManager::new(test_config()).unwrap();
        assert!(manager.close().await.is_ok());
        assert!(manager.close().await.is_ok());
        assert!(manager.is_closed().await);
    }

    #[tokio::test]
    async fn test_connect_after_close_rejected() {
        let manager = KafkaManager::new(test_config()).unwrap();
        manager.close().await.unwrap();
        let err = manager
            .connect(CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, KafkaError::ManagerClosed));
    }

    #[tokio::test]
    async fn test_create_consumer_rejects_duplicates() {
        let manager = KafkaManager::new(test_config()).unwrap();
        let policy = manager.config().consumer.clone();

        manager.create_consumer("worker", policy.clone()).await.unwrap();
        let err = manager
            .create_consumer("worker", policy)
            .await
            .unwrap_err();
        assert!(matches!(err, KafkaError::DuplicateConsumer { .. }));
    }

    #[tokio::test]
    async fn test_create_consumer_rejects_closed_manager() {
        let manager = KafkaManager::new(test_config()).unwrap();
        let policy = manager.config().consumer.clone();
        manager.close().await.unwrap();

        let err = manager.create_consumer("worker", policy).await.unwrap_err();
        assert!(matches!(err, KafkaError::ManagerClosed));
    }

    #[tokio::test]
    async fn test_create_consumer_rejects_invalid_policy() {
        let manager = KafkaManager::new(test_config()).unwrap();
        let mut policy = manager.config().consumer.clone();
        policy.topics = vec![];

        let err = manager.create_consumer("worker", policy).await.unwrap_err();
        assert!(matches!(err, KafkaError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_consumer_lookup() {
        let manager = KafkaManager::new(test_config()).unwrap();
        let policy = manager.config().consumer.clone();
        manager.create_consumer("worker", policy).await.unwrap();

        assert!(manager.consumer("worker").await.is_some());
        assert!(manager.consumer("absent").await.is_none());
        assert_eq!(manager.consumer_names().await, vec!["worker".to_string()]);
    }

    #[tokio::test]
    async fn test_admin_ops_reject_closed_manager() {
        let manager = KafkaManager::new(test_config()).unwrap();
        manager.close().await.unwrap();
        let ctx = CancellationToken::new();

        assert!(matches!(
            manager.list_topics(ctx.clone()).await,
            Err(KafkaError::ManagerClosed)
        ));
        assert!(matches!(
            manager.ping(ctx.clone()).await,
            Err(KafkaError::ManagerClosed)
        ));
        assert!(matches!(
            manager.create_topic(ctx, "t", 1, 1).await,
            Err(KafkaError::ManagerClosed)
        ));
    }

    #[tokio::test]
    async fn test_admin_ops_observe_cancellation() {
        let manager = KafkaManager::new(test_config()).unwrap();
        let ctx = CancellationToken::new();
        ctx.cancel();

        assert!(matches!(
            manager.create_topic(ctx.clone(), "t", 1, 1).await,
            Err(KafkaError::Cancelled)
        ));
        assert!(matches!(
            manager.delete_topic(ctx, "t").await,
            Err(KafkaError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_empty_topic_rejected_in_admin_ops() {
        let manager = KafkaManager::new(test_config()).unwrap();
        let ctx = CancellationToken::new();

        assert!(matches!(
            manager.create_topic(ctx.clone(), "", 1, 1).await,
            Err(KafkaError::EmptyTopic)
        ));
        assert!(matches!(
            manager.reset_offset(ctx.clone(), "g", "", OFFSET_NEWEST).await,
            Err(KafkaError::EmptyTopic)
        ));
        assert!(matches!(
            manager.get_offset(ctx, "g", "").await,
            Err(KafkaError::EmptyTopic)
        ));
    }
}
