//! # Conduit Kafka Core
//!
//! Kafka integration core for the Conduit platform:
//! - Validated configuration trees with platform defaults
//! - A manager owning the cluster client, producers and consumer registry
//! - Synchronous and asynchronous producer contracts
//! - Consumer-group session handling with at-least-once dispatch
//! - A runner multiplexing N parallel workers under one handler
//! - Topic, offset and consumer-group administration
//! - SASL SCRAM-SHA-256/512 client conversation
//! - A timeout-bounded health probe and host lifecycle component
//!
//! The broker protocol itself is the wire client's job; this crate owns
//! lifecycle, ordering and failure semantics on top of it.

pub mod async_producer;
pub mod component;
pub mod config;
pub mod consumer;
pub mod error;
pub mod health;
pub mod manager;
pub mod message;
pub mod producer;
pub mod runner;
pub mod scram;

pub use async_producer::{AsyncProducer, AsyncSendFailure, NOTIFICATION_CHANNEL_CAPACITY};
pub use component::KafkaComponent;
pub use config::{ConsumerConfig, KafkaConfig, ProducerConfig, SaslConfig, TlsConfig};
pub use consumer::{FnMessageHandler, GroupConsumer, MessageHandler, SimpleConsumer};
pub use error::{KafkaError, Result};
pub use health::KafkaHealthChecker;
pub use manager::{ConsumerGroupInfo, KafkaManager, TopicInfo};
pub use message::{InboundMessage, OutboundMessage, SendResult};
pub use producer::SyncProducer;
pub use runner::{ConsumerHandler, ConsumerRunner, HandlerRegistry, RunnerConfig};
pub use scram::{ScramClient, ScramConversation, ScramMechanism};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
