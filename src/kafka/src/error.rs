//! # Error Handling Module
//!
//! Error types for the Kafka integration core. Errors carry enough context
//! (topic, partition, offset, field names) for callers to log and decide on
//! retries; the core itself never retries transport failures.

use thiserror::Error;

/// Main error type for the Kafka integration core
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Configuration could not be assembled
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A configuration field failed validation
    #[error("Validation error: field {field}: {message}")]
    Validation { field: String, message: String },

    /// Operation attempted on a manager that was already closed
    #[error("kafka manager is closed")]
    ManagerClosed,

    /// Operation attempted before `connect`
    #[error("kafka manager is not connected")]
    NotConnected,

    /// Send attempted on a producer that was already closed
    #[error("producer is closed")]
    ProducerClosed,

    /// A consumer with the same name is already registered
    #[error("consumer already exists: {name}")]
    DuplicateConsumer { name: String },

    /// `start` called on a consumer that is already running
    #[error("consumer already running: {name}")]
    ConsumerAlreadyRunning { name: String },

    /// Outbound message has no topic
    #[error("message topic must not be empty")]
    EmptyTopic,

    /// Outbound message has no payload
    #[error("message payload must not be empty")]
    EmptyPayload,

    /// Broker or transport failure, wrapped from the wire client
    #[error("Kafka transport error{}: {message}", topic.as_deref().map(|t| format!(" (topic {t})")).unwrap_or_default())]
    Transport {
        message: String,
        topic: Option<String>,
        partition: Option<i32>,
        offset: Option<i64>,
    },

    /// Topic lookup found nothing
    #[error("topic not found: {topic}")]
    TopicNotFound { topic: String },

    /// Consumer group lookup found nothing
    #[error("consumer group not found: {group}")]
    GroupNotFound { group: String },

    /// An operation exceeded its deadline
    #[error("Timeout during {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// The caller's cancellation signal fired before completion
    #[error("operation cancelled")]
    Cancelled,

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// SCRAM conversation failure
    #[error("SCRAM error: {message}")]
    Scram { message: String },

    /// Aggregated teardown failures from `close`
    #[error("close completed with {} error(s): {}", errors.len(), errors.join("; "))]
    Teardown { errors: Vec<String> },
}

impl KafkaError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a transport error without positional context
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
            topic: None,
            partition: None,
            offset: None,
        }
    }

    /// Create a transport error scoped to a topic
    pub fn transport_for_topic<S: Into<String>>(message: S, topic: S) -> Self {
        Self::Transport {
            message: message.into(),
            topic: Some(topic.into()),
            partition: None,
            offset: None,
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a SCRAM error
    pub fn scram<S: Into<String>>(message: S) -> Self {
        Self::Scram {
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KafkaError::Transport { .. } | KafkaError::Timeout { .. }
        )
    }

    /// Error category for metrics and log grouping
    pub fn category(&self) -> &'static str {
        match self {
            KafkaError::Config { .. } => "config",
            KafkaError::Validation { .. } => "validation",
            KafkaError::ManagerClosed => "closed",
            KafkaError::NotConnected => "not_connected",
            KafkaError::ProducerClosed => "closed",
            KafkaError::DuplicateConsumer { .. } => "precondition",
            KafkaError::ConsumerAlreadyRunning { .. } => "precondition",
            KafkaError::EmptyTopic => "precondition",
            KafkaError::EmptyPayload => "precondition",
            KafkaError::Transport { .. } => "transport",
            KafkaError::TopicNotFound { .. } => "not_found",
            KafkaError::GroupNotFound { .. } => "not_found",
            KafkaError::Timeout { .. } => "timeout",
            KafkaError::Cancelled => "cancelled",
            KafkaError::Serialization { .. } => "serialization",
            KafkaError::Scram { .. } => "auth",
            KafkaError::Teardown { .. } => "teardown",
        }
    }
}

/// Result type for Kafka core operations
pub type Result<T> = std::result::Result<T, KafkaError>;

impl From<rdkafka::error::KafkaError> for KafkaError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        KafkaError::Transport {
            message: err.to_string(),
            topic: None,
            partition: None,
            offset: None,
        }
    }
}

impl From<serde_json::Error> for KafkaError {
    fn from(err: serde_json::Error) -> Self {
        KafkaError::Serialization {
            message: err.to_string(),
        }
    }
}
