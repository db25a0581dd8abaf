//! # Configuration Module
//!
//! Typed configuration tree for the Kafka core with platform defaults,
//! field-level validation, and assembly of the wire-client configuration.
//! Keys are snake_case and live under the `kafka` root of the merged
//! application configuration.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};

use crate::error::{KafkaError, Result};

/// Known compression codecs
pub const COMPRESSION_CODECS: &[&str] = &["none", "gzip", "snappy", "lz4", "zstd"];

/// Known rebalance strategies
pub const REBALANCE_STRATEGIES: &[&str] = &["range", "roundrobin", "sticky"];

/// Known SASL mechanisms
pub const SASL_MECHANISMS: &[&str] = &["PLAIN", "SCRAM-SHA-256", "SCRAM-SHA-512"];

/// Main configuration for the Kafka core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Broker endpoints, `host:port`
    pub brokers: Vec<String>,

    /// Broker protocol version hint, e.g. `"3.6.0"`
    pub version: String,

    /// Client identifier reported to the cluster
    pub client_id: String,

    /// Producer policy
    pub producer: ProducerConfig,

    /// Consumer policy
    pub consumer: ConsumerConfig,

    /// Optional SASL block
    pub sasl: Option<SaslConfig>,

    /// Optional TLS block
    pub tls: Option<TlsConfig>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            version: "3.6.0".to_string(),
            client_id: "conduit".to_string(),
            producer: ProducerConfig::default(),
            consumer: ConsumerConfig::default(),
            sasl: None,
            tls: None,
        }
    }
}

/// Producer policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Whether the manager creates a producer on connect
    pub enabled: bool,

    /// Acknowledgment level: -1 all, 0 none, 1 leader
    pub required_acks: i16,

    /// Send timeout in milliseconds
    pub timeout: u64,

    /// Maximum number of send retries
    pub retry_max: u32,

    /// Backoff between retries in milliseconds
    pub retry_backoff: u64,

    /// Maximum message size in bytes
    pub max_message_bytes: i64,

    /// Compression codec: none, gzip, snappy, lz4, zstd
    pub compression: String,

    /// Enable idempotent production
    pub idempotent: bool,

    /// Producer batch size in bytes
    pub batch_size: u32,

    /// Flush cadence in milliseconds
    pub flush_frequency: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            required_acks: -1,
            timeout: 10_000,
            retry_max: 3,
            retry_backoff: 100,
            max_message_bytes: 1_000_000,
            compression: "none".to_string(),
            idempotent: false,
            batch_size: 16_384,
            flush_frequency: 100,
        }
    }
}

impl ProducerConfig {
    /// Send timeout as a `Duration`
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Retry backoff as a `Duration`
    pub fn retry_backoff_duration(&self) -> Duration {
        Duration::from_millis(self.retry_backoff)
    }
}

/// Consumer policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Whether consumers may be created from this configuration
    pub enabled: bool,

    /// Consumer group identifier
    pub group_id: String,

    /// Subscribed topic set
    pub topics: Vec<String>,

    /// Initial offset policy: -1 newest, -2 oldest
    pub offset_initial: i64,

    /// Enable periodic offset auto-commit
    pub auto_commit: bool,

    /// Auto-commit interval in milliseconds
    pub auto_commit_interval: u64,

    /// Group session timeout in milliseconds
    pub session_timeout: u64,

    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,

    /// Maximum per-message processing time in milliseconds
    pub max_processing_time: u64,

    /// Minimum fetch size in bytes
    pub fetch_min: u32,

    /// Maximum fetch size in bytes
    pub fetch_max: u32,

    /// Default fetch size in bytes
    pub fetch_default: u32,

    /// Partition assignment strategy: range, roundrobin, sticky
    /// (empty defaults to range)
    pub rebalance_strategy: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group_id: "conduit-group".to_string(),
            topics: Vec::new(),
            offset_initial: OFFSET_NEWEST,
            auto_commit: true,
            auto_commit_interval: 1_000,
            session_timeout: 10_000,
            heartbeat_interval: 3_000,
            max_processing_time: 30_000,
            fetch_min: 1,
            fetch_max: 1_048_576,
            fetch_default: 524_288,
            rebalance_strategy: "range".to_string(),
        }
    }
}

/// Offset sentinel meaning "newest"
pub const OFFSET_NEWEST: i64 = -1;

/// Offset sentinel meaning "oldest"
pub const OFFSET_OLDEST: i64 = -2;

impl ConsumerConfig {
    /// Auto-commit interval as a `Duration`
    pub fn auto_commit_interval_duration(&self) -> Duration {
        Duration::from_millis(self.auto_commit_interval)
    }

    /// Session timeout as a `Duration`
    pub fn session_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.session_timeout)
    }

    /// Max per-message processing time as a `Duration`
    pub fn max_processing_time_duration(&self) -> Duration {
        Duration::from_millis(self.max_processing_time)
    }

    /// The `auto.offset.reset` value for the wire client
    pub fn auto_offset_reset(&self) -> &'static str {
        if self.offset_initial == OFFSET_OLDEST {
            "earliest"
        } else {
            "latest"
        }
    }

    /// Effective rebalance strategy, defaulting to range when unset
    pub fn effective_rebalance_strategy(&self) -> &str {
        if self.rebalance_strategy.is_empty() {
            "range"
        } else {
            &self.rebalance_strategy
        }
    }
}

/// SASL authentication block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaslConfig {
    pub enabled: bool,

    /// One of PLAIN, SCRAM-SHA-256, SCRAM-SHA-512
    pub mechanism: String,

    pub username: String,
    pub password: String,
}

impl Default for SaslConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mechanism: "PLAIN".to_string(),
            username: String::new(),
            password: String::new(),
        }
    }
}

/// TLS block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert_file: String,
    pub key_file: String,
    pub ca_file: String,
    pub insecure_skip_verify: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert_file: String::new(),
            key_file: String::new(),
            ca_file: String::new(),
            insecure_skip_verify: false,
        }
    }
}

impl KafkaConfig {
    /// Validate the whole tree; every failure names the offending field
    pub fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            return Err(KafkaError::validation("brokers", "must not be empty"));
        }
        for (i, broker) in self.brokers.iter().enumerate() {
            if broker.trim().is_empty() {
                return Err(KafkaError::Validation {
                    field: format!("brokers[{i}]"),
                    message: "must not be empty".to_string(),
                });
            }
        }

        if self.client_id.trim().is_empty() {
            return Err(KafkaError::validation("client_id", "must not be empty"));
        }

        if self.producer.enabled {
            if !matches!(self.producer.required_acks, -1 | 0 | 1) {
                return Err(KafkaError::validation(
                    "producer.required_acks",
                    "must be -1, 0 or 1",
                ));
            }
            if self.producer.max_message_bytes < 0 {
                return Err(KafkaError::validation(
                    "producer.max_message_bytes",
                    "must not be negative",
                ));
            }
            if !COMPRESSION_CODECS.contains(&self.producer.compression.as_str()) {
                return Err(KafkaError::validation(
                    "producer.compression",
                    "must be one of none, gzip, snappy, lz4, zstd",
                ));
            }
        }

        if self.consumer.enabled {
            self.consumer.validate()?;
        }

        if let Some(sasl) = &self.sasl {
            if sasl.enabled {
                if !SASL_MECHANISMS.contains(&sasl.mechanism.as_str()) {
                    return Err(KafkaError::validation(
                        "sasl.mechanism",
                        "must be one of PLAIN, SCRAM-SHA-256, SCRAM-SHA-512",
                    ));
                }
                if sasl.username.is_empty() {
                    return Err(KafkaError::validation("sasl.username", "must not be empty"));
                }
                if sasl.password.is_empty() {
                    return Err(KafkaError::validation("sasl.password", "must not be empty"));
                }
            }
        }

        Ok(())
    }

    /// Base wire-client configuration shared by producers, consumers and
    /// admin clients
    pub fn base_client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", self.brokers.join(","))
            .set("client.id", &self.client_id);

        self.apply_security(&mut cfg);
        cfg
    }

    /// Wire-client configuration for the sync and async producers
    pub fn producer_client_config(&self) -> ClientConfig {
        let mut cfg = self.base_client_config();
        let p = &self.producer;

        cfg.set("acks", acks_to_string(p.required_acks))
            .set("message.timeout.ms", p.timeout.to_string())
            .set("message.send.max.retries", p.retry_max.to_string())
            .set("retry.backoff.ms", p.retry_backoff.to_string())
            .set("message.max.bytes", p.max_message_bytes.to_string())
            .set("compression.type", &p.compression)
            .set("batch.size", p.batch_size.to_string())
            .set("linger.ms", p.flush_frequency.to_string());

        if p.idempotent {
            cfg.set("enable.idempotence", "true");
        }

        cfg
    }

    /// Wire-client configuration for a group consumer
    ///
    /// `policy` carries the per-consumer overrides; the shared tree provides
    /// brokers, client id and security.
    pub fn consumer_client_config(&self, policy: &ConsumerConfig) -> ClientConfig {
        let mut cfg = self.base_client_config();

        cfg.set("group.id", &policy.group_id)
            .set("session.timeout.ms", policy.session_timeout.to_string())
            .set(
                "heartbeat.interval.ms",
                policy.heartbeat_interval.to_string(),
            )
            .set("auto.offset.reset", policy.auto_offset_reset())
            .set("enable.auto.commit", policy.auto_commit.to_string())
            .set(
                "auto.commit.interval.ms",
                policy.auto_commit_interval.to_string(),
            )
            // Offsets are stored explicitly after each handler attempt.
            .set("enable.auto.offset.store", "false")
            .set("fetch.min.bytes", policy.fetch_min.to_string())
            .set("fetch.max.bytes", policy.fetch_max.to_string())
            .set(
                "max.partition.fetch.bytes",
                policy.fetch_default.to_string(),
            )
            .set("enable.partition.eof", "false")
            .set(
                "partition.assignment.strategy",
                rebalance_strategy_to_string(policy.effective_rebalance_strategy()),
            );

        cfg
    }

    fn apply_security(&self, cfg: &mut ClientConfig) {
        let sasl_on = self.sasl.as_ref().map(|s| s.enabled).unwrap_or(false);
        let tls_on = self.tls.as_ref().map(|t| t.enabled).unwrap_or(false);

        match (sasl_on, tls_on) {
            (true, true) => {
                cfg.set("security.protocol", "SASL_SSL");
            }
            (true, false) => {
                cfg.set("security.protocol", "SASL_PLAINTEXT");
            }
            (false, true) => {
                cfg.set("security.protocol", "SSL");
            }
            (false, false) => {}
        }

        if let Some(sasl) = &self.sasl {
            if sasl.enabled {
                cfg.set("sasl.mechanism", &sasl.mechanism)
                    .set("sasl.username", &sasl.username)
                    .set("sasl.password", &sasl.password);
            }
        }

        if let Some(tls) = &self.tls {
            if tls.enabled {
                if !tls.ca_file.is_empty() {
                    cfg.set("ssl.ca.location", &tls.ca_file);
                }
                if !tls.cert_file.is_empty() {
                    cfg.set("ssl.certificate.location", &tls.cert_file);
                }
                if !tls.key_file.is_empty() {
                    cfg.set("ssl.key.location", &tls.key_file);
                }
                if tls.insecure_skip_verify {
                    cfg.set("ssl.endpoint.identification.algorithm", "none");
                }
            }
        }
    }
}

impl ConsumerConfig {
    /// Validate the consumer policy on its own; used for per-consumer
    /// overrides as well as the shared tree
    pub fn validate(&self) -> Result<()> {
        if self.group_id.trim().is_empty() {
            return Err(KafkaError::validation(
                "consumer.group_id",
                "must not be empty",
            ));
        }
        if self.topics.is_empty() {
            return Err(KafkaError::validation(
                "consumer.topics",
                "must not be empty",
            ));
        }
        for (i, topic) in self.topics.iter().enumerate() {
            if topic.trim().is_empty() {
                return Err(KafkaError::Validation {
                    field: format!("consumer.topics[{i}]"),
                    message: "must not be empty".to_string(),
                });
            }
        }
        if !matches!(self.offset_initial, OFFSET_NEWEST | OFFSET_OLDEST) {
            return Err(KafkaError::validation(
                "consumer.offset_initial",
                "must be -1 (newest) or -2 (oldest)",
            ));
        }
        if !self.rebalance_strategy.is_empty()
            && !REBALANCE_STRATEGIES.contains(&self.rebalance_strategy.as_str())
        {
            return Err(KafkaError::validation(
                "consumer.rebalance_strategy",
                "must be one of range, roundrobin, sticky",
            ));
        }
        Ok(())
    }
}

/// Convert the acknowledgment level to the wire-client string
fn acks_to_string(acks: i16) -> &'static str {
    match acks {
        0 => "0",
        1 => "1",
        _ => "all",
    }
}

/// Convert a rebalance strategy name to the wire-client strategy
fn rebalance_strategy_to_string(strategy: &str) -> &'static str {
    match strategy {
        "roundrobin" => "roundrobin",
        "sticky" => "cooperative-sticky",
        _ => "range",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_validates() {
        let mut config = KafkaConfig::default();
        config.consumer.topics = vec!["events".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_brokers_rejected() {
        let mut config = KafkaConfig::default();
        config.brokers.clear();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("brokers"));
    }

    #[test]
    fn test_blank_broker_entry_rejected() {
        let mut config = KafkaConfig::default();
        config.brokers = vec!["localhost:9092".to_string(), "  ".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("brokers[1]"));
    }

    #[test]
    fn test_invalid_acks_rejected() {
        let mut config = KafkaConfig::default();
        config.consumer.enabled = false;
        config.producer.required_acks = 2;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("required_acks"));
    }

    #[test]
    fn test_invalid_compression_rejected() {
        let mut config = KafkaConfig::default();
        config.consumer.enabled = false;
        config.producer.compression = "brotli".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("compression"));
    }

    #[test]
    fn test_consumer_requires_group_and_topics() {
        let mut config = KafkaConfig::default();
        config.consumer.group_id = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("group_id"));

        let mut config = KafkaConfig::default();
        config.consumer.group_id = "g".to_string();
        config.consumer.topics = vec![];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("topics"));

        let mut config = KafkaConfig::default();
        config.consumer.topics = vec!["a".to_string(), "".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("topics[1]"));
    }

    #[test]
    fn test_empty_rebalance_strategy_defaults_to_range() {
        let mut config = ConsumerConfig::default();
        config.topics = vec!["events".to_string()];
        config.rebalance_strategy = String::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_rebalance_strategy(), "range");
    }

    #[test]
    fn test_unknown_rebalance_strategy_rejected() {
        let mut config = ConsumerConfig::default();
        config.topics = vec!["events".to_string()];
        config.rebalance_strategy = "random".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("rebalance_strategy"));
    }

    #[test]
    fn test_sasl_requires_credentials() {
        let mut config = KafkaConfig::default();
        config.consumer.topics = vec!["events".to_string()];
        config.sasl = Some(SaslConfig {
            enabled: true,
            mechanism: "SCRAM-SHA-256".to_string(),
            username: String::new(),
            password: String::new(),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sasl.username"));
    }

    #[test]
    fn test_sasl_unknown_mechanism_rejected() {
        let mut config = KafkaConfig::default();
        config.consumer.topics = vec!["events".to_string()];
        config.sasl = Some(SaslConfig {
            enabled: true,
            mechanism: "GSSAPI".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sasl.mechanism"));
    }

    #[test]
    fn test_offset_initial_bounds() {
        let mut config = ConsumerConfig::default();
        config.topics = vec!["events".to_string()];
        config.offset_initial = 7;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("offset_initial"));

        config.offset_initial = OFFSET_OLDEST;
        assert!(config.validate().is_ok());
        assert_eq!(config.auto_offset_reset(), "earliest");

        config.offset_initial = OFFSET_NEWEST;
        assert_eq!(config.auto_offset_reset(), "latest");
    }

    #[test]
    fn test_acks_conversion() {
        assert_eq!(acks_to_string(0), "0");
        assert_eq!(acks_to_string(1), "1");
        assert_eq!(acks_to_string(-1), "all");
    }

    #[test]
    fn test_snake_case_keys_roundtrip() {
        let json = serde_json::json!({
            "brokers": ["k1:9092", "k2:9092"],
            "version": "3.6.0",
            "client_id": "svc",
            "producer": {
                "enabled": true,
                "required_acks": 1,
                "max_message_bytes": 2048,
                "compression": "lz4"
            },
            "consumer": {
                "enabled": true,
                "group_id": "svc-group",
                "topics": ["a", "b"],
                "offset_initial": -2,
                "rebalance_strategy": "sticky"
            },
            "sasl": {
                "enabled": true,
                "mechanism": "SCRAM-SHA-512",
                "username": "u",
                "password": "p"
            }
        });

        let config: KafkaConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.brokers.len(), 2);
        assert_eq!(config.producer.required_acks, 1);
        assert_eq!(config.producer.compression, "lz4");
        assert_eq!(config.consumer.offset_initial, OFFSET_OLDEST);
        assert_eq!(config.sasl.as_ref().unwrap().mechanism, "SCRAM-SHA-512");
        assert!(config.validate().is_ok());
    }
}
