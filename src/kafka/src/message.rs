//! # Message Types Module
//!
//! Outbound and inbound message shapes plus translation from the wire
//! client's record types. Header maps are case-preserving string-to-string.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rdkafka::message::{BorrowedMessage, Headers, OwnedHeaders};
use rdkafka::Message;
use serde::Serialize;

use crate::error::{KafkaError, Result};

/// Header set on JSON convenience sends
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Value of [`CONTENT_TYPE_HEADER`] for JSON payloads
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Sentinel partition meaning "let the cluster assign"
pub const PARTITION_AUTO: i32 = -1;

/// A message to be produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic
    pub topic: String,

    /// Optional partitioning key
    pub key: Option<Vec<u8>>,

    /// Payload bytes
    pub value: Vec<u8>,

    /// Case-preserving header map
    pub headers: HashMap<String, String>,

    /// Target partition; [`PARTITION_AUTO`] selects automatic assignment
    pub partition: i32,

    /// Millisecond timestamp; 0 means "unset, let the broker stamp it"
    pub timestamp_ms: i64,
}

impl OutboundMessage {
    /// Build a message with a raw payload
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
            headers: HashMap::new(),
            partition: PARTITION_AUTO,
            timestamp_ms: 0,
        }
    }

    /// Build a JSON message; sets the `content-type` header
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        key: Option<&str>,
        value: &T,
    ) -> Result<Self> {
        let payload = serde_json::to_vec(value)?;
        let mut msg = Self::new(topic, payload);
        msg.key = key.map(|k| k.as_bytes().to_vec());
        msg.headers
            .insert(CONTENT_TYPE_HEADER.to_string(), CONTENT_TYPE_JSON.to_string());
        Ok(msg)
    }

    /// Set the partitioning key
    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Add one header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Pin the target partition
    pub fn with_partition(mut self, partition: i32) -> Self {
        self.partition = partition;
        self
    }

    /// Set an explicit millisecond timestamp
    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Validate send preconditions
    pub(crate) fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(KafkaError::EmptyTopic);
        }
        if self.value.is_empty() {
            return Err(KafkaError::EmptyPayload);
        }
        Ok(())
    }

    /// Assemble the wire-client header list
    pub(crate) fn wire_headers(&self) -> Option<OwnedHeaders> {
        if self.headers.is_empty() {
            return None;
        }
        let mut headers = OwnedHeaders::new_with_capacity(self.headers.len());
        for (key, value) in &self.headers {
            headers = headers.insert(rdkafka::message::Header {
                key,
                value: Some(value.as_str()),
            });
        }
        Some(headers)
    }
}

/// Result of a successful send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResult {
    /// Topic the record landed on
    pub topic: String,

    /// Server-assigned partition
    pub partition: i32,

    /// Server-assigned offset
    pub offset: i64,

    /// Local send-completion timestamp
    pub timestamp: DateTime<Utc>,
}

/// A message received from the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
    pub headers: HashMap<String, String>,

    /// Record timestamp in milliseconds; 0 when the broker reported none
    pub timestamp_ms: i64,
}

impl InboundMessage {
    /// Translate a wire-client record
    pub fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let mut headers = HashMap::new();
        if let Some(borrowed) = msg.headers() {
            for header in borrowed.iter() {
                if let Some(value) = header.value {
                    headers.insert(
                        header.key.to_string(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            value: msg.payload().map(|p| p.to_vec()).unwrap_or_default(),
            headers,
            timestamp_ms: msg.timestamp().to_millis().unwrap_or(0),
        }
    }

    /// Decode the payload as JSON
    pub fn value_json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.value).map_err(Into::into)
    }

    /// Key as UTF-8, lossy
    pub fn key_string(&self) -> Option<String> {
        self.key
            .as_ref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Order {
        id: u64,
        item: String,
    }

    #[test]
    fn test_outbound_builder() {
        let msg = OutboundMessage::new("orders", b"payload".to_vec())
            .with_key("k1")
            .with_header("trace-id", "abc")
            .with_partition(3)
            .with_timestamp_ms(1_700_000_000_000);

        assert_eq!(msg.topic, "orders");
        assert_eq!(msg.key.as_deref(), Some(b"k1".as_slice()));
        assert_eq!(msg.headers.get("trace-id").unwrap(), "abc");
        assert_eq!(msg.partition, 3);
        assert_eq!(msg.timestamp_ms, 1_700_000_000_000);
        assert!(msg.validate().is_ok());
    }

    #[test]
    fn test_json_constructor_sets_content_type() {
        let order = Order {
            id: 7,
            item: "widget".to_string(),
        };
        let msg = OutboundMessage::json("orders", Some("7"), &order).unwrap();
        assert_eq!(
            msg.headers.get(CONTENT_TYPE_HEADER).unwrap(),
            CONTENT_TYPE_JSON
        );

        let decoded: Order = serde_json::from_slice(&msg.value).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn test_validation_rejects_empty_topic_and_payload() {
        let msg = OutboundMessage::new("", b"x".to_vec());
        assert!(matches!(msg.validate(), Err(KafkaError::EmptyTopic)));

        let msg = OutboundMessage::new("orders", Vec::new());
        assert!(matches!(msg.validate(), Err(KafkaError::EmptyPayload)));
    }

    #[test]
    fn test_header_case_preserved() {
        let msg = OutboundMessage::new("t", b"v".to_vec())
            .with_header("X-Correlation-ID", "1")
            .with_header("x-correlation-id", "2");
        // Two distinct keys: case is significant.
        assert_eq!(msg.headers.len(), 2);
    }

    #[test]
    fn test_default_partition_is_auto() {
        let msg = OutboundMessage::new("t", b"v".to_vec());
        assert_eq!(msg.partition, PARTITION_AUTO);
        assert_eq!(msg.timestamp_ms, 0);
    }
}
