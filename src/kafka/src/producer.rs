//! # Synchronous Producer Module
//!
//! Blocking send contract on top of the wire client's future-based producer.
//! `send` resolves once the broker acknowledges (or rejects) the record and
//! returns the server-assigned partition and offset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::KafkaConfig;
use crate::error::{KafkaError, Result};
use crate::message::{OutboundMessage, SendResult};

/// Callback invoked by [`SyncProducer::send_detached`] with the send outcome
pub type SendCallback = Box<dyn FnOnce(Result<SendResult>) + Send + 'static>;

/// Blocking producer owned by the manager
pub struct SyncProducer {
    producer: FutureProducer,
    timeout: std::time::Duration,
    closed: AtomicBool,
}

impl SyncProducer {
    /// Create a producer from the shared configuration
    pub(crate) fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .producer_client_config()
            .create()
            .map_err(|e| KafkaError::config(format!("failed to create producer: {e}")))?;

        Ok(Self {
            producer,
            timeout: config.producer.timeout_duration(),
            closed: AtomicBool::new(false),
        })
    }

    /// Send one message and wait for the broker acknowledgment
    pub async fn send(&self, msg: &OutboundMessage) -> Result<SendResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(KafkaError::ProducerClosed);
        }
        msg.validate()?;

        let mut record = FutureRecord::to(&msg.topic).payload(&msg.value);
        if let Some(key) = &msg.key {
            record = record.key(key);
        }
        if msg.partition >= 0 {
            record = record.partition(msg.partition);
        }
        if msg.timestamp_ms != 0 {
            record = record.timestamp(msg.timestamp_ms);
        }
        if let Some(headers) = msg.wire_headers() {
            record = record.headers(headers);
        }

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                debug!(
                    topic = %msg.topic,
                    partition,
                    offset,
                    "message produced"
                );
                Ok(SendResult {
                    topic: msg.topic.clone(),
                    partition,
                    offset,
                    timestamp: Utc::now(),
                })
            }
            Err((kafka_error, _)) => {
                error!(
                    topic = %msg.topic,
                    error = %kafka_error,
                    "message production failed"
                );
                Err(KafkaError::transport_for_topic(
                    kafka_error.to_string(),
                    msg.topic.clone(),
                ))
            }
        }
    }

    /// Fire a send on a detached task; the optional callback receives the
    /// outcome
    ///
    /// A convenience over [`SyncProducer::send`], not a different wire
    /// primitive.
    pub fn send_detached(self: &Arc<Self>, msg: OutboundMessage, callback: Option<SendCallback>) {
        let producer = Arc::clone(self);
        tokio::spawn(async move {
            let result = producer.send(&msg).await;
            if let Err(err) = &result {
                warn!(topic = %msg.topic, error = %err, "detached send failed");
            }
            if let Some(cb) = callback {
                cb(result);
            }
        });
    }

    /// Serialize `value` as JSON and send it with a `content-type` header
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: Option<&str>,
        value: &T,
    ) -> Result<SendResult> {
        let msg = OutboundMessage::json(topic, key, value)?;
        self.send(&msg).await
    }

    /// Flush and close; repeated calls are no-ops
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.producer.flush(Timeout::After(self.timeout)) {
            warn!(error = %e, "producer flush on close failed");
            return Err(e.into());
        }
        Ok(())
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for SyncProducer {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KafkaConfig;

    fn test_producer() -> SyncProducer {
        // Client creation does not contact the cluster.
        SyncProducer::new(&KafkaConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_send_rejects_empty_topic() {
        let producer = test_producer();
        let msg = OutboundMessage::new("", b"x".to_vec());
        let err = producer.send(&msg).await.unwrap_err();
        assert!(matches!(err, KafkaError::EmptyTopic));
        let _ = producer.close();
    }

    #[tokio::test]
    async fn test_send_rejects_closed_producer() {
        let producer = test_producer();
        let _ = producer.close();
        assert!(producer.is_closed());

        let msg = OutboundMessage::new("orders", b"x".to_vec());
        let err = producer.send(&msg).await.unwrap_err();
        assert!(matches!(err, KafkaError::ProducerClosed));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let producer = test_producer();
        let _ = producer.close();
        let _ = producer.close();
        assert!(producer.is_closed());
    }
}
