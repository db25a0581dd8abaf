//! # Asynchronous Producer Module
//!
//! Non-blocking ingress over the wire client's threaded producer. Delivery
//! reports flow from the client's callback thread through one multiplexer
//! task into two bounded notification channels (successes and errors). When
//! a channel is saturated the notification is dropped with a warning; the
//! record itself is never dropped — durability is the broker's contract.
//!
//! Each outbound record carries a correlation token as its delivery opaque,
//! so `send` awaits the report belonging to its own record rather than
//! whichever report arrives first. The notification channels remain a
//! fan-out surface for observers that do not hold the originating call.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use rdkafka::message::Message;
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::util::Timeout;
use rdkafka::ClientContext;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::KafkaConfig;
use crate::error::{KafkaError, Result};
use crate::message::{OutboundMessage, SendResult};

/// Capacity of the success and error notification channels
pub const NOTIFICATION_CHANNEL_CAPACITY: usize = 100;

/// A failed delivery as observed on the error channel
#[derive(Debug, Clone)]
pub struct AsyncSendFailure {
    pub topic: String,
    pub partition: i32,
    pub message: String,
}

/// Callback invoked by [`AsyncProducer::send_detached`] with the outcome
pub type AsyncSendCallback = Box<dyn FnOnce(Result<SendResult>) + Send + 'static>;

struct DeliveryOutcome {
    token: u64,
    result: std::result::Result<SendResult, AsyncSendFailure>,
}

/// Producer context that forwards delivery reports off the client thread
struct DeliveryContext {
    outcomes: mpsc::UnboundedSender<DeliveryOutcome>,
}

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = Box<u64>;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, delivery_opaque: Self::DeliveryOpaque) {
        let outcome = match delivery_result {
            Ok(msg) => DeliveryOutcome {
                token: *delivery_opaque,
                result: Ok(SendResult {
                    topic: msg.topic().to_string(),
                    partition: msg.partition(),
                    offset: msg.offset(),
                    timestamp: Utc::now(),
                }),
            },
            Err((err, msg)) => DeliveryOutcome {
                token: *delivery_opaque,
                result: Err(AsyncSendFailure {
                    topic: msg.topic().to_string(),
                    partition: msg.partition(),
                    message: err.to_string(),
                }),
            },
        };
        // The multiplexer may already be gone during teardown.
        let _ = self.outcomes.send(outcome);
    }
}

type WireProducer = ThreadedProducer<DeliveryContext>;

/// Non-blocking producer with bounded delivery-report fan-out
pub struct AsyncProducer {
    producer: RwLock<Option<WireProducer>>,
    waiters: Arc<DashMap<u64, oneshot::Sender<Result<SendResult>>>>,
    next_token: AtomicU64,
    success_rx: Mutex<mpsc::Receiver<SendResult>>,
    error_rx: Mutex<mpsc::Receiver<AsyncSendFailure>>,
    stop: CancellationToken,
    mux_handle: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    flush_timeout: Duration,
}

impl AsyncProducer {
    /// Create the producer and spawn its multiplexer task
    pub(crate) fn new(config: &KafkaConfig) -> Result<Self> {
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel::<DeliveryOutcome>();
        let (success_tx, success_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(NOTIFICATION_CHANNEL_CAPACITY);

        let producer: WireProducer = config
            .producer_client_config()
            .create_with_context(DeliveryContext {
                outcomes: outcome_tx,
            })
            .map_err(|e| KafkaError::config(format!("failed to create async producer: {e}")))?;

        let waiters: Arc<DashMap<u64, oneshot::Sender<Result<SendResult>>>> =
            Arc::new(DashMap::new());
        let stop = CancellationToken::new();

        let mux_waiters = Arc::clone(&waiters);
        let mux_stop = stop.clone();
        let mux_handle = tokio::spawn(async move {
            loop {
                let outcome = tokio::select! {
                    _ = mux_stop.cancelled() => break,
                    outcome = outcome_rx.recv() => match outcome {
                        Some(outcome) => outcome,
                        None => break,
                    },
                };

                let for_waiter = match &outcome.result {
                    Ok(result) => Ok(result.clone()),
                    Err(failure) => Err(KafkaError::Transport {
                        message: failure.message.clone(),
                        topic: Some(failure.topic.clone()),
                        partition: Some(failure.partition),
                        offset: None,
                    }),
                };
                if let Some((_, waiter)) = mux_waiters.remove(&outcome.token) {
                    let _ = waiter.send(for_waiter);
                }

                match outcome.result {
                    Ok(result) => {
                        if let Err(mpsc::error::TrySendError::Full(dropped)) =
                            success_tx.try_send(result)
                        {
                            warn!(
                                topic = %dropped.topic,
                                partition = dropped.partition,
                                offset = dropped.offset,
                                "success channel full, dropping delivery notification"
                            );
                        }
                    }
                    Err(failure) => {
                        if let Err(mpsc::error::TrySendError::Full(dropped)) =
                            error_tx.try_send(failure)
                        {
                            warn!(
                                topic = %dropped.topic,
                                partition = dropped.partition,
                                "error channel full, dropping delivery notification"
                            );
                        }
                    }
                }
            }
            debug!("async producer multiplexer stopped");
        });

        Ok(Self {
            producer: RwLock::new(Some(producer)),
            waiters,
            next_token: AtomicU64::new(1),
            success_rx: Mutex::new(success_rx),
            error_rx: Mutex::new(error_rx),
            stop,
            mux_handle: Mutex::new(Some(mux_handle)),
            closed: AtomicBool::new(false),
            flush_timeout: config.producer.timeout_duration(),
        })
    }

    /// Enqueue one message and await its own delivery report
    ///
    /// Cancelling `ctx` abandons the wait (the record stays enqueued; its
    /// report still reaches the notification channels).
    pub async fn send(&self, ctx: &CancellationToken, msg: &OutboundMessage) -> Result<SendResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(KafkaError::ProducerClosed);
        }
        msg.validate()?;

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(token, tx);

        if let Err(err) = self.enqueue(msg, token) {
            self.waiters.remove(&token);
            return Err(err);
        }

        tokio::select! {
            _ = ctx.cancelled() => {
                self.waiters.remove(&token);
                Err(KafkaError::Cancelled)
            }
            result = rx => result.unwrap_or_else(|_| {
                Err(KafkaError::transport("delivery report channel closed"))
            }),
        }
    }

    /// Enqueue one message; the optional callback observes the report
    pub fn send_detached(
        self: &Arc<Self>,
        msg: OutboundMessage,
        callback: Option<AsyncSendCallback>,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(KafkaError::ProducerClosed);
        }
        msg.validate()?;

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        if let Some(cb) = callback {
            let (tx, rx) = oneshot::channel();
            self.waiters.insert(token, tx);
            let waiters = Arc::clone(&self.waiters);
            tokio::spawn(async move {
                let result = rx.await.unwrap_or_else(|_| {
                    Err(KafkaError::transport("delivery report channel closed"))
                });
                // Entry is already removed on delivery; this covers teardown.
                waiters.remove(&token);
                cb(result);
            });
        }

        if let Err(err) = self.enqueue(&msg, token) {
            self.waiters.remove(&token);
            return Err(err);
        }
        Ok(())
    }

    /// Receive the next success notification
    ///
    /// Returns `None` once the producer is closed and the channel drained.
    pub async fn next_success(&self) -> Option<SendResult> {
        self.success_rx.lock().await.recv().await
    }

    /// Receive the next error notification
    pub async fn next_error(&self) -> Option<AsyncSendFailure> {
        self.error_rx.lock().await.recv().await
    }

    fn enqueue(&self, msg: &OutboundMessage, token: u64) -> Result<()> {
        let guard = self.producer.read();
        let producer = guard.as_ref().ok_or(KafkaError::ProducerClosed)?;

        let mut record: BaseRecord<'_, Vec<u8>, Vec<u8>, Box<u64>> =
            BaseRecord::with_opaque_to(&msg.topic, Box::new(token)).payload(&msg.value);
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

        producer.send(record).map_err(|(err, _)| {
            KafkaError::transport_for_topic(err.to_string(), msg.topic.clone())
        })
    }

    /// Flush outstanding records, stop the multiplexer and drop the wire
    /// producer; repeated calls are no-ops
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut flush_result = Ok(());
        if let Some(producer) = self.producer.write().take() {
            if let Err(e) = producer.flush(Timeout::After(self.flush_timeout)) {
                warn!(error = %e, "async producer flush on close failed");
                flush_result = Err(e.into());
            }
            drop(producer);
        }

        self.stop.cancel();
        if let Some(handle) = self.mux_handle.lock().await.take() {
            let _ = handle.await;
        }
        self.waiters.clear();
        flush_result
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
