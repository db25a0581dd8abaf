//! # Event Bus Module
//!
//! Typed limiter events fanned out from one buffered channel by a single
//! dispatch task. Publishing never blocks the hot path: a saturated buffer
//! silently drops the event. Listener panics are recovered so one bad
//! listener cannot poison the bus.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{RateLimitError, Result};

/// Event variants emitted by the limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Allowed,
    Rejected,
    WaitStart,
    WaitSuccess,
    WaitTimeout,
    LimitChanged,
}

/// One limiter event
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitEvent {
    pub kind: EventKind,
    pub resource: String,
    pub timestamp: DateTime<Utc>,

    /// Free-form request context (caller identity, path, ...)
    pub context: HashMap<String, String>,

    /// Remaining quota at decision time
    pub remaining: Option<i64>,

    /// Limit in force at decision time
    pub limit: Option<i64>,

    /// Suggested delay before retrying
    pub retry_after: Option<Duration>,

    /// Rejection reason
    pub reason: Option<String>,

    /// Time spent inside `wait`
    pub elapsed: Option<Duration>,

    /// Limit before an adaptive adjustment
    pub old_limit: Option<i64>,

    /// Limit after an adaptive adjustment
    pub new_limit: Option<i64>,
}

impl RateLimitEvent {
    fn base(kind: EventKind, resource: &str) -> Self {
        Self {
            kind,
            resource: resource.to_string(),
            timestamp: Utc::now(),
            context: HashMap::new(),
            remaining: None,
            limit: None,
            retry_after: None,
            reason: None,
            elapsed: None,
            old_limit: None,
            new_limit: None,
        }
    }

    pub fn allowed(resource: &str, remaining: i64, limit: i64) -> Self {
        let mut event = Self::base(EventKind::Allowed, resource);
        event.remaining = Some(remaining);
        event.limit = Some(limit);
        event
    }

    pub fn rejected(resource: &str, retry_after: Duration, reason: impl Into<String>) -> Self {
        let mut event = Self::base(EventKind::Rejected, resource);
        event.retry_after = Some(retry_after);
        event.reason = Some(reason.into());
        event
    }

    pub fn wait_start(resource: &str) -> Self {
        Self::base(EventKind::WaitStart, resource)
    }

    pub fn wait_success(resource: &str, elapsed: Duration) -> Self {
        let mut event = Self::base(EventKind::WaitSuccess, resource);
        event.elapsed = Some(elapsed);
        event
    }

    pub fn wait_timeout(resource: &str, elapsed: Duration) -> Self {
        let mut event = Self::base(EventKind::WaitTimeout, resource);
        event.elapsed = Some(elapsed);
        event
    }

    pub fn limit_changed(resource: &str, old_limit: i64, new_limit: i64) -> Self {
        let mut event = Self::base(EventKind::LimitChanged, resource);
        event.old_limit = Some(old_limit);
        event.new_limit = Some(new_limit);
        event
    }

    /// Attach one context entry
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Listener callback invoked for every dispatched event
pub type Listener = Box<dyn Fn(&RateLimitEvent) + Send + Sync>;

/// Single-producer buffered fan-out bus
pub struct EventBus {
    tx: Mutex<Option<mpsc::Sender<RateLimitEvent>>>,
    listeners: Arc<RwLock<Vec<Listener>>>,
    closed: AtomicBool,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl EventBus {
    /// Create a bus with the given buffer capacity
    pub fn new(buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<RateLimitEvent>(buffer.max(1));
        let listeners: Arc<RwLock<Vec<Listener>>> = Arc::new(RwLock::new(Vec::new()));

        let dispatch_listeners = Arc::clone(&listeners);
        let dispatch = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let listeners = dispatch_listeners.read();
                for listener in listeners.iter() {
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(&event)));
                    if result.is_err() {
                        warn!(
                            kind = ?event.kind,
                            resource = %event.resource,
                            "event listener panicked"
                        );
                    }
                }
            }
            debug!("event bus dispatch stopped");
        });

        Self {
            tx: Mutex::new(Some(tx)),
            listeners,
            closed: AtomicBool::new(false),
            dispatch: Mutex::new(Some(dispatch)),
        }
    }

    /// Publish without blocking; a full buffer drops the event
    pub fn publish(&self, event: RateLimitEvent) {
        let tx = self.tx.lock();
        if let Some(tx) = tx.as_ref() {
            let _ = tx.try_send(event);
        }
    }

    /// Register a listener; refused once the bus is closed
    pub fn subscribe(&self, listener: Listener) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RateLimitError::store("event bus is closed"));
        }
        self.listeners.write().push(listener);
        Ok(())
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Close the channel and wait for the dispatch task; repeated calls are
    /// no-ops
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.tx.lock().take();
        let handle = self.dispatch.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
