//! # Consumer Runner Module
//!
//! Composes a named handler with policy defaults and drives N parallel
//! consumer-group workers through the manager. Each worker is an independent
//! group member; partition balancing across them is the broker's job.
//! Signal handling is installed by `run` only, never by `start`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{ConsumerConfig, OFFSET_NEWEST};
use crate::consumer::{GroupConsumer, MessageHandler};
use crate::error::{KafkaError, Result};
use crate::manager::KafkaManager;
use crate::message::InboundMessage;

/// A named message handler with its topic subscriptions
///
/// Handler errors are logged and offsets are still marked (at-least-once
/// delivery, no offset regression); see [`MessageHandler`] for the contract.
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    /// Stable handler name; also the default group-id stem
    fn name(&self) -> &str;

    /// Topics this handler subscribes to
    fn topics(&self) -> Vec<String>;

    /// Handle one message
    async fn handle(&self, msg: InboundMessage) -> anyhow::Result<()>;
}

/// Runner policy; zero values fall back to the documented defaults
#[derive(Debug, Clone, Default)]
pub struct RunnerConfig {
    /// Consumer group id; defaults to `{handler}-group`
    pub group_id: Option<String>,

    /// Parallel workers; defaults to 1
    pub workers: usize,

    /// Initial offset policy; defaults to newest
    pub offset_initial: i64,

    /// Max per-message processing time in ms; defaults to 30_000
    pub max_processing_time: u64,

    /// Session timeout in ms; defaults to 10_000
    pub session_timeout: u64,

    /// Heartbeat interval in ms; defaults to 3_000
    pub heartbeat_interval: u64,

    /// Auto-commit interval in ms; defaults to 1_000
    pub commit_interval: u64,
}

impl RunnerConfig {
    /// Resolve the effective consumer policy for `handler`
    pub fn resolve(&self, handler: &dyn ConsumerHandler) -> ConsumerConfig {
        let mut policy = ConsumerConfig::default();
        policy.enabled = true;
        policy.group_id = self
            .group_id
            .clone()
            .unwrap_or_else(|| format!("{}-group", handler.name()));
        policy.topics = handler.topics();
        policy.offset_initial = if self.offset_initial == 0 {
            OFFSET_NEWEST
        } else {
            self.offset_initial
        };
        policy.auto_commit = true;
        policy.auto_commit_interval = if self.commit_interval == 0 {
            1_000
        } else {
            self.commit_interval
        };
        policy.session_timeout = if self.session_timeout == 0 {
            10_000
        } else {
            self.session_timeout
        };
        policy.heartbeat_interval = if self.heartbeat_interval == 0 {
            3_000
        } else {
            self.heartbeat_interval
        };
        policy.max_processing_time = if self.max_processing_time == 0 {
            30_000
        } else {
            self.max_processing_time
        };
        policy
    }

    /// Effective worker count
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            1
        } else {
            self.workers
        }
    }
}

/// Bridges a [`ConsumerHandler`] into the per-message handler the consumer
/// loop expects
struct InboundHandlerAdapter(Arc<dyn ConsumerHandler>);

#[async_trait]
impl MessageHandler for InboundHandlerAdapter {
    async fn handle(&self, msg: InboundMessage) -> anyhow::Result<()> {
        self.0.handle(msg).await
    }
}

/// Drives one handler across N consumer-group workers
pub struct ConsumerRunner {
    manager: Arc<KafkaManager>,
    handler: Arc<dyn ConsumerHandler>,
    config: RunnerConfig,
    cancel: CancellationToken,
    consumers: tokio::sync::Mutex<Vec<Arc<GroupConsumer>>>,
}

impl ConsumerRunner {
    pub fn new(
        manager: Arc<KafkaManager>,
        handler: Arc<dyn ConsumerHandler>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            manager,
            handler,
            config,
            cancel: CancellationToken::new(),
            consumers: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Provision and start every worker; does not block and does not install
    /// signal handlers
    pub async fn start(&self) -> Result<()> {
        let mut consumers = self.consumers.lock().await;
        if !consumers.is_empty() {
            return Err(KafkaError::ConsumerAlreadyRunning {
                name: self.handler.name().to_string(),
            });
        }

        let policy = self.config.resolve(self.handler.as_ref());
        let workers = self.config.effective_workers();
        info!(
            handler = %self.handler.name(),
            workers,
            group = %policy.group_id,
            "starting consumer runner"
        );

        for i in 0..workers {
            let worker_name = format!("{}-worker-{i}", self.handler.name());
            let consumer = self
                .manager
                .create_consumer(&worker_name, policy.clone())
                .await?;

            let adapter: Arc<dyn MessageHandler> =
                Arc::new(InboundHandlerAdapter(Arc::clone(&self.handler)));
            consumer.start(self.cancel.child_token(), adapter).await?;
            consumers.push(consumer);
        }

        Ok(())
    }

    /// Start, install SIGINT/SIGTERM handling, and block until shutdown
    pub async fn run(&self) -> Result<()> {
        self.start().await?;
        self.wait_for_shutdown().await?;
        self.stop().await;
        Ok(())
    }

    #[cfg(unix)]
    async fn wait_for_shutdown(&self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| KafkaError::config(format!("failed to install SIGINT handler: {e}")))?;
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| KafkaError::config(format!("failed to install SIGTERM handler: {e}")))?;

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = self.cancel.cancelled() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    async fn wait_for_shutdown(&self) -> Result<()> {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
            _ = self.cancel.cancelled() => {}
        }
        Ok(())
    }

    /// Cancel the internal context, stop every worker and wait for them
    pub async fn stop(&self) {
        self.cancel.cancel();
        let mut consumers = self.consumers.lock().await;
        for consumer in consumers.iter() {
            consumer.stop().await;
            if consumer.is_running().await {
                warn!(consumer = %consumer.name(), "worker still running after stop");
            }
        }
        consumers.clear();
        info!(handler = %self.handler.name(), "consumer runner stopped");
    }

    /// Number of live workers
    pub async fn worker_count(&self) -> usize {
        self.consumers.lock().await.len()
    }
}

/// Maps handler names to handlers for composition at wiring time
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ConsumerHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; empty names and duplicates are rejected
    pub fn register(&self, handler: Arc<dyn ConsumerHandler>) -> Result<()> {
        let name = handler.name().to_string();
        if name.trim().is_empty() {
            return Err(KafkaError::validation(
                "handler.name".to_string(),
                "must not be empty".to_string(),
            ));
        }

        let mut handlers = self.handlers.write();
        if handlers.contains_key(&name) {
            return Err(KafkaError::DuplicateConsumer { name });
        }
        handlers.insert(name, handler);
        Ok(())
    }

    /// Register a handler, panicking on error; for static wiring at startup
    pub fn must_register(&self, handler: Arc<dyn ConsumerHandler>) {
        if let Err(e) = self.register(handler) {
            error!(error = %e, "handler registration failed");
            panic!("handler registration failed: {e}");
        }
    }

    /// Look up a handler by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ConsumerHandler>> {
        self.handlers.read().get(name).cloned()
    }

    /// All registered handlers
    pub fn all(&self) -> Vec<Arc<dyn ConsumerHandler>> {
        self.handlers.read().values().cloned().collect()
    }

    /// All registered names
    pub fn names(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// Number of registered handlers
    pub fn count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Remove a handler by name; returns it if present
    pub fn unregister(&self, name: &str) -> Option<Arc<dyn ConsumerHandler>> {
        self.handlers.write().remove(name)
    }
}
