//! # Lifecycle Component Module
//!
//! Adapts the Kafka manager to the host framework's component contract:
//! `init` loads and validates the `kafka` configuration subtree, `start`
//! connects, `stop` closes. The health checker is exposed once a manager
//! exists.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_shared::{Component, ComponentError, ComponentResult, ConfigLoader, HealthChecker};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::KafkaConfig;
use crate::health::KafkaHealthChecker;
use crate::manager::KafkaManager;

/// Configuration key for the Kafka subtree
pub const CONFIG_KEY: &str = "kafka";

/// Host-framework component wrapping the [`KafkaManager`]
#[derive(Default)]
pub struct KafkaComponent {
    manager: Option<Arc<KafkaManager>>,
    health: Option<Arc<KafkaHealthChecker>>,
}

impl KafkaComponent {
    pub fn new() -> Self {
        Self::default()
    }

    /// The manager, once `init` has run
    pub fn manager(&self) -> Option<Arc<KafkaManager>> {
        self.manager.clone()
    }
}

#[async_trait]
impl Component for KafkaComponent {
    fn name(&self) -> &str {
        "kafka"
    }

    fn depends_on(&self) -> Vec<String> {
        vec!["config".to_string(), "logger".to_string()]
    }

    async fn init(
        &mut self,
        _ctx: CancellationToken,
        config: &dyn ConfigLoader,
    ) -> ComponentResult<()> {
        let value = config
            .get_value(CONFIG_KEY)
            .map_err(|e| ComponentError::config("kafka", e.to_string()))?;
        let kafka_config: KafkaConfig = serde_json::from_value(value)
            .map_err(|e| ComponentError::config("kafka", e.to_string()))?;

        let manager = Arc::new(
            KafkaManager::new(kafka_config)
                .map_err(|e| ComponentError::config("kafka", e.to_string()))?,
        );
        self.health = Some(Arc::new(KafkaHealthChecker::new(Arc::clone(&manager))));
        self.manager = Some(manager);
        info!("kafka component initialized");
        Ok(())
    }

    async fn start(&mut self, ctx: CancellationToken) -> ComponentResult<()> {
        let manager = self
            .manager
            .as_ref()
            .ok_or_else(|| ComponentError::lifecycle("kafka", "start", "init has not run"))?;

        manager
            .connect(ctx)
            .await
            .map_err(|e| ComponentError::lifecycle("kafka", "start", e.to_string()))
    }

    async fn stop(&mut self, _ctx: CancellationToken) -> ComponentResult<()> {
        if let Some(manager) = &self.manager {
            manager
                .close()
                .await
                .map_err(|e| ComponentError::lifecycle("kafka", "stop", e.to_string()))?;
        }
        Ok(())
    }

    fn health_checker(&self) -> Option<Arc<dyn HealthChecker>> {
        self.health
            .clone()
            .map(|h| h as Arc<dyn HealthChecker>)
    }
}
