//! # Lifecycle Component Module
//!
//! Adapts the limiter manager to the host framework's component contract.
//! The redis store rides a shared connection owned by the host's cache
//! component, so a redis-backed limiter is constructed with
//! [`RateLimitComponent::with_redis_store`] and declares that dependency.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_shared::{Component, ComponentError, ComponentResult, ConfigLoader};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::RateLimitConfig;
use crate::manager::RateLimitManager;
use crate::store::Store;

/// Configuration key for the limiter subtree
pub const CONFIG_KEY: &str = "ratelimit";

/// Host-framework component wrapping the [`RateLimitManager`]
#[derive(Default)]
pub struct RateLimitComponent {
    injected_store: Option<Arc<dyn Store>>,
    manager: Option<Arc<RateLimitManager>>,
}

impl RateLimitComponent {
    /// Component for a memory-backed limiter
    pub fn new() -> Self {
        Self::default()
    }

    /// Component for a remote-backed limiter; `store` wraps the shared
    /// connection registered by the host's cache component
    pub fn with_redis_store(store: Arc<dyn Store>) -> Self {
        Self {
            injected_store: Some(store),
            manager: None,
        }
    }

    /// The manager, once `init` has run
    pub fn manager(&self) -> Option<Arc<RateLimitManager>> {
        self.manager.clone()
    }
}

#[async_trait]
impl Component for RateLimitComponent {
    fn name(&self) -> &str {
        "ratelimit"
    }

    fn depends_on(&self) -> Vec<String> {
        let mut deps = vec!["config".to_string(), "logger".to_string()];
        if self.injected_store.is_some() {
            deps.push("redis".to_string());
        }
        deps
    }

    async fn init(
        &mut self,
        _ctx: CancellationToken,
        config: &dyn ConfigLoader,
    ) -> ComponentResult<()> {
        let value = config
            .get_value(CONFIG_KEY)
            .map_err(|e| ComponentError::config("ratelimit", e.to_string()))?;
        let limit_config: RateLimitConfig = serde_json::from_value(value)
            .map_err(|e| ComponentError::config("ratelimit", e.to_string()))?;

        if limit_config.enabled
            && limit_config.store_type == "redis"
            && self.injected_store.is_none()
        {
            return Err(ComponentError::dependency("ratelimit", "redis"));
        }

        let manager = match &self.injected_store {
            Some(store) => RateLimitManager::with_store(limit_config, Arc::clone(store)),
            None => RateLimitManager::new(limit_config),
        }
        .map_err(|e| ComponentError::config("ratelimit", e.to_string()))?;

        self.manager = Some(Arc::new(manager));
        info!("ratelimit component initialized");
        Ok(())
    }

    async fn start(&mut self, _ctx: CancellationToken) -> ComponentResult<()> {
        // Resources materialize lazily; nothing to warm up.
        Ok(())
    }

    async fn stop(&mut self, _ctx: CancellationToken) -> ComponentResult<()> {
        if let Some(manager) = &self.manager {
            manager
                .close()
                .await
                .map_err(|e| ComponentError::lifecycle("ratelimit", "stop", e.to_string()))?;
        }
        Ok(())
    }
}
