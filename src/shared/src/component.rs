//! Component lifecycle contract
//!
//! The host framework instantiates components, resolves their dependency
//! graph from [`Component::depends_on`], and calls the lifecycle hooks in
//! order: `init` (configuration), `start` (background work), `stop`
//! (teardown). Components must tolerate `stop` without a prior `start` and
//! repeated `stop` calls.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config_loader::ConfigLoader;
use crate::health::HealthChecker;

/// Errors surfaced by component lifecycle hooks
#[derive(Error, Debug)]
pub enum ComponentError {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error in component {component}: {message}")]
    Config { component: String, message: String },

    /// A declared dependency is missing or unhealthy
    #[error("Dependency error in component {component}: missing {dependency}")]
    Dependency {
        component: String,
        dependency: String,
    },

    /// A lifecycle transition failed
    #[error("Lifecycle error in component {component} during {phase}: {message}")]
    Lifecycle {
        component: String,
        phase: String,
        message: String,
    },
}

impl ComponentError {
    pub fn config(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn dependency(component: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::Dependency {
            component: component.into(),
            dependency: dependency.into(),
        }
    }

    pub fn lifecycle(
        component: impl Into<String>,
        phase: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Lifecycle {
            component: component.into(),
            phase: phase.into(),
            message: message.into(),
        }
    }
}

/// Result type for component lifecycle hooks
pub type ComponentResult<T> = std::result::Result<T, ComponentError>;

/// Lifecycle contract implemented by platform components
///
/// The cancellation token passed to each hook is owned by the host; it fires
/// when the process is shutting down, so long-running hooks should select
/// against it.
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable component identifier used for registry lookup and dependency
    /// resolution
    fn name(&self) -> &str;

    /// Names of components that must be initialized before this one
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// Load and validate configuration; no background work yet
    async fn init(
        &mut self,
        ctx: CancellationToken,
        config: &dyn ConfigLoader,
    ) -> ComponentResult<()>;

    /// Open connections and spawn background tasks
    async fn start(&mut self, ctx: CancellationToken) -> ComponentResult<()>;

    /// Tear down; must be idempotent
    async fn stop(&mut self, ctx: CancellationToken) -> ComponentResult<()>;

    /// Optional health probe exposed to the host's health endpoint
    fn health_checker(&self) -> Option<Arc<dyn HealthChecker>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_error_display() {
        let err = ComponentError::config("kafka", "brokers must not be empty");
        assert!(err.to_string().contains("kafka"));
        assert!(err.to_string().contains("brokers"));

        let err = ComponentError::dependency("ratelimit", "redis");
        assert!(err.to_string().contains("missing redis"));

        let err = ComponentError::lifecycle("kafka", "start", "connect failed");
        assert!(err.to_string().contains("during start"));
    }
}
