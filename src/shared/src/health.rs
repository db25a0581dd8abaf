//! Health probing interfaces shared across components

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Coarse health state reported by a component probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Snapshot of one component's health as reported to the host's endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub response_time_ms: u64,
    pub details: HashMap<String, String>,
}

impl ComponentHealth {
    pub fn healthy(component: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            last_check: Utc::now(),
            response_time_ms,
            details: HashMap::new(),
        }
    }

    pub fn unhealthy(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            last_check: Utc::now(),
            response_time_ms: 0,
            details: [("error".to_string(), error.into())].into(),
        }
    }
}

/// A timeout-bounded reachability probe owned by a component
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Stable probe identifier (e.g. `"kafka"`)
    fn name(&self) -> &str;

    /// Probe the backing resource; `Ok(())` means reachable
    async fn check(&self, ctx: CancellationToken) -> anyhow::Result<()>;
}
