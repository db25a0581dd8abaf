//! Adaptive algorithm
//!
//! Wraps a token bucket whose refill rate is recomputed at most once per
//! adjust interval from an injected load signal. Load above 1.2x the target
//! shrinks the limit by 10% (floored at `min_limit`); load below 0.8x grows
//! it by 10% (capped at `max_limit`). Without a provider the limit falls
//! back to `max_limit`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::algorithm::{Algorithm, CurrentUsage, Decision, TokenBucketLimiter};
use crate::config::ResourcePolicy;
use crate::error::Result;
use crate::event::{EventBus, RateLimitEvent};
use crate::store::Store;

/// Fallback adjust cadence when the policy leaves it unset
const DEFAULT_ADJUST_INTERVAL: Duration = Duration::from_secs(10);

/// Source of load signals for adaptive adjustment
///
/// Fractions are normalized to 0..1 (system load is divided by core count
/// by the provider). `None` means the signal is unavailable.
pub trait LoadProvider: Send + Sync {
    fn cpu_usage(&self) -> Option<f64>;
    fn memory_usage(&self) -> Option<f64>;
    fn system_load(&self) -> Option<f64>;
}

/// Load provider reading the host's load average
///
/// CPU and memory sampling need platform integration the core does not
/// carry; this provider serves the system-load target only.
#[derive(Default)]
pub struct SystemLoadProvider;

impl SystemLoadProvider {
    pub fn new() -> Self {
        Self
    }
}

impl LoadProvider for SystemLoadProvider {
    fn cpu_usage(&self) -> Option<f64> {
        None
    }

    fn memory_usage(&self) -> Option<f64> {
        None
    }

    fn system_load(&self) -> Option<f64> {
        let contents = std::fs::read_to_string("/proc/loadavg").ok()?;
        let one_minute: f64 = contents.split_whitespace().next()?.parse().ok()?;
        Some(one_minute / num_cpus::get() as f64)
    }
}

struct AdjustState {
    current_limit: f64,
    last_adjust: tokio::time::Instant,
}

/// Token bucket with load-driven rate adjustment
pub struct AdaptiveLimiter {
    bucket: TokenBucketLimiter,
    min_limit: f64,
    max_limit: f64,
    target_cpu: f64,
    target_memory: f64,
    target_load: f64,
    adjust_interval: Duration,
    provider: Option<Arc<dyn LoadProvider>>,
    bus: Arc<EventBus>,
    state: Mutex<AdjustState>,
}

impl AdaptiveLimiter {
    pub fn new(
        policy: &ResourcePolicy,
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        provider: Option<Arc<dyn LoadProvider>>,
    ) -> Self {
        let start_limit = policy.max_limit;
        let capacity = if policy.capacity > 0.0 {
            policy.capacity
        } else {
            policy.max_limit
        };
        let adjust_interval = if policy.adjust_interval == 0 {
            DEFAULT_ADJUST_INTERVAL
        } else {
            policy.adjust_interval_duration()
        };

        Self {
            bucket: TokenBucketLimiter::from_parts(start_limit, capacity, store),
            min_limit: policy.min_limit,
            max_limit: policy.max_limit,
            target_cpu: policy.target_cpu,
            target_memory: policy.target_memory,
            target_load: policy.target_load,
            adjust_interval,
            provider,
            bus,
            state: Mutex::new(AdjustState {
                current_limit: start_limit,
                last_adjust: tokio::time::Instant::now(),
            }),
        }
    }

    /// The limit currently in force
    pub async fn current_limit(&self) -> f64 {
        self.state.lock().await.current_limit
    }

    /// The first configured (target, sample) pair: CPU, then memory, then
    /// system load
    fn sample(&self) -> Option<(f64, f64)> {
        let provider = self.provider.as_ref()?;
        if self.target_cpu > 0.0 {
            return provider.cpu_usage().map(|load| (load, self.target_cpu));
        }
        if self.target_memory > 0.0 {
            return provider
                .memory_usage()
                .map(|load| (load, self.target_memory));
        }
        if self.target_load > 0.0 {
            return provider.system_load().map(|load| (load, self.target_load));
        }
        None
    }

    async fn maybe_adjust(&self, resource: &str) {
        let mut state = self.state.lock().await;
        if state.last_adjust.elapsed() < self.adjust_interval {
            return;
        }
        state.last_adjust = tokio::time::Instant::now();

        let old_limit = state.current_limit;
        let new_limit = match self.sample() {
            None => self.max_limit,
            Some((load, target)) => {
                if load > target * 1.2 {
                    (old_limit * 0.9).max(self.min_limit)
                } else if load < target * 0.8 {
                    (old_limit * 1.1).min(self.max_limit)
                } else {
                    old_limit
                }
            }
        };

        if (new_limit - old_limit).abs() > f64::EPSILON {
            state.current_limit = new_limit;
            self.bucket.set_rate(new_limit);
            debug!(
                resource = %resource,
                old_limit,
                new_limit,
                "adaptive limit adjusted"
            );
            self.bus.publish(RateLimitEvent::limit_changed(
                resource,
                old_limit as i64,
                new_limit as i64,
            ));
        }
    }
}

#[async_trait]
impl Algorithm for AdaptiveLimiter {
    fn kind(&self) -> &'static str {
        "adaptive"
    }

    async fn allow_n(&self, resource: &str, n: u32) -> Result<Decision> {
        self.maybe_adjust(resource).await;
        self.bucket.allow_n(resource, n).await
    }

    async fn reset(&self, resource: &str) -> Result<()> {
        self.bucket.reset(resource).await
    }

    async fn usage(&self, resource: &str) -> Result<CurrentUsage> {
        self.bucket.usage(resource).await
    }
}
