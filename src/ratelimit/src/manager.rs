//! # Limiter Manager Module
//!
//! Composes algorithms and stores per resource, publishes decision events
//! and collects metrics. Dispatch policy for `allow*`/`wait*`:
//!
//! 1. Disabled limiter: always allow.
//! 2. Resource with an explicit policy: use it (merged over the default).
//! 3. Valid default policy: use it.
//! 4. Otherwise: pass through.
//!
//! Resources are materialized lazily; the algorithm + collector pair is
//! cached for the manager's lifetime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::algorithm::{
    build_algorithm, wait_for_allowance, Algorithm, LoadProvider,
};
use crate::config::{RateLimitConfig, ResourcePolicy};
use crate::error::{RateLimitError, Result};
use crate::event::{EventBus, RateLimitEvent};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::store::{MemoryStore, Store};

struct ResourceLimiter {
    algorithm: Arc<dyn Algorithm>,
    metrics: Arc<MetricsCollector>,
    policy: ResourcePolicy,
}

/// Per-resource limiter composition root
pub struct RateLimitManager {
    config: RateLimitConfig,
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    load_provider: Option<Arc<dyn LoadProvider>>,
    limiters: RwLock<HashMap<String, Arc<ResourceLimiter>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for RateLimitManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitManager").finish_non_exhaustive()
    }
}

impl RateLimitManager {
    /// Build a manager backed by the in-process store
    ///
    /// A redis `store_type` needs the shared connection and must go through
    /// [`RateLimitManager::with_store`].
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        if config.enabled && config.store_type == "redis" {
            return Err(RateLimitError::config(
                "redis store requires an injected connection; use with_store",
            ));
        }
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        Ok(Self::assemble(config, store, None))
    }

    /// Build a manager on a caller-provided store
    pub fn with_store(config: RateLimitConfig, store: Arc<dyn Store>) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, store, None))
    }

    /// Build a manager with a store and an adaptive load provider
    pub fn with_store_and_provider(
        config: RateLimitConfig,
        store: Arc<dyn Store>,
        provider: Arc<dyn LoadProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, store, Some(provider)))
    }

    fn assemble(
        config: RateLimitConfig,
        store: Arc<dyn Store>,
        load_provider: Option<Arc<dyn LoadProvider>>,
    ) -> Self {
        let bus = Arc::new(EventBus::new(config.event_bus_buffer()));
        info!(
            enabled = config.enabled,
            store = %config.store_type,
            resources = config.resources.len(),
            "rate limit manager assembled"
        );
        Self {
            config,
            store,
            bus,
            load_provider,
            limiters: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Whether limiting is globally enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// The event bus carrying limiter decisions
    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Admit or pass through one request
    pub async fn allow(&self, ctx: &CancellationToken, resource: &str) -> Result<bool> {
        self.allow_n(ctx, resource, 1).await
    }

    /// Admit or pass through a request of size `n`; zero is treated as one
    pub async fn allow_n(&self, ctx: &CancellationToken, resource: &str, n: u32) -> Result<bool> {
        if !self.config.enabled {
            return Ok(true);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(RateLimitError::StoreClosed);
        }
        if ctx.is_cancelled() {
            return Err(RateLimitError::Cancelled);
        }

        let Some(policy) = self.resolve_policy(resource) else {
            return Ok(true);
        };
        let limiter = self.limiter_for(resource, &policy).await?;

        let decision = limiter.algorithm.allow_n(resource, n.max(1)).await?;
        if decision.allowed {
            limiter.metrics.record_allowed();
            self.bus.publish(RateLimitEvent::allowed(
                resource,
                decision.remaining,
                decision.limit,
            ));
        } else {
            limiter.metrics.record_rejected();
            self.bus.publish(RateLimitEvent::rejected(
                resource,
                decision.retry_after,
                "limit exceeded",
            ));
        }
        Ok(decision.allowed)
    }

    /// Block until one slot is granted or the policy's wait deadline passes
    pub async fn wait(&self, ctx: &CancellationToken, resource: &str) -> Result<()> {
        self.wait_n(ctx, resource, 1).await
    }

    /// Block until `n` slots are granted or the policy's wait deadline
    /// passes; zero is treated as one
    pub async fn wait_n(&self, ctx: &CancellationToken, resource: &str, n: u32) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(RateLimitError::StoreClosed);
        }

        let Some(policy) = self.resolve_policy(resource) else {
            return Ok(());
        };
        let limiter = self.limiter_for(resource, &policy).await?;

        self.bus.publish(RateLimitEvent::wait_start(resource));
        let started = std::time::Instant::now();

        match wait_for_allowance(
            limiter.algorithm.as_ref(),
            ctx,
            resource,
            n.max(1),
            policy.wait_timeout(),
        )
        .await
        {
            Ok(decision) => {
                limiter.metrics.record_allowed();
                self.bus.publish(RateLimitEvent::allowed(
                    resource,
                    decision.remaining,
                    decision.limit,
                ));
                self.bus
                    .publish(RateLimitEvent::wait_success(resource, started.elapsed()));
                Ok(())
            }
            Err(RateLimitError::WaitTimeout { .. }) => {
                limiter.metrics.record_rejected();
                self.bus
                    .publish(RateLimitEvent::wait_timeout(resource, started.elapsed()));
                Err(RateLimitError::wait_timeout(resource))
            }
            Err(other) => Err(other),
        }
    }

    /// Return capacity taken by an earlier admission; meaningful for the
    /// concurrency algorithm
    pub async fn release(&self, resource: &str, n: u32) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }
        let limiters = self.limiters.read().await;
        if let Some(limiter) = limiters.get(resource) {
            limiter.algorithm.release(resource, n).await?;
        }
        Ok(())
    }

    /// Metrics snapshot for a resource that has seen traffic
    pub async fn metrics(&self, resource: &str) -> Option<MetricsSnapshot> {
        let limiter = {
            let limiters = self.limiters.read().await;
            limiters.get(resource).cloned()?
        };
        let usage = limiter.algorithm.usage(resource).await.ok()?;
        Some(
            limiter
                .metrics
                .snapshot(usage.current, usage.limit, usage.remaining),
        )
    }

    /// Snapshots for every resource that has seen traffic
    pub async fn all_metrics(&self) -> Vec<MetricsSnapshot> {
        let limiters: Vec<(String, Arc<ResourceLimiter>)> = {
            let limiters = self.limiters.read().await;
            limiters
                .iter()
                .map(|(resource, limiter)| (resource.clone(), Arc::clone(limiter)))
                .collect()
        };

        let mut snapshots = Vec::with_capacity(limiters.len());
        for (resource, limiter) in limiters {
            if let Ok(usage) = limiter.algorithm.usage(&resource).await {
                snapshots.push(limiter.metrics.snapshot(
                    usage.current,
                    usage.limit,
                    usage.remaining,
                ));
            }
        }
        snapshots
    }

    /// Drop a resource's algorithm state and zero its counters
    pub async fn reset(&self, resource: &str) -> Result<()> {
        let limiters = self.limiters.read().await;
        if let Some(limiter) = limiters.get(resource) {
            limiter.algorithm.reset(resource).await?;
            limiter.metrics.reset();
            debug!(resource = %resource, "limiter state reset");
        }
        Ok(())
    }

    /// Close the event bus and the store; repeated calls are no-ops
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bus.close().await;
        self.store.close().await?;
        info!("rate limit manager closed");
        Ok(())
    }

    /// Dispatch steps 2-4: explicit policy, valid default, or pass-through
    fn resolve_policy(&self, resource: &str) -> Option<ResourcePolicy> {
        if let Some(policy) = self.config.resources.get(resource) {
            return Some(self.config.effective_policy_for(policy));
        }
        let default = &self.config.default_policy;
        if !default.is_empty() && default.validate().is_ok() {
            return Some(default.clone());
        }
        None
    }

    async fn limiter_for(
        &self,
        resource: &str,
        policy: &ResourcePolicy,
    ) -> Result<Arc<ResourceLimiter>> {
        {
            let limiters = self.limiters.read().await;
            if let Some(limiter) = limiters.get(resource) {
                return Ok(Arc::clone(limiter));
            }
        }

        let mut limiters = self.limiters.write().await;
        // Double-checked: another task may have won the race.
        if let Some(limiter) = limiters.get(resource) {
            return Ok(Arc::clone(limiter));
        }

        let algorithm = build_algorithm(
            policy,
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
            self.load_provider.clone(),
        )?;
        let metrics = Arc::new(MetricsCollector::new(resource, policy.algorithm.clone()));
        let limiter = Arc::new(ResourceLimiter {
            algorithm,
            metrics,
            policy: policy.clone(),
        });
        limiters.insert(resource.to_string(), Arc::clone(&limiter));
        debug!(
            resource = %resource,
            algorithm = %limiter.policy.algorithm,
            "resource limiter created"
        );
        Ok(limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn token_bucket(rate: f64, capacity: f64, init: f64) -> ResourcePolicy {
        ResourcePolicy {
            algorithm: "token_bucket".to_string(),
            rate,
            capacity,
            initial_tokens: init,
            ..Default::default()
        }
    }

    fn enabled_config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_manager_always_allows() {
        let manager = RateLimitManager::new(RateLimitConfig::default()).unwrap();
        let ctx = CancellationToken::new();
        for _ in 0..100 {
            assert!(manager.allow(&ctx, "anything").await.unwrap());
        }
        assert!(!manager.is_enabled());
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_explicit_policy_enforced() {
        let mut config = enabled_config();
        config
            .resources
            .insert("x".to_string(), token_bucket(1.0, 1.0, 1.0));
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        assert!(manager.allow(&ctx, "x").await.unwrap());
        assert!(!manager.allow(&ctx, "x").await.unwrap());
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_resource_passthrough() {
        let mut config = enabled_config();
        config
            .resources
            .insert("x".to_string(), token_bucket(1.0, 1.0, 1.0));
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        assert!(manager.allow(&ctx, "x").await.unwrap());
        assert!(!manager.allow(&ctx, "x").await.unwrap());
        for _ in 0..20 {
            assert!(manager.allow(&ctx, "y").await.unwrap());
        }
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_valid_default_applies_to_unconfigured_resource() {
        let mut config = enabled_config();
        config.default_policy = token_bucket(1.0, 2.0, 2.0);
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        assert!(manager.allow(&ctx, "anything").await.unwrap());
        assert!(manager.allow(&ctx, "anything").await.unwrap());
        assert!(!manager.allow(&ctx, "anything").await.unwrap());
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_default_passes_through() {
        let mut config = enabled_config();
        config.default_policy = ResourcePolicy {
            algorithm: "token_bucket".to_string(),
            rate: 0.0, // invalid
            capacity: 10.0,
            ..Default::default()
        };
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        for _ in 0..10 {
            assert!(manager.allow(&ctx, "free").await.unwrap());
        }
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_resource_policy_merges_over_default() {
        let mut config = enabled_config();
        config.default_policy = token_bucket(100.0, 100.0, 100.0);
        // Overrides the rate/capacity only; algorithm comes from default.
        config.resources.insert(
            "tight".to_string(),
            ResourcePolicy {
                rate: 1.0,
                capacity: 1.0,
                initial_tokens: 1.0,
                ..Default::default()
            },
        );
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        assert!(manager.allow(&ctx, "tight").await.unwrap());
        assert!(!manager.allow(&ctx, "tight").await.unwrap());
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_allow_zero_is_one() {
        let mut config = enabled_config();
        config
            .resources
            .insert("x".to_string(), token_bucket(0.001, 1.0, 1.0));
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        assert!(manager.allow_n(&ctx, "x", 0).await.unwrap());
        assert!(!manager.allow_n(&ctx, "x", 0).await.unwrap());
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_grants_after_refill() {
        let mut config = enabled_config();
        let mut policy = token_bucket(20.0, 1.0, 1.0);
        policy.timeout = 2_000;
        config.resources.insert("x".to_string(), policy);
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        assert!(manager.allow(&ctx, "x").await.unwrap());
        manager.wait(&ctx, "x").await.unwrap();
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_timeout_is_typed() {
        let mut config = enabled_config();
        let mut policy = token_bucket(0.01, 1.0, 1.0);
        policy.timeout = 50;
        config.resources.insert("x".to_string(), policy);
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        assert!(manager.allow(&ctx, "x").await.unwrap());
        let err = manager.wait(&ctx, "x").await.unwrap_err();
        assert!(matches!(err, RateLimitError::WaitTimeout { .. }));
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_metrics_reflect_decisions() {
        let mut config = enabled_config();
        config
            .resources
            .insert("x".to_string(), token_bucket(0.001, 2.0, 2.0));
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        manager.allow(&ctx, "x").await.unwrap();
        manager.allow(&ctx, "x").await.unwrap();
        manager.allow(&ctx, "x").await.unwrap(); // rejected

        let snapshot = manager.metrics("x").await.unwrap();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.allowed, 2);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.algorithm, "token_bucket");

        assert!(manager.metrics("untouched").await.is_none());
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_all_metrics_covers_touched_resources() {
        let mut config = enabled_config();
        config
            .resources
            .insert("a".to_string(), token_bucket(0.001, 2.0, 2.0));
        config
            .resources
            .insert("b".to_string(), token_bucket(0.001, 2.0, 2.0));
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        manager.allow(&ctx, "a").await.unwrap();
        assert_eq!(manager.all_metrics().await.len(), 1);

        manager.allow(&ctx, "b").await.unwrap();
        let mut resources: Vec<String> = manager
            .all_metrics()
            .await
            .into_iter()
            .map(|s| s.resource)
            .collect();
        resources.sort();
        assert_eq!(resources, vec!["a".to_string(), "b".to_string()]);
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_restores_quota() {
        let mut config = enabled_config();
        config
            .resources
            .insert("x".to_string(), token_bucket(0.001, 1.0, 1.0));
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        assert!(manager.allow(&ctx, "x").await.unwrap());
        assert!(!manager.allow(&ctx, "x").await.unwrap());

        manager.reset("x").await.unwrap();
        assert!(manager.allow(&ctx, "x").await.unwrap());

        let snapshot = manager.metrics("x").await.unwrap();
        assert_eq!(snapshot.total_requests, 1);
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrency_release_through_manager() {
        let mut config = enabled_config();
        config.resources.insert(
            "jobs".to_string(),
            ResourcePolicy {
                algorithm: "concurrency".to_string(),
                max_concurrency: 5,
                ..Default::default()
            },
        );
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        for _ in 0..5 {
            assert!(manager.allow(&ctx, "jobs").await.unwrap());
        }
        assert!(!manager.allow(&ctx, "jobs").await.unwrap());

        manager.release("jobs", 2).await.unwrap();
        assert!(manager.allow(&ctx, "jobs").await.unwrap());
        assert!(manager.allow(&ctx, "jobs").await.unwrap());
        assert!(!manager.allow(&ctx, "jobs").await.unwrap());
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_events_published_on_decisions() {
        use crate::event::EventKind;
        use std::sync::atomic::AtomicUsize;

        let mut config = enabled_config();
        config
            .resources
            .insert("x".to_string(), token_bucket(0.001, 1.0, 1.0));
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        let allowed = Arc::new(AtomicUsize::new(0));
        let rejected = Arc::new(AtomicUsize::new(0));
        let (a, r) = (Arc::clone(&allowed), Arc::clone(&rejected));
        manager
            .event_bus()
            .subscribe(Box::new(move |event| match event.kind {
                EventKind::Allowed => {
                    a.fetch_add(1, Ordering::SeqCst);
                }
                EventKind::Rejected => {
                    r.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }))
            .unwrap();

        manager.allow(&ctx, "x").await.unwrap();
        manager.allow(&ctx, "x").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(allowed.load(Ordering::SeqCst), 1);
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_terminal() {
        let mut config = enabled_config();
        config
            .resources
            .insert("x".to_string(), token_bucket(1.0, 1.0, 1.0));
        let manager = RateLimitManager::new(config).unwrap();
        let ctx = CancellationToken::new();

        manager.close().await.unwrap();
        manager.close().await.unwrap();

        let err = manager.allow(&ctx, "x").await.unwrap_err();
        assert!(matches!(err, RateLimitError::StoreClosed));
    }

    #[tokio::test]
    async fn test_redis_store_type_requires_injection() {
        let config = RateLimitConfig {
            enabled: true,
            store_type: "redis".to_string(),
            redis: crate::config::RedisStoreConfig {
                instance: "cache".to_string(),
                key_prefix: "rl:".to_string(),
            },
            ..Default::default()
        };
        let err = RateLimitManager::new(config).unwrap_err();
        assert!(err.to_string().contains("with_store"));
    }
}
