//! # Algorithms Module
//!
//! The [`Algorithm`] trait plus the four implementations: token bucket,
//! sliding-window log, concurrency, and adaptive. Algorithm state lives in
//! the [`Store`](crate::store::Store); instances are created per resource by
//! a small factory keyed on the policy's discriminator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::ResourcePolicy;
use crate::error::{RateLimitError, Result};
use crate::event::EventBus;
use crate::store::Store;

mod adaptive;
mod concurrency;
mod sliding_window;
mod token_bucket;

pub use adaptive::{AdaptiveLimiter, LoadProvider, SystemLoadProvider};
pub use concurrency::ConcurrencyLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

/// Minimum pause between wait attempts
const MIN_WAIT_DELAY: Duration = Duration::from_millis(1);

/// Outcome of one admission check
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,

    /// Suggested delay before retrying a rejected request
    pub retry_after: Duration,

    /// Remaining quota after this decision
    pub remaining: i64,

    /// Limit in force
    pub limit: i64,

    /// When the quota fully replenishes
    pub reset_at: DateTime<Utc>,
}

/// Current usage as reported by an algorithm for metrics
#[derive(Debug, Clone, Copy)]
pub struct CurrentUsage {
    pub current: i64,
    pub limit: i64,
    pub remaining: i64,
}

/// One rate-limiting strategy bound to a store
#[async_trait]
pub trait Algorithm: Send + Sync {
    /// Discriminator, matching the policy's `algorithm` field
    fn kind(&self) -> &'static str;

    /// Admit or reject a request of size `n`
    async fn allow_n(&self, resource: &str, n: u32) -> Result<Decision>;

    /// Return capacity taken by `allow_n`; meaningful for the concurrency
    /// algorithm, a no-op elsewhere
    async fn release(&self, _resource: &str, _n: u32) -> Result<()> {
        Ok(())
    }

    /// Drop all stored state for a resource
    async fn reset(&self, resource: &str) -> Result<()>;

    /// Current usage for metrics snapshots
    async fn usage(&self, resource: &str) -> Result<CurrentUsage>;
}

impl std::fmt::Debug for dyn Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Algorithm").field("kind", &self.kind()).finish()
    }
}

/// Retry `allow_n` until admitted, the deadline passes, or `ctx` fires
///
/// Between attempts the loop sleeps for min(algorithm-suggested delay,
/// remaining time). Deadline exhaustion yields
/// [`RateLimitError::WaitTimeout`]; cancellation yields
/// [`RateLimitError::Cancelled`].
pub async fn wait_for_allowance(
    algorithm: &dyn Algorithm,
    ctx: &CancellationToken,
    resource: &str,
    n: u32,
    timeout: Duration,
) -> Result<Decision> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if ctx.is_cancelled() {
            return Err(RateLimitError::Cancelled);
        }

        let decision = algorithm.allow_n(resource, n).await?;
        if decision.allowed {
            return Ok(decision);
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(RateLimitError::wait_timeout(resource));
        }

        let remaining_time = deadline - now;
        let delay = decision
            .retry_after
            .min(remaining_time)
            .max(MIN_WAIT_DELAY);

        tokio::select! {
            _ = ctx.cancelled() => return Err(RateLimitError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Build the algorithm an already-validated policy asks for
pub fn build_algorithm(
    policy: &ResourcePolicy,
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    load_provider: Option<Arc<dyn LoadProvider>>,
) -> Result<Arc<dyn Algorithm>> {
    match policy.algorithm.as_str() {
        "token_bucket" => Ok(Arc::new(TokenBucketLimiter::new(policy, store))),
        "sliding_window" => Ok(Arc::new(SlidingWindowLimiter::new(policy, store))),
        "concurrency" => Ok(Arc::new(ConcurrencyLimiter::new(policy, store))),
        "adaptive" => Ok(Arc::new(AdaptiveLimiter::new(
            policy,
            store,
            bus,
            load_provider,
        ))),
        other => Err(RateLimitError::Validation {
            field: "algorithm".to_string(),
            message: format!("unknown algorithm: {other}"),
        }),
    }
}

/// Wall-clock nanoseconds; state keyed by this is shareable across instances
pub(crate) fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn token_bucket_policy() -> ResourcePolicy {
        ResourcePolicy {
            algorithm: "token_bucket".to_string(),
            rate: 10.0,
            capacity: 10.0,
            initial_tokens: 10.0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_factory_builds_each_kind() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new(4));

        let policies = [
            token_bucket_policy(),
            ResourcePolicy {
                algorithm: "sliding_window".to_string(),
                window_limit: 5,
                window: 1_000,
                ..Default::default()
            },
            ResourcePolicy {
                algorithm: "concurrency".to_string(),
                max_concurrency: 5,
                ..Default::default()
            },
            ResourcePolicy {
                algorithm: "adaptive".to_string(),
                min_limit: 1.0,
                max_limit: 10.0,
                target_cpu: 0.8,
                ..Default::default()
            },
        ];

        for policy in &policies {
            let algorithm =
                build_algorithm(policy, Arc::clone(&store), Arc::clone(&bus), None).unwrap();
            assert_eq!(algorithm.kind(), policy.algorithm);
        }

        let err = build_algorithm(
            &ResourcePolicy {
                algorithm: "leaky".to_string(),
                ..Default::default()
            },
            store,
            bus,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("leaky"));
    }

    #[tokio::test]
    async fn test_wait_succeeds_after_refill() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let policy = ResourcePolicy {
            algorithm: "token_bucket".to_string(),
            rate: 50.0,
            capacity: 1.0,
            initial_tokens: 1.0,
            ..Default::default()
        };
        let bucket = TokenBucketLimiter::new(&policy, store);

        // Drain the single token, then wait for the 20ms refill.
        assert!(bucket.allow_n("r", 1).await.unwrap().allowed);
        let ctx = CancellationToken::new();
        let decision = wait_for_allowance(&bucket, &ctx, "r", 1, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let policy = ResourcePolicy {
            algorithm: "token_bucket".to_string(),
            rate: 0.1,
            capacity: 1.0,
            initial_tokens: 1.0,
            ..Default::default()
        };
        let bucket = TokenBucketLimiter::new(&policy, store);
        assert!(bucket.allow_n("r", 1).await.unwrap().allowed);

        let ctx = CancellationToken::new();
        let err = wait_for_allowance(&bucket, &ctx, "r", 1, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::WaitTimeout { .. }));
    }

    #[tokio::test]
    async fn test_wait_observes_cancellation() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let policy = ResourcePolicy {
            algorithm: "token_bucket".to_string(),
            rate: 0.1,
            capacity: 1.0,
            initial_tokens: 1.0,
            ..Default::default()
        };
        let bucket = TokenBucketLimiter::new(&policy, store);
        assert!(bucket.allow_n("r", 1).await.unwrap().allowed);

        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = wait_for_allowance(&bucket, &ctx, "r", 1, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::Cancelled));
    }
}
