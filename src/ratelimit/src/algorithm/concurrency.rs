//! Concurrency-cap algorithm
//!
//! An atomic counter of in-flight holders. Acquisition increments and rolls
//! back when the cap would be exceeded; `release` returns capacity. Waiters
//! poll at a fixed 100ms granularity via the suggested retry delay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::algorithm::{Algorithm, CurrentUsage, Decision};
use crate::config::ResourcePolicy;
use crate::error::Result;
use crate::store::Store;

/// Poll granularity suggested to waiters
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Store-backed concurrency cap
pub struct ConcurrencyLimiter {
    store: Arc<dyn Store>,
    max_concurrency: i64,
}

impl ConcurrencyLimiter {
    pub fn new(policy: &ResourcePolicy, store: Arc<dyn Store>) -> Self {
        Self {
            store,
            max_concurrency: policy.max_concurrency,
        }
    }

    fn key(resource: &str) -> String {
        format!("ratelimit:cc:{resource}")
    }
}

#[async_trait]
impl Algorithm for ConcurrencyLimiter {
    fn kind(&self) -> &'static str {
        "concurrency"
    }

    async fn allow_n(&self, resource: &str, n: u32) -> Result<Decision> {
        let key = Self::key(resource);
        let n = i64::from(n.max(1));

        let current = self.store.incr_by(&key, n).await?;
        if current > self.max_concurrency {
            // Roll the acquisition back before rejecting.
            self.store.decr_by(&key, n).await?;
            Ok(Decision {
                allowed: false,
                retry_after: WAIT_POLL_INTERVAL,
                remaining: (self.max_concurrency - (current - n)).max(0),
                limit: self.max_concurrency,
                reset_at: Utc::now(),
            })
        } else {
            Ok(Decision {
                allowed: true,
                retry_after: Duration::ZERO,
                remaining: self.max_concurrency - current,
                limit: self.max_concurrency,
                reset_at: Utc::now(),
            })
        }
    }

    async fn release(&self, resource: &str, n: u32) -> Result<()> {
        let key = Self::key(resource);
        let value = self.store.decr_by(&key, i64::from(n.max(1))).await?;
        if value < 0 {
            // Over-release clamps to zero rather than banking credit.
            self.store.set_int(&key, 0, Duration::ZERO).await?;
        }
        Ok(())
    }

    async fn reset(&self, resource: &str) -> Result<()> {
        self.store.del(&Self::key(resource)).await
    }

    async fn usage(&self, resource: &str) -> Result<CurrentUsage> {
        let current = self.store.get_int(&Self::key(resource)).await?.max(0);
        Ok(CurrentUsage {
            current,
            limit: self.max_concurrency,
            remaining: (self.max_concurrency - current).max(0),
        })
    }
}
