//! Sliding-window log algorithm
//!
//! Every admission appends a uniquely-identified member scored by its
//! nanosecond timestamp to an ordered set; a request is admitted when the
//! entries inside the trailing window stay at or under the limit. Expired
//! entries are pruned before each count.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::algorithm::{now_ns, Algorithm, CurrentUsage, Decision};
use crate::config::ResourcePolicy;
use crate::error::Result;
use crate::store::Store;

/// Store-backed sliding-window log
pub struct SlidingWindowLimiter {
    store: Arc<dyn Store>,
    limit: i64,
    window: Duration,

    // Serializes prune-count-append within this instance.
    update: Mutex<()>,
}

impl SlidingWindowLimiter {
    pub fn new(policy: &ResourcePolicy, store: Arc<dyn Store>) -> Self {
        Self {
            store,
            limit: policy.window_limit,
            window: policy.window_duration(),
            update: Mutex::new(()),
        }
    }

    fn key(resource: &str) -> String {
        format!("ratelimit:sw:{resource}")
    }

    fn window_ns(&self) -> i64 {
        self.window.as_nanos().min(i64::MAX as u128) as i64
    }
}

#[async_trait]
impl Algorithm for SlidingWindowLimiter {
    fn kind(&self) -> &'static str {
        "sliding_window"
    }

    async fn allow_n(&self, resource: &str, n: u32) -> Result<Decision> {
        let _serial = self.update.lock().await;
        let key = Self::key(resource);
        let now = now_ns();
        let window_start = now - self.window_ns();
        let n = i64::from(n.max(1));

        self.store
            .zremrangebyscore(&key, 0, window_start - 1)
            .await?;
        let in_window = self.store.zcount(&key, window_start, now).await? as i64;

        if in_window + n <= self.limit {
            for _ in 0..n {
                self.store
                    .zadd(&key, now, &Uuid::new_v4().to_string())
                    .await?;
            }
            Ok(Decision {
                allowed: true,
                retry_after: Duration::ZERO,
                remaining: self.limit - in_window - n,
                limit: self.limit,
                reset_at: Utc::now()
                    + chrono::Duration::milliseconds(self.window.as_millis() as i64),
            })
        } else {
            let retry_after = self
                .window
                .checked_div(self.limit.max(1) as u32)
                .unwrap_or(self.window);
            Ok(Decision {
                allowed: false,
                retry_after,
                remaining: (self.limit - in_window).max(0),
                limit: self.limit,
                reset_at: Utc::now()
                    + chrono::Duration::milliseconds(retry_after.as_millis() as i64),
            })
        }
    }

    async fn reset(&self, resource: &str) -> Result<()> {
        self.store.del(&Self::key(resource)).await
    }

    async fn usage(&self, resource: &str) -> Result<CurrentUsage> {
        // Activity over the last second.
        let now = now_ns();
        let current = self
            .store
            .zcount(&Self::key(resource), now - 1_000_000_000, now)
            .await? as i64;
        Ok(CurrentUsage {
            current,
            limit: self.limit,
            remaining: (self.limit - current).max(0),
        })
    }
}
