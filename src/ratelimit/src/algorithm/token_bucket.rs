//! Token-bucket algorithm
//!
//! Tokens accrue at `rate` per second up to `capacity` and are consumed per
//! request. State (token count + last-refill timestamp) lives in the store
//! so instances sharing a remote store share the bucket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::algorithm::{now_ns, Algorithm, CurrentUsage, Decision};
use crate::config::ResourcePolicy;
use crate::error::Result;
use crate::store::Store;

struct BucketParams {
    rate: f64,
    capacity: f64,
    initial: f64,
}

/// Store-backed token bucket
pub struct TokenBucketLimiter {
    store: Arc<dyn Store>,
    params: RwLock<BucketParams>,

    // Serializes the read-modify-write cycle within this instance; cross-
    // instance atomicity is whatever the store provides.
    update: Mutex<()>,
}

impl TokenBucketLimiter {
    pub fn new(policy: &ResourcePolicy, store: Arc<dyn Store>) -> Self {
        let initial = if policy.initial_tokens == 0.0 {
            policy.capacity
        } else {
            policy.initial_tokens
        };
        Self {
            store,
            params: RwLock::new(BucketParams {
                rate: policy.rate,
                capacity: policy.capacity,
                initial,
            }),
            update: Mutex::new(()),
        }
    }

    /// Construct directly from bucket parameters; used by the adaptive
    /// limiter
    pub(crate) fn from_parts(rate: f64, capacity: f64, store: Arc<dyn Store>) -> Self {
        Self {
            store,
            params: RwLock::new(BucketParams {
                rate,
                capacity,
                initial: capacity,
            }),
            update: Mutex::new(()),
        }
    }

    /// Replace the refill rate; the adaptive limiter adjusts through this
    pub(crate) fn set_rate(&self, rate: f64) {
        self.params.write().rate = rate;
    }

    /// The refill rate currently in force
    pub(crate) fn rate(&self) -> f64 {
        self.params.read().rate
    }

    fn tokens_key(resource: &str) -> String {
        format!("ratelimit:tb:{resource}:tokens")
    }

    fn refill_key(resource: &str) -> String {
        format!("ratelimit:tb:{resource}:refill")
    }

    async fn read_state(&self, resource: &str) -> Result<(Option<f64>, i64)> {
        let raw = self.store.get_string(&Self::tokens_key(resource)).await?;
        let tokens = if raw.is_empty() {
            None
        } else {
            raw.parse::<f64>().ok()
        };
        let last_refill = self.store.get_int(&Self::refill_key(resource)).await?;
        Ok((tokens, last_refill))
    }

    async fn write_state(&self, resource: &str, tokens: f64, refill_ns: i64) -> Result<()> {
        self.store
            .set_string(
                &Self::tokens_key(resource),
                &format!("{tokens:.6}"),
                Duration::ZERO,
            )
            .await?;
        self.store
            .set_int(&Self::refill_key(resource), refill_ns, Duration::ZERO)
            .await
    }
}

#[async_trait]
impl Algorithm for TokenBucketLimiter {
    fn kind(&self) -> &'static str {
        "token_bucket"
    }

    async fn allow_n(&self, resource: &str, n: u32) -> Result<Decision> {
        let _serial = self.update.lock().await;
        let (rate, capacity, initial) = {
            let params = self.params.read();
            (params.rate, params.capacity, params.initial)
        };

        let now = now_ns();
        let (stored_tokens, last_refill) = self.read_state(resource).await?;

        let mut tokens = match stored_tokens {
            Some(tokens) if last_refill > 0 => {
                let elapsed = (now - last_refill).max(0) as f64 / 1e9;
                (tokens + rate * elapsed).min(capacity)
            }
            Some(tokens) => tokens.min(capacity),
            // First access seeds the bucket.
            None => initial.min(capacity),
        };

        let n = f64::from(n.max(1));
        let limit = capacity as i64;

        if tokens >= n {
            tokens -= n;
            self.write_state(resource, tokens, now).await?;

            let until_full = if rate > 0.0 {
                (capacity - tokens) / rate
            } else {
                0.0
            };
            Ok(Decision {
                allowed: true,
                retry_after: Duration::ZERO,
                remaining: tokens.floor() as i64,
                limit,
                reset_at: Utc::now()
                    + chrono::Duration::milliseconds((until_full * 1_000.0) as i64),
            })
        } else {
            // Persist the refreshed count so the next call does not redo
            // the same catch-up computation.
            self.write_state(resource, tokens, now).await?;

            let deficit = n - tokens;
            let retry_after = if rate > 0.0 {
                Duration::from_secs_f64(deficit / rate)
            } else {
                Duration::from_secs(1)
            };
            Ok(Decision {
                allowed: false,
                retry_after,
                remaining: tokens.floor() as i64,
                limit,
                reset_at: Utc::now()
                    + chrono::Duration::milliseconds(retry_after.as_millis() as i64),
            })
        }
    }

    async fn reset(&self, resource: &str) -> Result<()> {
        self.store.del(&Self::tokens_key(resource)).await?;
        self.store.del(&Self::refill_key(resource)).await
    }

    async fn usage(&self, resource: &str) -> Result<CurrentUsage> {
        let capacity = self.params.read().capacity;
        let (stored_tokens, _) = self.read_state(resource).await?;
        let remaining = stored_tokens.unwrap_or(capacity).floor() as i64;
        let limit = capacity as i64;
        Ok(CurrentUsage {
            current: (limit - remaining).max(0),
            limit,
            remaining,
        })
    }
}
