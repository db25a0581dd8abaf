//! # Store Abstraction Module
//!
//! Algorithms keep their state in a [`Store`]: typed string/int access with
//! TTL, atomic counters, and the ordered-set operations the sliding-window
//! log needs. The in-process store backs single-instance deployments; the
//! remote store shares limiter state across instances.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Key/value + ordered-set contract backing the limiter algorithms
///
/// TTL of `Duration::ZERO` means "no expiry". Missing keys read as empty
/// string / zero on the typed read paths rather than erroring; use
/// [`Store::exists`] to distinguish.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a string value; empty when the key is missing
    async fn get_string(&self, key: &str) -> Result<String>;

    /// Write a string value with a TTL
    async fn set_string(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Read an integer value; zero when the key is missing
    async fn get_int(&self, key: &str) -> Result<i64>;

    /// Write an integer value with a TTL
    async fn set_int(&self, key: &str, value: i64, ttl: Duration) -> Result<()>;

    /// Atomically add `delta` and return the new value
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Atomically subtract `delta` and return the new value
    async fn decr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Set a key's TTL; false when the key is missing
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining TTL; `None` when the key is missing or has no expiry
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Delete a key
    async fn del(&self, key: &str) -> Result<()>;

    /// Whether a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Add a member to an ordered set with the given score
    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()>;

    /// Remove members with scores in `[min, max]`; returns the removed count
    async fn zremrangebyscore(&self, key: &str, min: i64, max: i64) -> Result<u64>;

    /// Count members with scores in `[min, max]`
    async fn zcount(&self, key: &str, min: i64, max: i64) -> Result<u64>;

    /// Evaluate a server-side script (remote store only)
    async fn eval(
        &self,
        script: &str,
        keys: &[&str],
        args: &[&str],
    ) -> Result<serde_json::Value>;

    /// Release the store; in-process stores drop their state, remote stores
    /// leave the shared connection untouched
    async fn close(&self) -> Result<()>;
}
