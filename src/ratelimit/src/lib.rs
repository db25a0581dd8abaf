//! # Conduit Rate-Limiting Core
//!
//! Reusable rate limiter for the Conduit platform:
//! - Four algorithms: token bucket, sliding-window log, concurrency cap,
//!   and load-adaptive
//! - A pluggable store: in-process with TTL reaping, or Redis-backed for
//!   state shared across instances
//! - A per-resource manager composing algorithm + store with lazy creation
//! - A non-blocking event bus for allow/reject/wait notifications
//! - Per-resource metrics with reject-ratio snapshots
//!
//! Dispatch policy: explicit resource policies win, a valid `default`
//! policy covers the rest, and anything else passes through untouched.

pub mod algorithm;
pub mod component;
pub mod config;
pub mod error;
pub mod event;
pub mod keys;
pub mod manager;
pub mod metrics;
pub mod store;

pub use algorithm::{
    Algorithm, AdaptiveLimiter, ConcurrencyLimiter, CurrentUsage, Decision, LoadProvider,
    SlidingWindowLimiter, SystemLoadProvider, TokenBucketLimiter,
};
pub use component::RateLimitComponent;
pub use config::{RateLimitConfig, RedisStoreConfig, ResourcePolicy};
pub use error::{RateLimitError, Result};
pub use event::{EventBus, EventKind, RateLimitEvent};
pub use keys::{KeyDeriver, RequestDescriptor};
pub use manager::RateLimitManager;
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use store::{MemoryStore, RedisStore, Store};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
