//! # Metrics Collector Module
//!
//! Per-resource atomic counters with snapshot and reset.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Point-in-time view of one resource's limiter metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub resource: String,
    pub algorithm: String,
    pub total_requests: u64,
    pub allowed: u64,
    pub rejected: u64,

    /// Current usage as reported by the algorithm
    pub current: i64,

    /// Limit in force
    pub limit: i64,

    /// Remaining quota
    pub remaining: i64,

    /// rejected / total; zero when no requests were seen
    pub reject_ratio: f64,

    pub last_reset: DateTime<Utc>,
}

/// Per-resource counter set
pub struct MetricsCollector {
    resource: String,
    algorithm: String,
    total: AtomicU64,
    allowed: AtomicU64,
    rejected: AtomicU64,
    last_reset: Mutex<DateTime<Utc>>,
}

impl MetricsCollector {
    pub fn new(resource: impl Into<String>, algorithm: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            algorithm: algorithm.into(),
            total: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            last_reset: Mutex::new(Utc::now()),
        }
    }

    /// Count one allowed request
    pub fn record_allowed(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one rejected request
    pub fn record_rejected(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Build a snapshot, merging in the algorithm's current usage view
    pub fn snapshot(&self, current: i64, limit: i64, remaining: i64) -> MetricsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let rejected = self.rejected.load(Ordering::Relaxed);
        let reject_ratio = if total == 0 {
            0.0
        } else {
            rejected as f64 / total as f64
        };

        MetricsSnapshot {
            resource: self.resource.clone(),
            algorithm: self.algorithm.clone(),
            total_requests: total,
            allowed: self.allowed.load(Ordering::Relaxed),
            rejected,
            current,
            limit,
            remaining,
            reject_ratio,
            last_reset: *self.last_reset.lock(),
        }
    }

    /// Zero the counters and stamp a new reset time
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.allowed.store(0, Ordering::Relaxed);
        self.rejected.store(0, Ordering::Relaxed);
        *self.last_reset.lock() = Utc::now();
    }
}
