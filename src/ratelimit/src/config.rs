//! # Configuration Module
//!
//! Rate-limit configuration tree: store selection, event-bus sizing, the
//! `default` policy and the per-resource policy map. Policies are flat
//! structs with an algorithm discriminator; zero-valued fields mean "unset"
//! so that resource policies can be merged over the default with
//! override-only-non-zero semantics.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RateLimitError, Result};

/// Known store kinds
pub const STORE_KINDS: &[&str] = &["memory", "redis"];

/// Known key-derivation policies
pub const KEY_FUNCS: &[&str] = &["path", "ip", "user", "path_ip", "api_key"];

/// Known algorithm discriminators
pub const ALGORITHMS: &[&str] = &[
    "token_bucket",
    "sliding_window",
    "concurrency",
    "adaptive",
];

/// Default event-bus buffer size
pub const DEFAULT_EVENT_BUS_BUFFER: usize = 100;

/// Default wait deadline when a policy does not configure one
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Main configuration for the rate-limiting core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Global enable flag; when off every request passes
    pub enabled: bool,

    /// Backing store: memory or redis
    pub store_type: String,

    /// Remote store coordinates, used when `store_type` is redis
    pub redis: RedisStoreConfig,

    /// Event-bus buffer size
    pub event_bus_buffer: usize,

    /// Key-derivation policy for HTTP integration layers
    pub key_func: String,

    /// Paths exempt from limiting
    pub skip_paths: Vec<String>,

    /// Fallback policy applied to resources without an explicit entry
    #[serde(rename = "default")]
    pub default_policy: ResourcePolicy,

    /// Per-resource policies
    pub resources: HashMap<String, ResourcePolicy>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            store_type: "memory".to_string(),
            redis: RedisStoreConfig::default(),
            event_bus_buffer: DEFAULT_EVENT_BUS_BUFFER,
            key_func: "path".to_string(),
            skip_paths: Vec::new(),
            default_policy: ResourcePolicy::default(),
            resources: HashMap::new(),
        }
    }
}

/// Remote store coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RedisStoreConfig {
    /// Name of the shared connection registered with the host
    pub instance: String,

    /// Prefix applied to every key
    pub key_prefix: String,
}

/// One resource's limiting policy
///
/// Flat on purpose: zero means "unset", which makes merging a resource
/// policy over the default a field-wise overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResourcePolicy {
    /// Algorithm discriminator: token_bucket, sliding_window, concurrency,
    /// adaptive
    pub algorithm: String,

    // Token bucket
    /// Refill rate in tokens per second
    pub rate: f64,
    /// Bucket capacity
    pub capacity: f64,
    /// Initial token count; zero defaults to capacity
    pub initial_tokens: f64,

    // Sliding window
    /// Admissions allowed per window
    pub window_limit: i64,
    /// Window span in milliseconds
    pub window: u64,
    /// Sub-bucket span in milliseconds
    pub bucket: u64,

    // Concurrency
    /// Maximum simultaneous holders
    pub max_concurrency: i64,

    /// Wait deadline in milliseconds; zero falls back to 1s
    pub timeout: u64,

    // Adaptive
    /// Lower bound for the adjusted limit
    pub min_limit: f64,
    /// Upper bound for the adjusted limit
    pub max_limit: f64,
    /// Target CPU utilization fraction (0..1)
    pub target_cpu: f64,
    /// Target memory utilization fraction (0..1)
    pub target_memory: f64,
    /// Target normalized system load
    pub target_load: f64,
    /// Minimum interval between adjustments in milliseconds
    pub adjust_interval: u64,
}

impl ResourcePolicy {
    /// Whether the policy carries no settings at all
    pub fn is_empty(&self) -> bool {
        self.algorithm.is_empty()
            && self.rate == 0.0
            && self.capacity == 0.0
            && self.initial_tokens == 0.0
            && self.window_limit == 0
            && self.window == 0
            && self.bucket == 0
            && self.max_concurrency == 0
            && self.timeout == 0
            && self.min_limit == 0.0
            && self.max_limit == 0.0
            && self.target_cpu == 0.0
            && self.target_memory == 0.0
            && self.target_load == 0.0
            && self.adjust_interval == 0
    }

    /// Type-check the policy against its declared algorithm
    pub fn validate(&self) -> Result<()> {
        match self.algorithm.as_str() {
            "token_bucket" => {
                if self.rate <= 0.0 {
                    return Err(RateLimitError::validation("rate", "must be positive"));
                }
                if self.capacity <= 0.0 {
                    return Err(RateLimitError::validation("capacity", "must be positive"));
                }
                if self.initial_tokens < 0.0 || self.initial_tokens > self.capacity {
                    return Err(RateLimitError::validation(
                        "initial_tokens",
                        "must be between 0 and capacity",
                    ));
                }
                Ok(())
            }
            "sliding_window" => {
                if self.window_limit <= 0 {
                    return Err(RateLimitError::validation(
                        "window_limit",
                        "must be positive",
                    ));
                }
                if self.window == 0 {
                    return Err(RateLimitError::validation("window", "must be positive"));
                }
                Ok(())
            }
            "concurrency" => {
                if self.max_concurrency <= 0 {
                    return Err(RateLimitError::validation(
                        "max_concurrency",
                        "must be positive",
                    ));
                }
                Ok(())
            }
            "adaptive" => {
                if self.min_limit <= 0.0 {
                    return Err(RateLimitError::validation("min_limit", "must be positive"));
                }
                if self.max_limit < self.min_limit {
                    return Err(RateLimitError::validation(
                        "max_limit",
                        "must be at least min_limit",
                    ));
                }
                if self.target_cpu <= 0.0 && self.target_memory <= 0.0 && self.target_load <= 0.0
                {
                    return Err(RateLimitError::validation(
                        "target_cpu",
                        "adaptive policy needs at least one target",
                    ));
                }
                Ok(())
            }
            "" => Err(RateLimitError::validation("algorithm", "must be set")),
            other => Err(RateLimitError::Validation {
                field: "algorithm".to_string(),
                message: format!("unknown algorithm: {other}"),
            }),
        }
    }

    /// Overlay this policy's non-zero fields over `base`
    pub fn merged_over(&self, base: &ResourcePolicy) -> ResourcePolicy {
        let mut merged = base.clone();
        if !self.algorithm.is_empty() {
            merged.algorithm = self.algorithm.clone();
        }
        if self.rate != 0.0 {
            merged.rate = self.rate;
        }
        if self.capacity != 0.0 {
            merged.capacity = self.capacity;
        }
        if self.initial_tokens != 0.0 {
            merged.initial_tokens = self.initial_tokens;
        }
        if self.window_limit != 0 {
            merged.window_limit = self.window_limit;
        }
        if self.window != 0 {
            merged.window = self.window;
        }
        if self.bucket != 0 {
            merged.bucket = self.bucket;
        }
        if self.max_concurrency != 0 {
            merged.max_concurrency = self.max_concurrency;
        }
        if self.timeout != 0 {
            merged.timeout = self.timeout;
        }
        if self.min_limit != 0.0 {
            merged.min_limit = self.min_limit;
        }
        if self.max_limit != 0.0 {
            merged.max_limit = self.max_limit;
        }
        if self.target_cpu != 0.0 {
            merged.target_cpu = self.target_cpu;
        }
        if self.target_memory != 0.0 {
            merged.target_memory = self.target_memory;
        }
        if self.target_load != 0.0 {
            merged.target_load = self.target_load;
        }
        if self.adjust_interval != 0 {
            merged.adjust_interval = self.adjust_interval;
        }
        merged
    }

    /// Window span as a `Duration`
    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window)
    }

    /// Wait deadline, falling back to the 1s default
    pub fn wait_timeout(&self) -> Duration {
        if self.timeout == 0 {
            DEFAULT_WAIT_TIMEOUT
        } else {
            Duration::from_millis(self.timeout)
        }
    }

    /// Adjustment interval as a `Duration`
    pub fn adjust_interval_duration(&self) -> Duration {
        Duration::from_millis(self.adjust_interval)
    }
}

impl RateLimitConfig {
    /// Validate the tree; resource-map policies must type-check, the default
    /// policy is checked lazily at dispatch time
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if !STORE_KINDS.contains(&self.store_type.as_str()) {
            return Err(RateLimitError::validation(
                "store_type",
                "must be one of memory, redis",
            ));
        }
        if self.store_type == "redis" && self.redis.instance.is_empty() {
            return Err(RateLimitError::validation(
                "redis.instance",
                "required when store_type is redis",
            ));
        }
        if !self.key_func.is_empty() && !KEY_FUNCS.contains(&self.key_func.as_str()) {
            return Err(RateLimitError::validation(
                "key_func",
                "must be one of path, ip, user, path_ip, api_key",
            ));
        }

        for (resource, policy) in &self.resources {
            let effective = self.effective_policy_for(policy);
            effective.validate().map_err(|e| match e {
                RateLimitError::Validation { field, message } => RateLimitError::Validation {
                    field: format!("resources.{resource}.{field}"),
                    message,
                },
                other => other,
            })?;
        }

        Ok(())
    }

    /// The policy the dispatcher would use for an explicitly configured
    /// resource: the resource policy merged over a non-empty default
    pub fn effective_policy_for(&self, policy: &ResourcePolicy) -> ResourcePolicy {
        if self.default_policy.is_empty() {
            policy.clone()
        } else {
            policy.merged_over(&self.default_policy)
        }
    }

    /// Effective event-bus buffer size
    pub fn event_bus_buffer(&self) -> usize {
        if self.event_bus_buffer == 0 {
            DEFAULT_EVENT_BUS_BUFFER
        } else {
            self.event_bus_buffer
        }
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

    #[test]
    fn test_disabled_config_always_validates() {
        let mut config = RateLimitConfig::default();
        config.store_type = "bogus".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_kind_checked() {
        let mut config = RateLimitConfig {
            enabled: true,
            ..Default::default()
        };
        config.store_type = "etcd".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("store_type"));
    }

    #[test]
    fn test_redis_requires_instance() {
        let config = RateLimitConfig {
            enabled: true,
            store_type: "redis".to_string(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redis.instance"));
    }

    #[test]
    fn test_resource_policies_type_checked() {
        let mut config = RateLimitConfig {
            enabled: true,
            ..Default::default()
        };
        config.resources.insert(
            "api".to_string(),
            ResourcePolicy {
                algorithm: "token_bucket".to_string(),
                rate: 0.0,
                capacity: 10.0,
                ..Default::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("resources.api.rate"));
    }

    #[test]
    fn test_token_bucket_init_bounds() {
        let policy = token_bucket(10.0, 10.0, 11.0);
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("initial_tokens"));

        assert!(token_bucket(10.0, 10.0, 10.0).validate().is_ok());
        assert!(token_bucket(10.0, 10.0, 0.0).validate().is_ok());
    }

    #[test]
    fn test_sliding_window_validation() {
        let policy = ResourcePolicy {
            algorithm: "sliding_window".to_string(),
            window_limit: 5,
            window: 500,
            ..Default::default()
        };
        assert!(policy.validate().is_ok());

        let bad = ResourcePolicy {
            algorithm: "sliding_window".to_string(),
            window_limit: 5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_adaptive_requires_target() {
        let policy = ResourcePolicy {
            algorithm: "adaptive".to_string(),
            min_limit: 10.0,
            max_limit: 100.0,
            ..Default::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("target"));
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let policy = ResourcePolicy {
            algorithm: "leaky_bucket".to_string(),
            ..Default::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("leaky_bucket"));
    }

    #[test]
    fn test_merge_only_overrides_non_zero() {
        let default = ResourcePolicy {
            algorithm: "token_bucket".to_string(),
            rate: 100.0,
            capacity: 200.0,
            timeout: 2_000,
            ..Default::default()
        };
        let overlay = ResourcePolicy {
            rate: 10.0,
            ..Default::default()
        };

        let merged = overlay.merged_over(&default);
        assert_eq!(merged.algorithm, "token_bucket");
        assert_eq!(merged.rate, 10.0);
        assert_eq!(merged.capacity, 200.0);
        assert_eq!(merged.timeout, 2_000);
    }

    #[test]
    fn test_empty_default_leaves_resource_policy_untouched() {
        let config = RateLimitConfig::default();
        let policy = token_bucket(1.0, 1.0, 1.0);
        assert_eq!(config.effective_policy_for(&policy), policy);
    }

    #[test]
    fn test_is_empty() {
        assert!(ResourcePolicy::default().is_empty());
        assert!(!token_bucket(1.0, 1.0, 0.0).is_empty());
    }

    #[test]
    fn test_wait_timeout_default() {
        let policy = ResourcePolicy::default();
        assert_eq!(policy.wait_timeout(), DEFAULT_WAIT_TIMEOUT);

        let policy = ResourcePolicy {
            timeout: 250,
            ..Default::default()
        };
        assert_eq!(policy.wait_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_snake_case_keys_roundtrip() {
        let json = serde_json::json!({
            "enabled": true,
            "store_type": "redis",
            "redis": { "instance": "cache-main", "key_prefix": "rl:" },
            "event_bus_buffer": 50,
            "key_func": "path_ip",
            "skip_paths": ["/health"],
            "default": { "algorithm": "token_bucket", "rate": 100.0, "capacity": 100.0 },
            "resources": {
                "api:/orders": { "rate": 10.0, "capacity": 20.0 }
            }
        });

        let config: RateLimitConfig = serde_json::from_value(json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.redis.instance, "cache-main");
        assert_eq!(config.event_bus_buffer, 50);
        assert_eq!(config.default_policy.rate, 100.0);
        let policy = config.resources.get("api:/orders").unwrap();
        assert_eq!(policy.rate, 10.0);
        assert!(config.validate().is_ok());
    }
}
