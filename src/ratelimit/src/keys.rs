//! # Key Derivation Module
//!
//! Maps request attributes onto limiter resource keys according to the
//! configured `key_func`, and answers skip-list checks for exempt paths.
//! HTTP integration layers build a [`RequestDescriptor`] from their own
//! request type and hand it here; the core stays framework-agnostic.

use std::collections::HashMap;

use crate::config::RateLimitConfig;

/// Header consulted first for the client address
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Header consulted second for the client address
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Header carrying the caller's API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Framework-agnostic view of one request
#[derive(Debug, Clone, Default)]
pub struct RequestDescriptor {
    /// Request path, e.g. `/v1/orders`
    pub path: String,

    /// Lowercased header map
    pub headers: HashMap<String, String>,

    /// Authenticated user identifier, when the auth layer resolved one
    pub user_id: Option<String>,

    /// Peer address as seen by the listener, `host:port` or bare host
    pub remote_addr: Option<String>,
}

impl RequestDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Attach one header (stored lowercased)
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into().to_lowercase(), value.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    /// Best-effort client address: forwarded chain first, then the real-ip
    /// header, then the socket peer
    pub fn client_ip(&self) -> Option<String> {
        if let Some(forwarded) = self.headers.get(FORWARDED_FOR_HEADER) {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return Some(first.to_string());
                }
            }
        }

        if let Some(real_ip) = self.headers.get(REAL_IP_HEADER) {
            let real_ip = real_ip.trim();
            if !real_ip.is_empty() {
                return Some(real_ip.to_string());
            }
        }

        self.remote_addr
            .as_deref()
            .map(|addr| addr.rsplit_once(':').map(|(host, _)| host).unwrap_or(addr))
            .map(str::to_string)
    }
}

/// Derives limiter resource keys per the configured policy
pub struct KeyDeriver {
    key_func: String,
    skip_paths: Vec<String>,
}

impl KeyDeriver {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            key_func: if config.key_func.is_empty() {
                "path".to_string()
            } else {
                config.key_func.clone()
            },
            skip_paths: config.skip_paths.clone(),
        }
    }

    /// Whether the path is exempt from limiting (prefix match)
    pub fn should_skip(&self, path: &str) -> bool {
        self.skip_paths
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix))
    }

    /// Resource key for one request
    ///
    /// Falls back to the path (or `"unknown"` for identity-based functions
    /// with no identity available) so a missing attribute never disables
    /// limiting outright.
    pub fn derive(&self, request: &RequestDescriptor) -> String {
        match self.key_func.as_str() {
            "ip" => request
                .client_ip()
                .map(|ip| format!("ip:{ip}"))
                .unwrap_or_else(|| "ip:unknown".to_string()),
            "user" => request
                .user_id
                .as_deref()
                .map(|user| format!("user:{user}"))
                .unwrap_or_else(|| "user:anonymous".to_string()),
            "path_ip" => {
                let ip = request.client_ip().unwrap_or_else(|| "unknown".to_string());
                format!("path_ip:{}:{}", request.path, ip)
            }
            "api_key" => request
                .headers
                .get(API_KEY_HEADER)
                .map(|key| format!("api_key:{key}"))
                .unwrap_or_else(|| "api_key:missing".to_string()),
            _ => format!("path:{}", request.path),
        }
    }
}
