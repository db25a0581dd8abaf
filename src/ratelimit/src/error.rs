//! # Error Handling Module
//!
//! Error types for the rate-limiting core. Wait deadlines, store teardown
//! and unsupported store operations all have stable, matchable variants.

use thiserror::Error;

/// Main error type for the rate-limiting core
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// Configuration could not be assembled
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A configuration field failed validation
    #[error("Validation error: field {field}: {message}")]
    Validation { field: String, message: String },

    /// A `wait` call reached its deadline without an allowance
    #[error("wait timed out for resource {resource}")]
    WaitTimeout { resource: String },

    /// The caller's cancellation signal fired before completion
    #[error("operation cancelled")]
    Cancelled,

    /// Store lookup found nothing where a key was required
    #[error("key not found: {key}")]
    KeyNotFound { key: String },

    /// The store backend does not implement the requested operation
    #[error("unsupported store operation: {operation}")]
    UnsupportedOperation { operation: String },

    /// Operation attempted on a closed store
    #[error("store is closed")]
    StoreClosed,

    /// Backend I/O failure
    #[error("Store error: {message}")]
    Store { message: String },

    /// A request was rejected by the limiter
    #[error("rate limit exceeded for resource {resource}")]
    RateLimitExceeded { resource: String },

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl RateLimitError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error naming the offending field
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a store backend error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported<S: Into<String>>(operation: S) -> Self {
        Self::UnsupportedOperation {
            operation: operation.into(),
        }
    }

    /// Create a wait-timeout error
    pub fn wait_timeout<S: Into<String>>(resource: S) -> Self {
        Self::WaitTimeout {
            resource: resource.into(),
        }
    }

    /// Whether the caller may retry after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RateLimitError::WaitTimeout { .. }
                | RateLimitError::RateLimitExceeded { .. }
                | RateLimitError::Store { .. }
        )
    }
}

/// Result type for rate-limiting operations
pub type Result<T> = std::result::Result<T, RateLimitError>;

impl From<redis::RedisError> for RateLimitError {
    fn from(err: redis::RedisError) -> Self {
        RateLimitError::Store {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RateLimitError {
    fn from(err: serde_json::Error) -> Self {
        RateLimitError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_names_field() {
        let err = RateLimitError::validation("rate", "must be positive");
        assert!(err.to_string().contains("rate"));
    }

    #[test]
    fn test_wait_timeout_names_resource() {
        let err = RateLimitError::wait_timeout("api:/orders");
        assert!(err.to_string().contains("api:/orders"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unsupported_operation() {
        let err = RateLimitError::unsupported("eval");
        assert!(err.to_string().contains("eval"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_store_closed_is_terminal() {
        assert!(!RateLimitError::StoreClosed.is_retryable());
    }
}
