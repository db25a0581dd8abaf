//! # Health Checker Module
//!
//! Timeout-bounded reachability probe for the host's health endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::manager::KafkaManager;

/// Default probe timeout
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Reachability probe delegating to [`KafkaManager::ping`]
pub struct KafkaHealthChecker {
    manager: Arc<KafkaManager>,
    timeout: Mutex<Duration>,
}

impl KafkaHealthChecker {
    pub fn new(manager: Arc<KafkaManager>) -> Self {
        Self {
            manager,
            timeout: Mutex::new(DEFAULT_CHECK_TIMEOUT),
        }
    }

    /// Override the probe timeout
    pub fn set_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
    }

    /// The configured probe timeout
    pub fn timeout(&self) -> Duration {
        *self.timeout.lock()
    }
}

#[async_trait]
impl conduit_shared::HealthChecker for KafkaHealthChecker {
    fn name(&self) -> &str {
        "kafka"
    }

    async fn check(&self, ctx: CancellationToken) -> anyhow::Result<()> {
        let timeout = self.timeout();
        debug!(timeout_ms = timeout.as_millis() as u64, "kafka health probe");

        tokio::time::timeout(timeout, self.manager.ping(ctx))
            .await
            .map_err(|_| anyhow::anyhow!("kafka health probe timed out"))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KafkaConfig;
    use conduit_shared::HealthChecker;

    fn checker() -> KafkaHealthChecker {
        let mut config = KafkaConfig::default();
        config.consumer.topics = vec!["events".to_string()];
        let manager = Arc::new(KafkaManager::new(config).unwrap());
        KafkaHealthChecker::new(manager)
    }

    #[test]
    fn test_name_and_default_timeout() {
        let checker = checker();
        assert_eq!(checker.name(), "kafka");
        assert_eq!(checker.timeout(), DEFAULT_CHECK_TIMEOUT);
    }

    #[test]
    fn test_timeout_is_settable() {
        let checker = checker();
        checker.set_timeout(Duration::from_secs(1));
        assert_eq!(checker.timeout(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_check_fails_when_unconnected() {
        let checker = checker();
        let result = checker.check(CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
