//! Messaging configuration

use std::time::Duration;
use crate::error::{Error, Result};

/// Default round trip TTL of a call without explicit QoS
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Upper bound for any message TTL (30 days)
pub const DEFAULT_MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default time budget for provider arbitration
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default pause between arbitration attempts
pub const DEFAULT_DISCOVERY_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Messaging configuration shared by dispatcher, subscription manager and proxies
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    pub default_ttl: Duration,
    pub max_ttl: Duration,
    pub discovery_timeout: Duration,
    pub discovery_retry_interval: Duration,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            max_ttl: DEFAULT_MAX_TTL,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            discovery_retry_interval: DEFAULT_DISCOVERY_RETRY_INTERVAL,
        }
    }
}

impl MessagingConfig {
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn with_discovery_retry_interval(mut self, interval: Duration) -> Self {
        self.discovery_retry_interval = interval;
        self
    }

    /// Check that the values are usable
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(Error::Config("default_ttl must be positive".to_string()));
        }
        if self.max_ttl < self.default_ttl {
            return Err(Error::Config(format!(
                "max_ttl {:?} is below default_ttl {:?}",
                self.max_ttl, self.default_ttl
            )));
        }
        if self.discovery_retry_interval.is_zero() {
            return Err(Error::Config(
                "discovery_retry_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective TTL of a call: the requested TTL or the default, clamped to `max_ttl`
    pub fn effective_ttl(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.default_ttl).min(self.max_ttl)
    }
}
