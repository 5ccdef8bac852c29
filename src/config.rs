use crate::error::{RegistrationError, Result};
use chrono::Duration as TimeDelta;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Longest hold an unpaid order may keep on capacity: one week.
pub const MAX_ORDER_TTL_MINUTES: i64 = 7 * 24 * 60;

/// Engine tunables. Every field has a default so a config file only needs the
/// values it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Shared secret for gateway request and callback signatures.
    pub gateway_secret: String,
    pub order_ttl_minutes: i64,
    pub sweep_interval_secs: u64,
    pub capacity_retry_attempts: u32,
    pub capacity_retry_backoff_ms: u64,
    pub capacity_lock_timeout_ms: u64,
    pub reconcile_max_attempts: u32,
    /// Polling contract published to clients waiting on an order.
    pub poll_interval_secs: u64,
    pub poll_backoff_max_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gateway_secret: String::new(),
            order_ttl_minutes: 30,
            sweep_interval_secs: 60,
            capacity_retry_attempts: 3,
            capacity_retry_backoff_ms: 10,
            capacity_lock_timeout_ms: 250,
            reconcile_max_attempts: 5,
            poll_interval_secs: 3,
            poll_backoff_max_secs: 30,
        }
    }
}

impl EngineConfig {
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            gateway_secret: secret.into(),
            ..Self::default()
        }
    }

    /// Reads a JSON config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let config: Self = serde_json::from_slice(&bytes)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway_secret.is_empty() {
            return Err(RegistrationError::ValidationError(
                "gateway_secret must be set".to_string(),
            ));
        }
        if self.order_ttl_minutes <= 0 {
            return Err(RegistrationError::ValidationError(
                "order_ttl_minutes must be positive".to_string(),
            ));
        }
        if self.order_ttl_minutes > MAX_ORDER_TTL_MINUTES {
            return Err(RegistrationError::ValidationError(format!(
                "order_ttl_minutes must be at most {MAX_ORDER_TTL_MINUTES}"
            )));
        }
        if self.reconcile_max_attempts == 0 {
            return Err(RegistrationError::ValidationError(
                "reconcile_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn order_ttl(&self) -> TimeDelta {
        TimeDelta::minutes(self.order_ttl_minutes)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn capacity_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.capacity_lock_timeout_ms)
    }

    /// Backoff before retry `attempt` (0-based) of a contended capacity lock.
    pub fn capacity_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.capacity_retry_backoff_ms.saturating_mul(1 << attempt.min(6)))
    }
}
