use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Maximum number of retries (0 means unlimited retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    pub fn is_unlimited(&self) -> bool {
        self.max_retries == 0
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before attempt number `failures + 1`, doubling from the base
    /// and saturating at the cap.
    pub fn delay_after(
        &self,
        failures: u32,
    ) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let shift = (failures - 1).min(32);
        let delay = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(config_error(format!("{name}.base_delay_ms must be > 0")));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(config_error(format!(
                "{name}.max_delay_ms {} must not be below base_delay_ms {}",
                self.max_delay_ms, self.base_delay_ms
            )));
        }
        if self.timeout_ms == 0 {
            return Err(config_error(format!("{name}.timeout_ms must be > 0")));
        }
        Ok(())
    }
}

/// Divide strategies by concern
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    /// Delivery of batches to client sites (transmit timeout + site backoff)
    #[serde(default = "default_delivery")]
    pub delivery: BackoffPolicy,

    /// Access to the durable change store
    #[serde(default = "default_store")]
    pub store: BackoffPolicy,

    /// Consecutive store failures after which an operator alert is raised
    #[serde(default = "default_store_failure_alert_threshold")]
    pub store_failure_alert_threshold: u32,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            delivery: default_delivery(),
            store: default_store(),
            store_failure_alert_threshold: default_store_failure_alert_threshold(),
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.delivery.validate("delivery")?;
        self.store.validate("store")?;
        if self.store_failure_alert_threshold == 0 {
            return Err(config_error("store_failure_alert_threshold must be > 0"));
        }
        Ok(())
    }
}

fn default_delivery() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 30_000,
        base_delay_ms: 1_000,
        max_delay_ms: 300_000,
    }
}
fn default_store() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 5_000,
        base_delay_ms: 100,
        max_delay_ms: 30_000,
    }
}
fn default_store_failure_alert_threshold() -> u32 {
    10
}
fn default_max_retries() -> usize {
    0
}
fn default_op_timeout_ms() -> u64 {
    30_000
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    300_000
}
