use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use crate::Result;

/// Dispatcher tuning. Every value here is a default, not a protocol constant.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Run dispatch workers in this process
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Global id of the repository the changes originate from
    #[serde(default = "default_repo_site_id")]
    pub repo_site_id: String,

    /// Maximum number of relevant changes handed to the transmitter at once
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of changes read from the store per scan step while filtering
    #[serde(default = "default_scan_window")]
    pub scan_window: usize,

    /// Upper bound of batches sent to one site within a single cycle
    #[serde(default = "default_max_batches_per_cycle")]
    pub max_batches_per_cycle: usize,

    /// Pause between two dispatch passes over all sites
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,

    /// Number of concurrent dispatch workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Lease duration; an expired lease can be taken over by another worker
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,

    /// Skip rejected entries (recording them) instead of blocking the site
    #[serde(default = "default_skip_rejected")]
    pub skip_rejected: bool,

    /// Interval of the background prune task; 0 disables pruning
    #[serde(default = "default_prune_interval_ms")]
    pub prune_interval_ms: u64,

    /// Capacity of the ingest queue between the edit path and the store
    #[serde(default = "default_ingest_queue_capacity")]
    pub ingest_queue_capacity: usize,

    /// Maximum number of queued mutations appended in one go
    #[serde(default = "default_ingest_batch_size")]
    pub ingest_batch_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            repo_site_id: default_repo_site_id(),
            batch_size: default_batch_size(),
            scan_window: default_scan_window(),
            max_batches_per_cycle: default_max_batches_per_cycle(),
            cycle_interval_ms: default_cycle_interval_ms(),
            workers: default_workers(),
            lease_ttl_ms: default_lease_ttl_ms(),
            skip_rejected: default_skip_rejected(),
            prune_interval_ms: default_prune_interval_ms(),
            ingest_queue_capacity: default_ingest_queue_capacity(),
            ingest_batch_size: default_ingest_batch_size(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.repo_site_id.is_empty() {
            return Err(config_error("repo_site_id cannot be empty"));
        }
        if self.batch_size == 0 {
            return Err(config_error("batch_size must be > 0"));
        }
        if self.scan_window == 0 {
            return Err(config_error("scan_window must be > 0"));
        }
        if self.scan_window < self.batch_size {
            return Err(config_error(format!(
                "scan_window {} must be at least batch_size {}",
                self.scan_window, self.batch_size
            )));
        }
        if self.max_batches_per_cycle == 0 {
            return Err(config_error("max_batches_per_cycle must be > 0"));
        }
        if self.workers == 0 {
            return Err(config_error("workers must be > 0"));
        }
        if self.cycle_interval_ms == 0 {
            return Err(config_error("cycle_interval_ms cannot be 0"));
        }
        if self.lease_ttl_ms <= self.cycle_interval_ms {
            return Err(config_error(format!(
                "lease_ttl_ms {}ms should be greater than cycle_interval_ms {}ms",
                self.lease_ttl_ms, self.cycle_interval_ms
            )));
        }
        if self.ingest_queue_capacity == 0 || self.ingest_batch_size == 0 {
            return Err(config_error("ingest queue capacity and batch size must be > 0"));
        }
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }

    pub fn prune_interval(&self) -> Option<Duration> {
        (self.prune_interval_ms > 0).then(|| Duration::from_millis(self.prune_interval_ms))
    }
}

fn default_enabled() -> bool {
    true
}
fn default_repo_site_id() -> String {
    "wikidatawiki".to_string()
}
fn default_batch_size() -> usize {
    300
}
fn default_scan_window() -> usize {
    1000
}
fn default_max_batches_per_cycle() -> usize {
    10
}
fn default_cycle_interval_ms() -> u64 {
    500
}
fn default_workers() -> usize {
    2
}
// long enough to cover a 30s transmit plus bookkeeping
fn default_lease_ttl_ms() -> u64 {
    60_000
}
fn default_skip_rejected() -> bool {
    true
}
fn default_prune_interval_ms() -> u64 {
    60_000
}
fn default_ingest_queue_capacity() -> usize {
    10_000
}
fn default_ingest_batch_size() -> usize {
    100
}
