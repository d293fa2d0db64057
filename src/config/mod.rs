//! Configuration management for the change dispatch daemon.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Section-wise validation
mod client;
mod dispatch;
mod monitoring;
mod network;
mod retry;
mod sites;
mod storage;
use std::fmt::Debug;
use std::path::Path;

pub use client::*;
pub use dispatch::*;
pub use monitoring::*;
pub use network::*;
pub use retry::*;
pub use sites::*;
pub use storage::*;
use std::env;

use config::Config;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Environment variable prefix, e.g. `DISPATCH__DISPATCH__BATCH_SIZE=500`
pub const ENV_PREFIX: &str = "DISPATCH";

/// Main configuration container for the dispatch daemon
///
/// Sources, lowest priority first:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables with the `DISPATCH__` prefix
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct DispatchNodeConfig {
    /// Durable storage location and tuning
    #[serde(default)]
    pub storage: StorageConfig,
    /// Dispatcher batching, workers and leases
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Retry policies for delivery and store access
    #[serde(default)]
    pub retry: RetryPolicies,
    /// Transport parameters for reaching client sites
    #[serde(default)]
    pub network: NetworkConfig,
    /// Known client sites and their relay endpoints
    #[serde(default)]
    pub sites: SitesConfig,
    /// Client-side relay service
    #[serde(default)]
    pub client: ClientConfig,
    /// Metrics exporter
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Debug for DispatchNodeConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DispatchNodeConfig")
            .field("storage", &self.storage)
            .field("dispatch", &self.dispatch)
            .finish()
    }
}

impl DispatchNodeConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call `validate()` once all overrides are applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("CONFIG_PATH", "config/dispatch.toml");
    /// std::env::set_var("DISPATCH__DISPATCH__BATCH_SIZE", "500");
    /// let cfg = DispatchNodeConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.storage.validate()?;
        self.dispatch.validate()?;
        self.retry.validate()?;
        self.network.validate()?;
        self.sites.validate()?;
        self.client.validate()?;
        self.monitoring.validate()?;
        self.validate_lease_covers_transmit()?;
        Ok(self)
    }

    /// A lease is renewed before each transmission only, so it has to outlive
    /// the longest one. Otherwise another worker can take the site while a
    /// batch is still in flight.
    fn validate_lease_covers_transmit(&self) -> Result<()> {
        let required = self.retry.delivery.timeout() + crate::constants::LEASE_TRANSMIT_MARGIN;
        if self.dispatch.lease_ttl() <= required {
            return Err(config_error(format!(
                "dispatch.lease_ttl_ms {}ms should be greater than retry.delivery.timeout_ms {}ms plus {}ms",
                self.dispatch.lease_ttl_ms,
                self.retry.delivery.timeout_ms,
                crate::constants::LEASE_TRANSMIT_MARGIN.as_millis()
            )));
        }
        Ok(())
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

pub(crate) fn config_error(msg: impl Into<String>) -> Error {
    Error::Config(ConfigError::Message(msg.into()))
}

/// Ensures directory path is valid and writable
pub(super) fn validate_directory(
    path: &Path,
    name: &str,
) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(config_error(format!("{name} path cannot be empty")));
    }

    #[cfg(not(test))]
    {
        use std::fs;
        if !path.exists() {
            fs::create_dir_all(path).map_err(|e| {
                config_error(format!(
                    "Failed to create {} directory at {}: {}",
                    name,
                    path.display(),
                    e
                ))
            })?;
        }

        let test_file = path.join(".permission_test");
        fs::write(&test_file, b"test").map_err(|e| {
            config_error(format!(
                "No write permission in {} directory {}: {}",
                name,
                path.display(),
                e
            ))
        })?;
        fs::remove_file(&test_file).ok();
    }

    Ok(())
}
