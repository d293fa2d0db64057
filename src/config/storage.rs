use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use super::validate_directory;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory of the sled database
    #[serde(default = "default_db_dir")]
    pub db_root_dir: PathBuf,

    /// Directory for log files written by the daemon
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// sled page cache size in bytes
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity_in_bytes: u64,

    /// Background flush interval; 0 disables periodic flushing
    #[serde(default = "default_flush_every_ms")]
    pub flush_every_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_root_dir: default_db_dir(),
            log_dir: default_log_dir(),
            cache_capacity_in_bytes: default_cache_capacity(),
            flush_every_ms: default_flush_every_ms(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        validate_directory(&self.db_root_dir, "db_root_dir")?;
        validate_directory(&self.log_dir, "log_dir")?;

        if self.cache_capacity_in_bytes < 1024 * 1024 {
            return Err(config_error("cache_capacity_in_bytes must be at least 1MB"));
        }
        Ok(())
    }

    pub fn flush_every(&self) -> Option<u64> {
        (self.flush_every_ms > 0).then_some(self.flush_every_ms)
    }
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("./db")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}
fn default_cache_capacity() -> u64 {
    64 * 1024 * 1024
}
fn default_flush_every_ms() -> u64 {
    10
}
