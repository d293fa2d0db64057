use std::net::SocketAddr;

use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use crate::Result;

/// Settings of the client-side relay: the process that receives batches for
/// one client wiki and turns them into purge jobs.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Global id of this client wiki
    #[serde(default = "default_site_id")]
    pub site_id: String,

    /// Only changes from this repository are applied
    #[serde(default = "default_repo_site_id")]
    pub repo_site_id: String,

    #[serde(default = "default_listen_addr")]
    pub listen_address: SocketAddr,

    /// Capacity of the purge job queue towards the rendering layer
    #[serde(default = "default_render_queue_capacity")]
    pub render_queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            site_id: default_site_id(),
            repo_site_id: default_repo_site_id(),
            listen_address: default_listen_addr(),
            render_queue_capacity: default_render_queue_capacity(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.site_id.is_empty() || self.repo_site_id.is_empty() {
            return Err(config_error("client site_id and repo_site_id cannot be empty"));
        }
        if self.listen_address.port() == 0 {
            return Err(config_error("client listen_address needs an explicit port"));
        }
        if self.render_queue_capacity == 0 {
            return Err(config_error("render_queue_capacity must be > 0"));
        }
        Ok(())
    }
}

fn default_site_id() -> String {
    "enwiki".to_string()
}
fn default_repo_site_id() -> String {
    "wikidatawiki".to_string()
}
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9191))
}
fn default_render_queue_capacity() -> usize {
    10_000
}
