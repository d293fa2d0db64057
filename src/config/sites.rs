use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use crate::Result;

/// A client wiki and the address of its relay service
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SiteEntry {
    pub id: String,
    pub endpoint: String,
}

/// Static view of the remote site registry
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SitesConfig {
    #[serde(default)]
    pub clients: Vec<SiteEntry>,
}

impl SitesConfig {
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for site in &self.clients {
            if site.id.is_empty() {
                return Err(config_error("site id cannot be empty"));
            }
            if !site.endpoint.starts_with("http://") && !site.endpoint.starts_with("https://") {
                return Err(config_error(format!(
                    "endpoint {:?} of site {} must be an http(s) URI",
                    site.endpoint, site.id
                )));
            }
            if !seen.insert(site.id.as_str()) {
                return Err(config_error(format!("Duplicate site id {} in sites.clients", site.id)));
            }
        }
        Ok(())
    }
}
