use std::collections::BTreeMap;

#[cfg(test)]
use mockall::automock;

use crate::Result;
use crate::SiteId;
use crate::SitesConfig;

/// Known client sites and their relay endpoints.
#[cfg_attr(test, automock)]
pub trait SiteRegistry: Send + Sync + 'static {
    fn sites(&self) -> Vec<SiteId>;

    fn endpoint(
        &self,
        site: &SiteId,
    ) -> Option<String>;
}

/// Site registry fixed at startup from `[sites]` settings.
#[derive(Debug, Clone, Default)]
pub struct StaticSiteRegistry {
    endpoints: BTreeMap<SiteId, String>,
}

impl StaticSiteRegistry {
    pub fn from_config(config: &SitesConfig) -> Result<Self> {
        let mut endpoints = BTreeMap::new();
        for entry in &config.clients {
            endpoints.insert(SiteId::new(entry.id.clone())?, entry.endpoint.clone());
        }
        Ok(Self { endpoints })
    }
}

impl SiteRegistry for StaticSiteRegistry {
    fn sites(&self) -> Vec<SiteId> {
        self.endpoints.keys().cloned().collect()
    }

    fn endpoint(
        &self,
        site: &SiteId,
    ) -> Option<String> {
        self.endpoints.get(site).cloned()
    }
}
