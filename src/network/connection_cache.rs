use dashmap::DashMap;
use tonic::transport::Channel;
use tonic::transport::Endpoint;
use tracing::debug;
use tracing::trace;

use crate::NetworkConfig;
use crate::NetworkError;
use crate::Result;
use crate::SiteId;

/// Cached gRPC channel with the endpoint it was built for
#[derive(Clone)]
pub(crate) struct CachedChannel {
    pub(crate) channel: Channel,
    pub(crate) endpoint: String,
}

/// Per-site channel cache. A channel is rebuilt when the site's endpoint
/// changes or after it was evicted following a connect failure.
pub(crate) struct ConnectionCache {
    pub(crate) cache: DashMap<SiteId, CachedChannel>,
    config: NetworkConfig,
}

impl ConnectionCache {
    pub(crate) fn new(config: NetworkConfig) -> Self {
        Self {
            cache: DashMap::new(),
            config,
        }
    }

    pub(crate) async fn get_channel(
        &self,
        site: &SiteId,
        endpoint: String,
    ) -> Result<Channel> {
        if let Some(cached) = self.cache.get(site) {
            if cached.endpoint == endpoint {
                return Ok(cached.channel.clone());
            }
        }

        debug!(%site, %endpoint, "Establishing new gRPC connection");
        let channel = self.create_channel(site, endpoint.clone()).await?;

        trace!(%site, "Cache updated");
        self.cache.insert(
            site.clone(),
            CachedChannel {
                channel: channel.clone(),
                endpoint,
            },
        );
        Ok(channel)
    }

    async fn create_channel(
        &self,
        site: &SiteId,
        endpoint: String,
    ) -> Result<Channel> {
        Endpoint::try_from(endpoint.clone())
            .map_err(|_| NetworkError::InvalidURI(endpoint))?
            .connect_timeout(self.config.connect_timeout())
            .timeout(self.config.request_timeout())
            .concurrency_limit(self.config.concurrency_limit)
            .tcp_nodelay(self.config.tcp_nodelay)
            .tcp_keepalive(Some(std::time::Duration::from_secs(self.config.tcp_keepalive_in_secs)))
            .http2_keep_alive_interval(std::time::Duration::from_secs(
                self.config.http2_keep_alive_interval_in_secs,
            ))
            .keep_alive_timeout(std::time::Duration::from_secs(
                self.config.http2_keep_alive_timeout_in_secs,
            ))
            .connect()
            .await
            .map_err(|e| {
                NetworkError::ChannelUnavailable {
                    site: site.clone(),
                    reason: e.to_string(),
                }
                .into()
            })
    }

    pub(crate) fn evict(
        &self,
        site: &SiteId,
    ) {
        self.cache.remove(site);
    }
}
