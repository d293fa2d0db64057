use std::sync::Arc;

use tonic::async_trait;
use tonic::codec::CompressionEncoding;
use tonic::Code;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::network::ConnectionCache;
use crate::proto;
use crate::proto::change_relay_client::ChangeRelayClient;
use crate::proto::ChangeRecord;
use crate::proto::DeliverChangesRequest;
use crate::Change;
use crate::ChangeId;
use crate::DeliveryStatus;
use crate::EntryOutcome;
use crate::NetworkConfig;
use crate::NetworkError;
use crate::Result;
use crate::SiteId;
use crate::SiteRegistry;
use crate::TransmitReport;
use crate::Transmitter;

/// Sends batches to client sites over the `ChangeRelay` service.
pub struct GrpcTransmitter {
    repo_site_id: SiteId,
    sites: Arc<dyn SiteRegistry>,
    connections: ConnectionCache,
    enable_compression: bool,
}

impl std::fmt::Debug for GrpcTransmitter {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("GrpcTransmitter")
            .field("repo_site_id", &self.repo_site_id)
            .field("cached_channels", &self.connections.cache.len())
            .finish()
    }
}

impl GrpcTransmitter {
    pub fn new(
        repo_site_id: SiteId,
        sites: Arc<dyn SiteRegistry>,
        config: NetworkConfig,
    ) -> Self {
        Self {
            repo_site_id,
            sites,
            enable_compression: config.enable_compression,
            connections: ConnectionCache::new(config),
        }
    }
}

fn outcome_from_wire(outcome: proto::EntryOutcome) -> EntryOutcome {
    let status = match outcome.status() {
        proto::DeliveryStatus::Delivered => DeliveryStatus::Delivered,
        proto::DeliveryStatus::Rejected => DeliveryStatus::Rejected { reason: outcome.reason },
        proto::DeliveryStatus::TransientFailure => DeliveryStatus::TransientFailure { reason: outcome.reason },
        proto::DeliveryStatus::Unspecified => DeliveryStatus::TransientFailure {
            reason: "unspecified delivery status".to_string(),
        },
    };
    EntryOutcome {
        change_id: ChangeId(outcome.change_id),
        status,
    }
}

#[async_trait]
impl Transmitter for GrpcTransmitter {
    #[instrument(skip(self, batch), fields(len = batch.len()))]
    async fn transmit(
        &self,
        site: &SiteId,
        batch: &[Change],
    ) -> Result<TransmitReport> {
        let endpoint = self
            .sites
            .endpoint(site)
            .ok_or_else(|| NetworkError::UnknownSite(site.clone()))?;
        let channel = self.connections.get_channel(site, endpoint).await?;

        let mut client = ChangeRelayClient::new(channel);
        if self.enable_compression {
            client = client
                .send_compressed(CompressionEncoding::Gzip)
                .accept_compressed(CompressionEncoding::Gzip);
        }

        let changes = batch
            .iter()
            .map(ChangeRecord::from_change)
            .collect::<Result<Vec<_>>>()?;
        let request = DeliverChangesRequest {
            repo_site_id: self.repo_site_id.to_string(),
            target_site_id: site.to_string(),
            changes,
        };

        match client.deliver_changes(tonic::Request::new(request)).await {
            Ok(response) => {
                let outcomes: Vec<EntryOutcome> =
                    response.into_inner().outcomes.into_iter().map(outcome_from_wire).collect();
                debug!(%site, reported = outcomes.len(), "batch acknowledged");
                Ok(TransmitReport { outcomes })
            }
            Err(status) if status.code() == Code::Unavailable => {
                warn!(%site, ?status, "site unreachable");
                self.connections.evict(site);
                Err(NetworkError::ChannelUnavailable {
                    site: site.clone(),
                    reason: status.message().to_string(),
                }
                .into())
            }
            Err(status) => Err(NetworkError::TonicStatusError(Box::new(status)).into()),
        }
    }
}
