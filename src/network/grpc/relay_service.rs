use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::codec::CompressionEncoding;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tracing::debug;
use tracing::info;

use crate::proto::change_relay_server::ChangeRelay;
use crate::proto::change_relay_server::ChangeRelayServer;
use crate::proto::DeliverChangesRequest;
use crate::proto::DeliverChangesResponse;
use crate::ClientChangeHandler;
use crate::Result;

/// `ChangeRelay` service run by a client site.
#[derive(Debug, Clone)]
pub struct ChangeRelayService {
    handler: Arc<ClientChangeHandler>,
}

impl ChangeRelayService {
    pub fn new(handler: Arc<ClientChangeHandler>) -> Self {
        Self { handler }
    }
}

#[tonic::async_trait]
impl ChangeRelay for ChangeRelayService {
    async fn deliver_changes(
        &self,
        request: Request<DeliverChangesRequest>,
    ) -> std::result::Result<Response<DeliverChangesResponse>, Status> {
        let request = request.into_inner();
        debug!(
            repo = %request.repo_site_id,
            len = request.changes.len(),
            "deliver_changes"
        );

        let handler = self.handler.clone();
        let outcomes = tokio::task::spawn_blocking(move || handler.handle(request))
            .await
            .map_err(|e| Status::internal(format!("handler task failed: {e}")))?;

        Ok(Response::new(DeliverChangesResponse { outcomes }))
    }
}

/// Serves the relay for `handler` on `listener` until `shutdown` fires.
pub async fn serve_relay(
    listener: TcpListener,
    handler: Arc<ClientChangeHandler>,
    mut shutdown: watch::Receiver<()>,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "change relay listening");
    }
    tonic::transport::Server::builder()
        .add_service(
            ChangeRelayServer::new(ChangeRelayService::new(handler))
                .accept_compressed(CompressionEncoding::Gzip)
                .send_compressed(CompressionEncoding::Gzip),
        )
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    info!("change relay stopped");
    Ok(())
}
