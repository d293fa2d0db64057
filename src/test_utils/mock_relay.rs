use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tonic::codec::CompressionEncoding;
use tonic::Request;
use tonic::Response;
use tonic::Status;
use tracing::debug;

use crate::proto::change_relay_server::ChangeRelay;
use crate::proto::change_relay_server::ChangeRelayServer;
use crate::proto::DeliverChangesRequest;
use crate::proto::DeliverChangesResponse;

/// Relay that answers every call with a fixed response and remembers the
/// requests it saw.
#[derive(Debug, Clone)]
pub struct MockRelay {
    pub response: Result<DeliverChangesResponse, Status>,
    pub received: Arc<Mutex<Vec<DeliverChangesRequest>>>,
}

impl MockRelay {
    pub fn answering(response: Result<DeliverChangesResponse, Status>) -> Self {
        Self {
            response,
            received: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[tonic::async_trait]
impl ChangeRelay for MockRelay {
    async fn deliver_changes(
        &self,
        request: Request<DeliverChangesRequest>,
    ) -> std::result::Result<Response<DeliverChangesResponse>, Status> {
        self.received.lock().push(request.into_inner());
        self.response.clone().map(Response::new)
    }
}

/// Serves `relay` on an ephemeral local port until `rx` fires.
pub async fn mock_relay_listener<S: ChangeRelay>(
    relay: S,
    rx: oneshot::Receiver<()>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock relay");
    let addr = listener.local_addr().expect("local addr");
    debug!("starting mock relay on {addr}");

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(
                ChangeRelayServer::new(relay)
                    .accept_compressed(CompressionEncoding::Gzip)
                    .send_compressed(CompressionEncoding::Gzip),
            )
            .serve_with_incoming_shutdown(tokio_stream::wrappers::TcpListenerStream::new(listener), async {
                rx.await.ok();
            })
            .await
            .expect("mock relay terminated");
    });

    addr
}
