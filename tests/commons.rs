use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use entity_dispatch::grpc::serve_relay;
use entity_dispatch::grpc::GrpcTransmitter;
use entity_dispatch::init_sled_db_at;
use entity_dispatch::BackoffPolicy;
use entity_dispatch::ChangeClassifier;
use entity_dispatch::ChangeStore;
use entity_dispatch::ChangeType;
use entity_dispatch::ChannelRenderQueue;
use entity_dispatch::ClientChangeHandler;
use entity_dispatch::DiffOp;
use entity_dispatch::DiffPayload;
use entity_dispatch::DispatchConfig;
use entity_dispatch::Dispatcher;
use entity_dispatch::EntityDiff;
use entity_dispatch::EntityId;
use entity_dispatch::Invalidator;
use entity_dispatch::NetworkConfig;
use entity_dispatch::NewChange;
use entity_dispatch::PageId;
use entity_dispatch::PurgeJob;
use entity_dispatch::RejectedLog;
use entity_dispatch::SiteEntry;
use entity_dispatch::SiteId;
use entity_dispatch::SiteLeases;
use entity_dispatch::SitesConfig;
use entity_dispatch::SledChangeStore;
use entity_dispatch::SledCursorStore;
use entity_dispatch::SledSubscriptionRegistry;
use entity_dispatch::StaticSiteRegistry;
use entity_dispatch::UsageAspect;
use entity_dispatch::UsageTracker;
use entity_dispatch::UserIdentity;
use entity_dispatch::ValueChange;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub const REPO: &str = "wikidatawiki";
pub const CLIENT: &str = "enwiki";
pub const CACHE_CAPACITY: u64 = 1024 * 1024;

/// Delivery policy with short delays so retries happen within a test.
pub fn fast_delivery() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 0,
        timeout_ms: 2_000,
        base_delay_ms: 20,
        max_delay_ms: 100,
    }
}

pub fn site(id: &str) -> SiteId {
    SiteId::new(id).expect("valid site id")
}

pub fn entity(id: &str) -> EntityId {
    id.parse().expect("valid entity id")
}

pub fn label_change(
    entity_id: &str,
    revision_id: u64,
) -> NewChange {
    change_with(entity_id, revision_id, DiffOp::Label {
        language: "en".to_string(),
        change: ValueChange::Added(format!("label r{revision_id}")),
    })
}

pub fn sitelink_change(
    entity_id: &str,
    revision_id: u64,
) -> NewChange {
    change_with(entity_id, revision_id, DiffOp::Sitelink {
        site: CLIENT.to_string(),
        change: ValueChange::Added("Douglas Adams".to_string()),
        badges_added: Vec::new(),
        badges_removed: Vec::new(),
    })
}

fn change_with(
    entity_id: &str,
    revision_id: u64,
    op: DiffOp,
) -> NewChange {
    NewChange {
        entity_id: entity(entity_id),
        revision_id,
        timestamp_ms: 1_700_000_000_000 + revision_id,
        change_type: ChangeType::Modify,
        user: UserIdentity {
            user_id: 7,
            user_name: "Editor".to_string(),
            is_bot: false,
        },
        diff: DiffPayload::V1(EntityDiff::new(vec![op])),
    }
}

/// A client wiki with its relay listening on an ephemeral port.
pub struct ClientSite {
    pub addr: SocketAddr,
    pub tracker: Arc<UsageTracker>,
    pub invalidator: Arc<Invalidator>,
    pub jobs: mpsc::Receiver<PurgeJob>,
    shutdown: watch::Sender<()>,
    server: JoinHandle<()>,
    _dir: TempDir,
}

impl ClientSite {
    pub async fn start(usages: &[(u64, &str, UsageAspect)]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
        Self::start_on(listener, usages).await
    }

    pub async fn start_on(
        listener: TcpListener,
        usages: &[(u64, &str, UsageAspect)],
    ) -> Self {
        let dir = tempfile::tempdir().expect("client dir");
        let db = init_sled_db_at(dir.path(), CACHE_CAPACITY, None).expect("client db");

        let tracker = Arc::new(UsageTracker::open(&db).expect("usage tracker"));
        for (page, entity_id, aspect) in usages {
            tracker
                .record_page_usages(PageId(*page), &[(entity(entity_id), *aspect)])
                .expect("record usage");
        }
        let (queue, jobs) = ChannelRenderQueue::new(64);
        let invalidator = Arc::new(Invalidator::new(&db, tracker.clone(), Arc::new(queue)).expect("invalidator"));
        let handler = Arc::new(ClientChangeHandler::new(
            site(CLIENT),
            ChangeClassifier::new(site(REPO)),
            invalidator.clone(),
        ));

        let addr = listener.local_addr().expect("local addr");
        let (shutdown, rx) = watch::channel(());
        let server = tokio::spawn(async move {
            serve_relay(listener, handler, rx).await.expect("relay stopped with error");
        });

        Self {
            addr,
            tracker,
            invalidator,
            jobs,
            shutdown,
            server,
            _dir: dir,
        }
    }

    pub fn drain_jobs(&mut self) -> Vec<PurgeJob> {
        let mut out = Vec::new();
        while let Ok(job) = self.jobs.try_recv() {
            out.push(job);
        }
        out
    }

    pub async fn stop(self) {
        self.shutdown.send(()).ok();
        self.server.await.ok();
    }
}

/// Repository side wired to one client endpoint over gRPC.
pub struct Repository {
    pub changes: Arc<SledChangeStore>,
    pub cursors: Arc<SledCursorStore>,
    pub subscriptions: Arc<SledSubscriptionRegistry>,
    pub rejected: Arc<RejectedLog>,
    pub dispatcher: Dispatcher,
    _dir: TempDir,
}

impl Repository {
    pub fn new(client_addr: SocketAddr) -> Self {
        let dir = tempfile::tempdir().expect("repo dir");
        let db = init_sled_db_at(dir.path(), CACHE_CAPACITY, None).expect("repo db");

        let cursors = Arc::new(SledCursorStore::open(&db).expect("cursors"));
        let changes = Arc::new(SledChangeStore::open(&db, cursors.clone()).expect("changes"));
        let subscriptions = Arc::new(SledSubscriptionRegistry::open(&db).expect("subscriptions"));
        let rejected = Arc::new(RejectedLog::open(&db).expect("rejected log"));

        let sites = SitesConfig {
            clients: vec![SiteEntry {
                id: CLIENT.to_string(),
                endpoint: format!("http://{client_addr}"),
            }],
        };
        let registry = Arc::new(StaticSiteRegistry::from_config(&sites).expect("site registry"));
        let network = NetworkConfig {
            connect_timeout_in_ms: 500,
            request_timeout_in_ms: 2_000,
            ..Default::default()
        };
        let transmitter = Arc::new(GrpcTransmitter::new(site(REPO), registry, network));

        let dispatcher = Dispatcher::new(
            changes.clone(),
            cursors.clone(),
            subscriptions.clone(),
            transmitter,
            rejected.clone(),
            Arc::new(SiteLeases::new()),
            DispatchConfig {
                batch_size: 2,
                scan_window: 10,
                ..Default::default()
            },
            fast_delivery(),
        );

        Self {
            changes,
            cursors,
            subscriptions,
            rejected,
            dispatcher,
            _dir: dir,
        }
    }

    pub async fn append(
        &self,
        changes: Vec<NewChange>,
    ) {
        self.changes.append_batch(changes).await.expect("append");
    }
}

pub async fn wait(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
