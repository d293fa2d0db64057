use std::path::Path;
use std::sync::Arc;

use entity_dispatch::async_task::spawn_task;
use entity_dispatch::grpc::serve_relay;
use entity_dispatch::grpc::GrpcTransmitter;
use entity_dispatch::init_sled_db;
use entity_dispatch::log_purge_jobs;
use entity_dispatch::start_server;
use entity_dispatch::ChangeClassifier;
use entity_dispatch::ChangeIngestor;
use entity_dispatch::ChannelRenderQueue;
use entity_dispatch::ClientChangeHandler;
use entity_dispatch::DispatchNodeConfig;
use entity_dispatch::DispatchWorker;
use entity_dispatch::Dispatcher;
use entity_dispatch::Error;
use entity_dispatch::Invalidator;
use entity_dispatch::PruneTask;
use entity_dispatch::RejectedLog;
use entity_dispatch::Result;
use entity_dispatch::SiteId;
use entity_dispatch::SiteLeases;
use entity_dispatch::SledChangeStore;
use entity_dispatch::SledCursorStore;
use entity_dispatch::SledSubscriptionRegistry;
use entity_dispatch::StaticSiteRegistry;
use entity_dispatch::UsageTracker;
use tokio::net::TcpListener;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> Result<()> {
    let settings = DispatchNodeConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&settings.storage.log_dir)?;
    info!(?settings, "starting dispatch daemon");

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    let db = init_sled_db(&settings.storage).map_err(|e| Error::Fatal(format!("open database: {e}")))?;
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    if settings.monitoring.prometheus_enabled {
        let port = settings.monitoring.prometheus_port;
        let rx = graceful_rx.clone();
        handles.push(tokio::spawn(async move { start_server(port, rx).await }));
    }

    // Edit-path handle; dropping it stops the ingest worker.
    let _ingestor = if settings.dispatch.enabled {
        Some(start_repository_side(&settings, &db, &graceful_rx, &mut handles)?)
    } else {
        None
    };

    if settings.client.enabled {
        start_client_side(&settings, &db, &graceful_rx, &mut handles).await?;
    }

    info!("Application started. Waiting for CTRL+C signal...");
    if let Err(e) = graceful_shutdown(graceful_tx).await {
        error!("Failed to shutdown: {:?}", e);
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!(?e, "task did not stop cleanly");
        }
    }
    if let Err(e) = db.flush_async().await {
        error!(?e, "final flush failed");
    }

    info!("Exiting program.");
    Ok(())
}

fn start_repository_side(
    settings: &DispatchNodeConfig,
    db: &sled::Db,
    shutdown: &watch::Receiver<()>,
    handles: &mut Vec<JoinHandle<()>>,
) -> Result<ChangeIngestor> {
    let cursors = Arc::new(SledCursorStore::open(db)?);
    let changes = Arc::new(SledChangeStore::open(db, cursors.clone())?);
    let subscriptions = Arc::new(SledSubscriptionRegistry::open(db)?);
    let rejected = Arc::new(RejectedLog::open(db)?);
    let sites = Arc::new(StaticSiteRegistry::from_config(&settings.sites)?);
    let repo_site_id = SiteId::new(settings.dispatch.repo_site_id.clone())?;

    let (ingestor, ingest_worker) = ChangeIngestor::new(changes.clone(), &settings.dispatch, &settings.retry);
    let rx = shutdown.clone();
    spawn_task("ingestor", move || ingest_worker.run(rx), Some(&mut *handles));

    let transmitter = Arc::new(GrpcTransmitter::new(
        repo_site_id,
        sites.clone(),
        settings.network.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        changes.clone(),
        cursors.clone(),
        subscriptions.clone(),
        transmitter,
        rejected,
        Arc::new(SiteLeases::new()),
        settings.dispatch.clone(),
        settings.retry.delivery,
    ));

    for _ in 0..settings.dispatch.workers {
        let worker = DispatchWorker::new(
            dispatcher.clone(),
            sites.clone(),
            subscriptions.clone(),
            settings.dispatch.cycle_interval(),
        );
        let name = worker.id().to_string();
        let rx = shutdown.clone();
        spawn_task(&name, move || worker.run(rx), Some(&mut *handles));
    }

    if let Some(interval) = settings.dispatch.prune_interval() {
        let prune = PruneTask::new(changes, cursors, subscriptions, interval, settings.retry.store);
        let rx = shutdown.clone();
        spawn_task("prune", move || prune.run(rx), Some(&mut *handles));
    }

    info!(workers = settings.dispatch.workers, "repository side started");
    Ok(ingestor)
}

async fn start_client_side(
    settings: &DispatchNodeConfig,
    db: &sled::Db,
    shutdown: &watch::Receiver<()>,
    handles: &mut Vec<JoinHandle<()>>,
) -> Result<()> {
    let client = &settings.client;
    let tracker = Arc::new(UsageTracker::open(db)?);
    let (queue, jobs) = ChannelRenderQueue::new(client.render_queue_capacity);
    let invalidator = Arc::new(Invalidator::new(db, tracker, Arc::new(queue))?);
    let handler = Arc::new(ClientChangeHandler::new(
        SiteId::new(client.site_id.clone())?,
        ChangeClassifier::new(SiteId::new(client.repo_site_id.clone())?),
        invalidator,
    ));

    let rx = shutdown.clone();
    handles.push(tokio::spawn(log_purge_jobs(jobs, rx)));

    let listener = TcpListener::bind(client.listen_address)
        .await
        .map_err(|e| Error::Fatal(format!("bind {}: {e}", client.listen_address)))?;
    let rx = shutdown.clone();
    spawn_task("relay", move || serve_relay(listener, handler, rx), Some(&mut *handles));

    info!(site = %client.site_id, "client side started");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint =
        signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(format!("install SIGINT handler: {e}")))?;
    let mut sigterm =
        signal(SignalKind::terminate()).map_err(|e| Error::Fatal(format!("install SIGTERM handler: {e}")))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    info!("Shutdown server..");
    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::Fatal(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown completed");
    Ok(())
}

pub fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| Error::Fatal(format!("create log dir {}: {e}", log_dir.display())))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "dispatch.log");

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
