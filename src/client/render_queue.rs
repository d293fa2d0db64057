use std::collections::BTreeSet;

#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::info;
use tracing::warn;

use crate::ChangeId;
use crate::EntityId;
use crate::PageId;
use crate::Result;
use crate::SystemError;

/// Re-render request for one local page. Idempotent for the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeJob {
    pub page: PageId,
    /// Entities whose changes caused the purge
    pub entity_ids: BTreeSet<EntityId>,
    pub change_ids: Vec<ChangeId>,
}

/// Cache/rendering layer of the client wiki. Submission is fire-and-forget.
#[cfg_attr(test, automock)]
pub trait RenderQueue: Send + Sync + 'static {
    fn submit(
        &self,
        job: PurgeJob,
    ) -> Result<()>;
}

/// Render queue backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelRenderQueue {
    tx: mpsc::Sender<PurgeJob>,
}

impl ChannelRenderQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PurgeJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl RenderQueue for ChannelRenderQueue {
    fn submit(
        &self,
        job: PurgeJob,
    ) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SystemError::QueueFull("render").into(),
            mpsc::error::TrySendError::Closed(_) => SystemError::QueueClosed("render").into(),
        })
    }
}

/// Consumer used by the daemon when no rendering layer is attached: logs
/// every job until shutdown.
pub async fn log_purge_jobs(
    mut rx: mpsc::Receiver<PurgeJob>,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                warn!("render queue consumer stopped");
                return;
            }
            job = rx.recv() => match job {
                Some(job) => info!(page = %job.page, entities = ?job.entity_ids, "purge page"),
                None => return,
            }
        }
    }
}
