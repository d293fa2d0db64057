//! Asynchronous hand-off from the edit path to the change log.
//!
//! [`ChangeIngestor::record`] never waits on storage: it only places the
//! mutation into a bounded queue. The [`IngestWorker`] drains the queue in
//! batches and appends them, retrying for as long as the store is down.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::BatchBuffer;
use crate::constants::INGEST_FLUSH_INTERVAL;
use crate::BackoffPolicy;
use crate::ChangeStore;
use crate::DispatchConfig;
use crate::Error;
use crate::NewChange;
use crate::Result;
use crate::RetryPolicies;
use crate::SystemError;
use crate::STORE_FAILURES_METRIC;
use crate::STORE_UNAVAILABLE_ALERT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued,
    /// Queue at capacity; the caller decides whether to retry
    QueueFull,
    /// The worker is gone
    Closed,
}

/// Edit-path handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChangeIngestor {
    tx: mpsc::Sender<NewChange>,
}

impl ChangeIngestor {
    pub fn new(
        store: Arc<dyn ChangeStore>,
        config: &DispatchConfig,
        retry: &RetryPolicies,
    ) -> (Self, IngestWorker) {
        let (tx, rx) = mpsc::channel(config.ingest_queue_capacity);
        let worker = IngestWorker {
            rx,
            store,
            batch_size: config.ingest_batch_size,
            flush_interval: INGEST_FLUSH_INTERVAL,
            policy: retry.store,
            alert_threshold: retry.store_failure_alert_threshold,
            failures: 0,
        };
        (Self { tx }, worker)
    }

    pub fn record(
        &self,
        change: NewChange,
    ) -> IngestOutcome {
        match self.tx.try_send(change) {
            Ok(()) => IngestOutcome::Queued,
            Err(TrySendError::Full(change)) => {
                warn!(entity_id = %change.entity_id, "ingest queue full");
                IngestOutcome::QueueFull
            }
            Err(TrySendError::Closed(_)) => IngestOutcome::Closed,
        }
    }
}

pub struct IngestWorker {
    rx: mpsc::Receiver<NewChange>,
    store: Arc<dyn ChangeStore>,
    batch_size: usize,
    flush_interval: Duration,
    policy: BackoffPolicy,
    alert_threshold: u32,
    /// Consecutive failed appends
    failures: u32,
}

impl std::fmt::Debug for IngestWorker {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("IngestWorker")
            .field("batch_size", &self.batch_size)
            .field("failures", &self.failures)
            .finish()
    }
}

impl IngestWorker {
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let mut buffer = BatchBuffer::new(self.batch_size, self.flush_interval);
        let mut ticker = interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    self.drain(&mut buffer).await;
                    info!("ingest worker stopped");
                    return Ok(());
                }
                received = self.rx.recv() => match received {
                    Some(change) => {
                        if buffer.push(change).is_some() {
                            let batch = buffer.take();
                            if let Err(lost) = self.persist(batch, Some(&mut shutdown)).await {
                                self.report_lost(&lost);
                                self.drain(&mut buffer).await;
                                return Ok(());
                            }
                        }
                    }
                    None => {
                        self.drain(&mut buffer).await;
                        info!("ingest queue closed");
                        return Ok(());
                    }
                },
                _ = ticker.tick() => {
                    if buffer.should_flush() {
                        let batch = buffer.take();
                        if let Err(lost) = self.persist(batch, Some(&mut shutdown)).await {
                            self.report_lost(&lost);
                            self.drain(&mut buffer).await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Appends what is still buffered or queued, one attempt per batch.
    async fn drain(
        &mut self,
        buffer: &mut BatchBuffer<NewChange>,
    ) {
        self.rx.close();
        while let Ok(change) = self.rx.try_recv() {
            if buffer.push(change).is_some() {
                let batch = buffer.take();
                if let Err(lost) = self.persist(batch, None).await {
                    self.report_lost(&lost);
                }
            }
        }
        if !buffer.is_empty() {
            let batch = buffer.take();
            if let Err(lost) = self.persist(batch, None).await {
                self.report_lost(&lost);
            }
        }
    }

    /// Appends `batch`, retrying until it is stored.
    ///
    /// With `shutdown == None` only one attempt is made. Hands the batch back
    /// when it could not be stored before shutdown.
    async fn persist(
        &mut self,
        batch: Vec<NewChange>,
        mut shutdown: Option<&mut watch::Receiver<()>>,
    ) -> std::result::Result<(), Vec<NewChange>> {
        loop {
            let attempt = timeout(self.policy.timeout(), self.store.append_batch(batch.clone())).await;
            let err = match attempt {
                Ok(Ok(ids)) => {
                    debug!(count = ids.len(), last = ?ids.last(), "ingested changes");
                    if self.failures >= self.alert_threshold {
                        info!(failures = self.failures, "change store reachable again");
                    }
                    self.failures = 0;
                    STORE_UNAVAILABLE_ALERT.set(0.0);
                    return Ok(());
                }
                Ok(Err(e)) => e,
                Err(_) => Error::System(SystemError::Timeout(self.policy.timeout())),
            };

            self.failures = self.failures.saturating_add(1);
            STORE_FAILURES_METRIC.inc();
            if self.failures >= self.alert_threshold {
                error!(failures = self.failures, ?err, "change store unavailable");
                STORE_UNAVAILABLE_ALERT.set(1.0);
            } else {
                warn!(failures = self.failures, ?err, "append failed, will retry");
            }

            let Some(rx) = shutdown.as_deref_mut() else {
                return Err(batch);
            };
            let delay = self.policy.delay_after(self.failures);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = rx.changed() => return Err(batch),
            }
        }
    }

    fn report_lost(
        &self,
        batch: &[NewChange],
    ) {
        for change in batch {
            error!(
                entity_id = %change.entity_id,
                revision_id = change.revision_id,
                "change not persisted before shutdown"
            );
        }
    }
}
