//! Per-site dispatch cycle.
//!
//! One cycle reads the changes after a site's cursor, keeps those matching
//! the site's subscriptions, and transmits them in ordered batches. The
//! cursor only moves past a batch once every entry of it was delivered (or
//! rejected, when rejected entries are skipped). Any transient failure leaves
//! the cursor at its pre-batch value; the whole batch goes out again after a
//! backoff delay.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::LeaseGuard;
use super::SiteLeases;
use crate::BackoffPolicy;
use crate::Change;
use crate::ChangeId;
use crate::ChangeStore;
use crate::CursorStore;
use crate::DeliveryStatus;
use crate::DispatchConfig;
use crate::RejectedLog;
use crate::Result;
use crate::SiteId;
use crate::SubscriptionRegistry;
use crate::SubscriptionSet;
use crate::Transmitter;
use crate::CHANGES_DELIVERED_METRIC;
use crate::CHANGES_REJECTED_METRIC;
use crate::CURSOR_LAG_METRIC;
use crate::TRANSIENT_FAILURES_METRIC;
use crate::TRANSMIT_LATENCY_METRIC;

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every pending change was handled
    CaughtUp,
    /// `max_batches_per_cycle` reached with changes still pending
    BudgetExhausted,
    /// Another worker holds the site
    LeaseBusy,
    /// Waiting for the backoff delay of an earlier failure
    BackingOff { remaining: Duration },
    /// A batch failed transiently and will be resent after `delay`
    RetryScheduled { failures: u32, delay: Duration },
    /// A rejected change stops the site; only when rejected changes are not
    /// skipped
    Blocked { change_id: ChangeId },
    /// The cursor moved under us or the lease was lost mid-cycle
    Interrupted,
    /// Shutdown was requested between two batches
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub site: SiteId,
    pub cursor_before: ChangeId,
    pub cursor_after: ChangeId,
    pub batches_sent: usize,
    pub delivered: usize,
    pub rejected: usize,
    pub skipped_irrelevant: usize,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    fn new(
        site: &SiteId,
        cursor: ChangeId,
        outcome: CycleOutcome,
    ) -> Self {
        Self {
            site: site.clone(),
            cursor_before: cursor,
            cursor_after: cursor,
            batches_sent: 0,
            delivered: 0,
            rejected: 0,
            skipped_irrelevant: 0,
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SiteBackoff {
    failures: u32,
    retry_at: Instant,
}

/// Changes picked for one batch and the furthest change examined for it.
struct PendingBatch {
    changes: Vec<Change>,
    scanned_to: ChangeId,
    skipped: usize,
}

enum BatchVerdict {
    Advance { delivered: usize, rejected: usize },
    Transient { reason: String },
    Blocked { change_id: ChangeId },
}

pub struct Dispatcher {
    changes: Arc<dyn ChangeStore>,
    cursors: Arc<dyn CursorStore>,
    subscriptions: Arc<dyn SubscriptionRegistry>,
    transmitter: Arc<dyn Transmitter>,
    rejected: Arc<RejectedLog>,
    leases: Arc<SiteLeases>,
    config: DispatchConfig,
    delivery: BackoffPolicy,
    backoff: DashMap<SiteId, SiteBackoff>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("batch_size", &self.config.batch_size)
            .field("sites_backing_off", &self.backoff.len())
            .finish()
    }
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        changes: Arc<dyn ChangeStore>,
        cursors: Arc<dyn CursorStore>,
        subscriptions: Arc<dyn SubscriptionRegistry>,
        transmitter: Arc<dyn Transmitter>,
        rejected: Arc<RejectedLog>,
        leases: Arc<SiteLeases>,
        config: DispatchConfig,
        delivery: BackoffPolicy,
    ) -> Self {
        Self {
            changes,
            cursors,
            subscriptions,
            transmitter,
            rejected,
            leases,
            config,
            delivery,
            backoff: DashMap::new(),
        }
    }

    /// Consecutive failed batches of `site`, zero when healthy.
    pub fn failures(
        &self,
        site: &SiteId,
    ) -> u32 {
        self.backoff.get(site).map(|b| b.failures).unwrap_or(0)
    }

    /// Where a site without a stored cursor starts: just before the oldest
    /// retained change, or at the log head when the log is empty.
    fn initial_cursor(&self) -> Result<ChangeId> {
        match self.changes.first_change_id()? {
            Some(first) => Ok(ChangeId(first.get().saturating_sub(1))),
            None => self.changes.last_change_id(),
        }
    }

    fn next_batch(
        &self,
        cursor: ChangeId,
        subscriptions: &SubscriptionSet,
    ) -> Result<PendingBatch> {
        let mut batch = PendingBatch {
            changes: Vec::new(),
            scanned_to: cursor,
            skipped: 0,
        };
        for change in self.changes.read_since(cursor, self.config.scan_window)? {
            if batch.changes.len() == self.config.batch_size {
                break;
            }
            batch.scanned_to = change.change_id();
            if subscriptions.matches(change.entity_id()) {
                batch.changes.push(change);
            } else {
                batch.skipped += 1;
            }
        }
        Ok(batch)
    }

    async fn transmit(
        &self,
        site: &SiteId,
        batch: &[Change],
    ) -> BatchVerdict {
        let started = Instant::now();
        let result = timeout(self.delivery.timeout(), self.transmitter.transmit(site, batch)).await;
        TRANSMIT_LATENCY_METRIC
            .with_label_values(&[site.as_str()])
            .observe(started.elapsed().as_millis() as f64);

        let report = match result {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!(%site, ?e, "transmission failed");
                return BatchVerdict::Transient { reason: e.to_string() };
            }
            Err(_) => {
                warn!(%site, timeout = ?self.delivery.timeout(), "transmission timed out");
                return BatchVerdict::Transient {
                    reason: format!("timed out after {:?}", self.delivery.timeout()),
                };
            }
        };

        let outcomes = report.into_index();
        let mut delivered = 0;
        let mut rejected = Vec::new();
        for change in batch {
            match outcomes.status_of(change.change_id()) {
                DeliveryStatus::Delivered => delivered += 1,
                DeliveryStatus::Rejected { reason } => {
                    if !self.config.skip_rejected {
                        warn!(%site, change_id = %change.change_id(), %reason, "rejected change blocks site");
                        return BatchVerdict::Blocked {
                            change_id: change.change_id(),
                        };
                    }
                    rejected.push((change, reason));
                }
                DeliveryStatus::TransientFailure { reason } => {
                    debug!(%site, change_id = %change.change_id(), %reason, "entry failed transiently");
                    return BatchVerdict::Transient { reason };
                }
            }
        }

        // Only recorded once the batch as a whole is known to advance.
        for (change, reason) in &rejected {
            if let Err(e) = self.rejected.record(site, change.change_id(), change.entity_id(), reason) {
                warn!(%site, ?e, "failed to record rejected change");
                return BatchVerdict::Transient { reason: e.to_string() };
            }
        }

        BatchVerdict::Advance {
            delivered,
            rejected: rejected.len(),
        }
    }

    fn schedule_retry(
        &self,
        site: &SiteId,
    ) -> (u32, Duration) {
        let mut entry = self.backoff.entry(site.clone()).or_insert(SiteBackoff {
            failures: 0,
            retry_at: Instant::now(),
        });
        entry.failures = entry.failures.saturating_add(1);
        let delay = self.delivery.delay_after(entry.failures);
        entry.retry_at = Instant::now() + delay;
        (entry.failures, delay)
    }

    fn update_lag(
        &self,
        site: &SiteId,
        cursor: ChangeId,
    ) {
        if let Ok(head) = self.changes.last_change_id() {
            CURSOR_LAG_METRIC
                .with_label_values(&[site.as_str()])
                .set(head.get().saturating_sub(cursor.get()) as i64);
        }
    }

    /// Runs one dispatch cycle for `site` on behalf of worker `holder`.
    ///
    /// Shutdown is honoured between batches only; a batch in flight is
    /// always either fully acknowledged or treated as failed.
    #[instrument(skip(self, shutdown))]
    pub async fn run_cycle(
        &self,
        site: &SiteId,
        holder: &str,
        shutdown: &watch::Receiver<()>,
    ) -> Result<CycleReport> {
        let Some(lease) = self.leases.try_acquire(site, holder, self.config.lease_ttl()) else {
            return Ok(CycleReport::new(site, ChangeId::ZERO, CycleOutcome::LeaseBusy));
        };

        let stored = self.cursors.cursor(site)?;
        let mut cursor = match stored {
            Some(c) => c,
            None => self.initial_cursor()?,
        };
        let mut report = CycleReport::new(site, cursor, CycleOutcome::CaughtUp);

        if let Some(backoff) = self.backoff.get(site).map(|b| *b) {
            let now = Instant::now();
            if backoff.retry_at > now {
                report.outcome = CycleOutcome::BackingOff {
                    remaining: backoff.retry_at - now,
                };
                return Ok(report);
            }
        }

        let subscriptions = self.subscriptions.subscriptions_of(site)?;
        let mut expected = stored;

        report.outcome = CycleOutcome::BudgetExhausted;
        for _ in 0..self.config.max_batches_per_cycle {
            if shutdown.has_changed().unwrap_or(true) {
                report.outcome = CycleOutcome::Cancelled;
                break;
            }

            let pending = self.next_batch(cursor, &subscriptions)?;
            if pending.scanned_to == cursor {
                report.outcome = CycleOutcome::CaughtUp;
                break;
            }

            let mut delivered = 0;
            let mut rejected = 0;
            if !pending.changes.is_empty() {
                report.batches_sent += 1;
                match self.transmit(site, &pending.changes).await {
                    BatchVerdict::Advance {
                        delivered: d,
                        rejected: r,
                    } => {
                        delivered = d;
                        rejected = r;
                    }
                    BatchVerdict::Transient { reason } => {
                        TRANSIENT_FAILURES_METRIC.with_label_values(&[site.as_str()]).inc();
                        let (failures, delay) = self.schedule_retry(site);
                        info!(%site, %cursor, failures, ?delay, %reason, "batch will be resent");
                        report.outcome = CycleOutcome::RetryScheduled { failures, delay };
                        break;
                    }
                    BatchVerdict::Blocked { change_id } => {
                        self.schedule_retry(site);
                        report.outcome = CycleOutcome::Blocked { change_id };
                        break;
                    }
                }
            }

            if !self.advance(&lease, site, expected, pending.scanned_to)? {
                report.outcome = CycleOutcome::Interrupted;
                break;
            }
            self.backoff.remove(site);

            cursor = pending.scanned_to;
            expected = Some(cursor);
            report.cursor_after = cursor;
            report.delivered += delivered;
            report.rejected += rejected;
            report.skipped_irrelevant += pending.skipped;
            CHANGES_DELIVERED_METRIC
                .with_label_values(&[site.as_str()])
                .inc_by(delivered as u64);
            CHANGES_REJECTED_METRIC
                .with_label_values(&[site.as_str()])
                .inc_by(rejected as u64);
        }

        self.update_lag(site, cursor);
        debug!(?report, "dispatch cycle done");
        Ok(report)
    }

    /// Moves the cursor if this worker still owns the site.
    fn advance(
        &self,
        lease: &LeaseGuard,
        site: &SiteId,
        expected: Option<ChangeId>,
        to: ChangeId,
    ) -> Result<bool> {
        if !lease.renew(self.config.lease_ttl()) {
            warn!(%site, "lease lost before cursor advance");
            return Ok(false);
        }
        let advanced = self.cursors.compare_and_advance(site, expected, to)?;
        if !advanced {
            warn!(%site, ?expected, %to, "cursor moved concurrently");
        }
        Ok(advanced)
    }
}
