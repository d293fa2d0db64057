use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use tracing::warn;

use super::PurgeJob;
use super::RenderQueue;
use super::UsageTracker;
use crate::constants::CLIENT_META_KEY_APPLIED_WATERMARK;
use crate::constants::CLIENT_META_TREE;
use crate::convert::safe_kv;
use crate::convert::safe_vk;
use crate::Change;
use crate::ChangeId;
use crate::Error;
use crate::PageId;
use crate::Result;
use crate::PAGES_INVALIDATED_METRIC;

/// What one call to [`Invalidator::apply`] did.
#[derive(Debug, Default)]
pub struct InvalidationReport {
    pub applied: Vec<ChangeId>,
    /// At or below the applied watermark; nothing was done for them
    pub already_applied: Vec<ChangeId>,
    pub pages_scheduled: BTreeSet<PageId>,
    /// First change that could not be applied. Later changes were not looked
    /// at.
    pub failed: Option<(ChangeId, Error)>,
}

/// Turns delivered changes into purge jobs, one per page per call.
///
/// An applied watermark is persisted after each call: a change id at or below
/// it is skipped, so redelivery of a batch schedules nothing twice.
pub struct Invalidator {
    tracker: Arc<UsageTracker>,
    queue: Arc<dyn RenderQueue>,
    meta: sled::Tree,
    apply_lock: Mutex<()>,
}

impl std::fmt::Debug for Invalidator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Invalidator").field("tracker", &self.tracker).finish()
    }
}

impl Invalidator {
    pub fn new(
        db: &sled::Db,
        tracker: Arc<UsageTracker>,
        queue: Arc<dyn RenderQueue>,
    ) -> Result<Self> {
        Ok(Self {
            tracker,
            queue,
            meta: db.open_tree(CLIENT_META_TREE)?,
            apply_lock: Mutex::new(()),
        })
    }

    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    pub fn applied_watermark(&self) -> Result<ChangeId> {
        match self.meta.get(CLIENT_META_KEY_APPLIED_WATERMARK)? {
            Some(v) => Ok(ChangeId(safe_vk(&v)?)),
            None => Ok(ChangeId::ZERO),
        }
    }

    fn set_applied_watermark(
        &self,
        id: ChangeId,
    ) -> Result<()> {
        self.meta.insert(CLIENT_META_KEY_APPLIED_WATERMARK, &safe_kv(id.get())[..])?;
        Ok(())
    }

    /// Applies an ordered batch of changes.
    ///
    /// Pages hit by several changes of the batch are scheduled once. Lookup
    /// failures stop the batch at the failing change and are reported in
    /// [`InvalidationReport::failed`]; a failed submission to the render
    /// queue fails the whole call and leaves the watermark untouched.
    pub fn apply(
        &self,
        changes: &[Change],
    ) -> Result<InvalidationReport> {
        let _guard = self.apply_lock.lock();
        let watermark = self.applied_watermark()?;

        let mut report = InvalidationReport::default();
        let mut jobs: BTreeMap<PageId, PurgeJob> = BTreeMap::new();
        let mut last_applied = watermark;

        for change in changes {
            let change_id = change.change_id();
            if change_id <= watermark {
                report.already_applied.push(change_id);
                continue;
            }

            let pages = match self
                .tracker
                .pages_to_invalidate(change.entity_id(), &change.affected_aspects())
            {
                Ok(pages) => pages,
                Err(e) => {
                    warn!(%change_id, ?e, "usage lookup failed");
                    report.failed = Some((change_id, e));
                    break;
                }
            };

            for page in pages {
                let job = jobs.entry(page).or_insert_with(|| PurgeJob {
                    page,
                    entity_ids: BTreeSet::new(),
                    change_ids: Vec::new(),
                });
                job.entity_ids.insert(change.entity_id().clone());
                job.change_ids.push(change_id);
            }
            report.applied.push(change_id);
            last_applied = change_id;
        }

        for (page, job) in jobs {
            self.queue.submit(job)?;
            PAGES_INVALIDATED_METRIC.inc();
            report.pages_scheduled.insert(page);
        }

        if last_applied > watermark {
            self.set_applied_watermark(last_applied)?;
        }

        debug!(
            applied = report.applied.len(),
            skipped = report.already_applied.len(),
            pages = report.pages_scheduled.len(),
            "changes applied"
        );
        Ok(report)
    }
}
