use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::warn;

use super::ChangeClassifier;
use super::Classification;
use super::Invalidator;
use crate::proto::DeliverChangesRequest;
use crate::proto::EntryOutcome;
use crate::Change;
use crate::SiteId;

/// Client-site entry point for delivered batches.
///
/// Irrelevant records are acknowledged as delivered, malformed ones are
/// rejected. A batch meant for another site is failed transiently as a whole. Relevant changes go to the [`Invalidator`]; if it stops at a
/// change, that change and every later relevant change of the batch are
/// reported as transient failures so the repository sends them again.
#[derive(Debug)]
pub struct ClientChangeHandler {
    site_id: SiteId,
    classifier: ChangeClassifier,
    invalidator: Arc<Invalidator>,
}

impl ClientChangeHandler {
    pub fn new(
        site_id: SiteId,
        classifier: ChangeClassifier,
        invalidator: Arc<Invalidator>,
    ) -> Self {
        Self {
            site_id,
            classifier,
            invalidator,
        }
    }

    pub fn handle(
        &self,
        request: DeliverChangesRequest,
    ) -> Vec<EntryOutcome> {
        // A misrouted batch says nothing about its changes; the sender keeps
        // them and retries once its endpoint is fixed.
        if request.target_site_id != self.site_id.as_str() {
            error!(addressed_to = %request.target_site_id, serves = %self.site_id, "batch addressed to another site");
            let reason = format!("this relay serves {}, not {}", self.site_id, request.target_site_id);
            return request
                .changes
                .iter()
                .map(|r| EntryOutcome::transient(r.change_id, reason.clone()))
                .collect();
        }

        let mut verdicts: HashMap<u64, EntryOutcome> = HashMap::with_capacity(request.changes.len());
        let mut relevant: Vec<Change> = Vec::new();
        for record in &request.changes {
            match self.classifier.classify(&request.repo_site_id, record) {
                Classification::Relevant(change) => relevant.push(change),
                Classification::Irrelevant(reason) => {
                    debug!(change_id = record.change_id, %reason, "ignored");
                    verdicts.insert(record.change_id, EntryOutcome::delivered(record.change_id));
                }
                Classification::Malformed(reason) => {
                    warn!(change_id = record.change_id, %reason, "malformed change");
                    verdicts.insert(record.change_id, EntryOutcome::rejected(record.change_id, reason));
                }
            }
        }

        match self.invalidator.apply(&relevant) {
            Ok(report) => {
                for id in report.applied.iter().chain(report.already_applied.iter()) {
                    verdicts.insert(id.get(), EntryOutcome::delivered(id.get()));
                }
                if let Some((failed_id, e)) = report.failed {
                    let reason = e.to_string();
                    for change in relevant.iter().filter(|c| c.change_id() >= failed_id) {
                        let id = change.change_id().get();
                        verdicts.insert(id, EntryOutcome::transient(id, reason.clone()));
                    }
                }
            }
            Err(e) => {
                error!(?e, "failed to apply batch");
                let reason = e.to_string();
                for change in &relevant {
                    let id = change.change_id().get();
                    verdicts.insert(id, EntryOutcome::transient(id, reason.clone()));
                }
            }
        }

        request
            .changes
            .iter()
            .map(|r| {
                verdicts
                    .remove(&r.change_id)
                    .unwrap_or_else(|| EntryOutcome::transient(r.change_id, "not processed"))
            })
            .collect()
    }
}
