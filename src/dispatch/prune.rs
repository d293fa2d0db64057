use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::async_task::task_with_timeout_and_exponential_backoff;
use crate::BackoffPolicy;
use crate::ChangeId;
use crate::ChangeStore;
use crate::CursorStore;
use crate::DispatchError;
use crate::Error;
use crate::Result;
use crate::SiteId;
use crate::SubscriptionRegistry;

/// Periodically drops history every site has already moved past.
pub struct PruneTask {
    changes: Arc<dyn ChangeStore>,
    cursors: Arc<dyn CursorStore>,
    subscriptions: Arc<dyn SubscriptionRegistry>,
    interval: Duration,
    policy: BackoffPolicy,
}

impl std::fmt::Debug for PruneTask {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("PruneTask").field("interval", &self.interval).finish()
    }
}

/// Bound on store retries within a single pass; the next tick tries again.
const MAX_RETRIES_PER_PASS: usize = 3;

impl PruneTask {
    pub fn new(
        changes: Arc<dyn ChangeStore>,
        cursors: Arc<dyn CursorStore>,
        subscriptions: Arc<dyn SubscriptionRegistry>,
        interval: Duration,
        store_policy: BackoffPolicy,
    ) -> Self {
        Self {
            changes,
            cursors,
            subscriptions,
            interval,
            policy: BackoffPolicy {
                max_retries: MAX_RETRIES_PER_PASS,
                ..store_policy
            },
        }
    }

    /// Prunes below the slowest cursor. Returns the number of removed changes.
    ///
    /// Without any cursor nothing is pruned. A subscribed site that has no
    /// cursor yet (never dispatched, or every transmission failed so far)
    /// still needs the whole retained log, so it holds pruning back too.
    /// A conflict raised by the store (a cursor moved back in between) is
    /// logged and counts as zero.
    pub async fn run_once(&self) -> Result<usize> {
        let cursors = self.cursors.cursors()?;
        let tracked: BTreeSet<&SiteId> = cursors.iter().map(|(site, _)| site).collect();
        if let Some(site) = self
            .subscriptions
            .known_sites()?
            .into_iter()
            .find(|site| !tracked.contains(site))
        {
            info!(%site, "subscribed site has no cursor yet, prune held back");
            return Ok(0);
        }

        let Some(min) = cursors.iter().map(|(_, c)| *c).min() else {
            debug!("no dispatch cursors, nothing to prune");
            return Ok(0);
        };
        let before = min.next();
        if self.changes.first_change_id()?.map_or(true, |first| first >= before) {
            return Ok(0);
        }

        let changes = self.changes.clone();
        let result = task_with_timeout_and_exponential_backoff(
            move || {
                let changes = changes.clone();
                async move { changes.prune(before).await }
            },
            self.policy,
            Error::is_store_unavailable,
        )
        .await;

        match result {
            Ok(removed) => {
                info!(%before, removed, "pruned change log");
                Ok(removed)
            }
            Err(Error::Dispatch(DispatchError::PruneConflict { before, site, cursor })) => {
                warn!(%before, %site, %cursor, "prune refused, history still needed");
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn run(
        self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes at once
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("prune task stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!(?e, "prune pass failed");
                    }
                }
            }
        }
    }
}

