use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use nanoid::nanoid;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::interval;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::CycleReport;
use super::Dispatcher;
use crate::Result;
use crate::SiteId;
use crate::SiteRegistry;
use crate::SubscriptionRegistry;

/// Long-running loop handing every known site to the dispatcher in turn.
///
/// Several workers may run side by side; the dispatcher's site leases keep
/// them off each other's sites.
pub struct DispatchWorker {
    id: String,
    dispatcher: Arc<Dispatcher>,
    sites: Arc<dyn SiteRegistry>,
    subscriptions: Arc<dyn SubscriptionRegistry>,
    cycle_interval: Duration,
}

impl std::fmt::Debug for DispatchWorker {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DispatchWorker").field("id", &self.id).finish()
    }
}

impl DispatchWorker {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sites: Arc<dyn SiteRegistry>,
        subscriptions: Arc<dyn SubscriptionRegistry>,
        cycle_interval: Duration,
    ) -> Self {
        Self {
            id: format!("dispatch-{}", nanoid!(8)),
            dispatcher,
            sites,
            subscriptions,
            cycle_interval,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configured sites plus every site holding a subscription.
    fn candidate_sites(&self) -> Result<Vec<SiteId>> {
        let mut sites: BTreeSet<SiteId> = self.sites.sites().into_iter().collect();
        sites.extend(self.subscriptions.known_sites()?);
        Ok(sites.into_iter().collect())
    }

    /// One cycle per site, starting at a random site so concurrent workers
    /// do not all queue up on the same lease.
    pub async fn run_pass(
        &self,
        shutdown: &watch::Receiver<()>,
    ) -> Result<Vec<CycleReport>> {
        let mut sites = self.candidate_sites()?;
        if sites.is_empty() {
            return Ok(Vec::new());
        }
        let offset = rand::thread_rng().gen_range(0..sites.len());
        sites.rotate_left(offset);

        let mut reports = Vec::with_capacity(sites.len());
        for site in sites {
            if shutdown.has_changed().unwrap_or(true) {
                break;
            }
            match self.dispatcher.run_cycle(&site, &self.id, shutdown).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!(%site, ?e, "dispatch cycle failed"),
            }
        }
        Ok(reports)
    }

    pub async fn run(
        self,
        mut shutdown: watch::Receiver<()>,
    ) -> Result<()> {
        info!(worker = %self.id, "dispatch worker started");
        let mut ticker = interval(self.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(worker = %self.id, "dispatch worker stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.run_pass(&shutdown).await {
                        Ok(reports) => debug!(worker = %self.id, sites = reports.len(), "dispatch pass done"),
                        Err(e) => warn!(worker = %self.id, ?e, "dispatch pass failed"),
                    }
                }
            }
        }
    }
}
