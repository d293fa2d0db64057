//! Per-site mutual exclusion between dispatch workers.
//!
//! A lease carries an expiry so that a site held by a worker that died is
//! picked up by another one once the TTL runs out. Each grant gets a fresh
//! token; releasing or renewing with a stale token is a no-op.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use crate::SiteId;

#[derive(Debug, Clone)]
struct LeaseEntry {
    holder: String,
    token: u64,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct SiteLeases {
    leases: DashMap<SiteId, LeaseEntry>,
    next_token: AtomicU64,
}

impl SiteLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `site` to `holder` unless another live lease exists.
    ///
    /// An expired lease is taken over whoever held it. A holder asking again
    /// for a site it still holds is refused: leases are not reentrant.
    pub fn try_acquire(
        self: &Arc<Self>,
        site: &SiteId,
        holder: &str,
        ttl: Duration,
    ) -> Option<LeaseGuard> {
        let now = Instant::now();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let fresh = LeaseEntry {
            holder: holder.to_string(),
            token,
            expires_at: now + ttl,
        };

        match self.leases.entry(site.clone()) {
            Entry::Occupied(mut e) => {
                if e.get().expires_at > now {
                    trace!(%site, holder = %e.get().holder, "lease busy");
                    return None;
                }
                debug!(%site, previous = %e.get().holder, %holder, "taking over expired lease");
                e.insert(fresh);
            }
            Entry::Vacant(e) => {
                e.insert(fresh);
            }
        }

        Some(LeaseGuard {
            leases: self.clone(),
            site: site.clone(),
            token,
        })
    }

    /// Current live holder of `site`.
    pub fn holder(
        &self,
        site: &SiteId,
    ) -> Option<String> {
        self.leases
            .get(site)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.holder.clone())
    }
}

/// Held lease on one site. Dropping it releases the site.
#[derive(Debug)]
pub struct LeaseGuard {
    leases: Arc<SiteLeases>,
    site: SiteId,
    token: u64,
}

impl LeaseGuard {
    pub fn site(&self) -> &SiteId {
        &self.site
    }

    /// Pushes the expiry to `now + ttl`.
    ///
    /// Returns `false` when the lease expired and was taken by someone else.
    pub fn renew(
        &self,
        ttl: Duration,
    ) -> bool {
        match self.leases.leases.get_mut(&self.site) {
            Some(mut e) if e.token == self.token => {
                e.expires_at = Instant::now() + ttl;
                true
            }
            _ => false,
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let token = self.token;
        if self.leases.leases.remove_if(&self.site, |_, e| e.token == token).is_some() {
            trace!(site = %self.site, "lease released");
        }
    }
}
