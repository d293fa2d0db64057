//! Delivery boundary between the dispatcher and client sites.
//!
//! The dispatcher only depends on [`Transmitter`]; the gRPC relay in
//! [`grpc`] is one implementation of it. Every call is bounded by the
//! request timeout from [`NetworkConfig`](crate::NetworkConfig).
pub mod grpc;

mod connection_cache;
mod site_registry;


pub(crate) use connection_cache::*;
pub use site_registry::*;

use std::collections::HashMap;

#[cfg(test)]
use mockall::automock;
use tonic::async_trait;

use crate::Change;
use crate::ChangeId;
use crate::Result;
use crate::SiteId;

/// Per-entry verdict of a client site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    /// The site refused the change for good, e.g. an unreadable payload
    Rejected { reason: String },
    /// Worth retrying later
    TransientFailure { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    pub change_id: ChangeId,
    pub status: DeliveryStatus,
}

/// Outcomes reported for one transmitted batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmitReport {
    pub outcomes: Vec<EntryOutcome>,
}

impl TransmitReport {
    /// Every change of `batch` delivered.
    pub fn all_delivered(batch: &[Change]) -> Self {
        Self {
            outcomes: batch
                .iter()
                .map(|c| EntryOutcome {
                    change_id: c.change_id(),
                    status: DeliveryStatus::Delivered,
                })
                .collect(),
        }
    }

    /// Indexes the outcomes by change for per-entry lookups.
    pub fn into_index(self) -> OutcomeIndex {
        OutcomeIndex(
            self.outcomes
                .into_iter()
                .map(|o| (o.change_id, o.status))
                .collect(),
        )
    }
}

/// Outcomes of one report keyed by change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeIndex(HashMap<ChangeId, DeliveryStatus>);

impl OutcomeIndex {
    /// Verdict for `change_id`. A change the site did not report on counts as
    /// a transient failure.
    pub fn status_of(
        &self,
        change_id: ChangeId,
    ) -> DeliveryStatus {
        self.0
            .get(&change_id)
            .cloned()
            .unwrap_or_else(|| DeliveryStatus::TransientFailure {
                reason: "no outcome reported".to_string(),
            })
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transmitter: Send + Sync + 'static {
    /// Sends one ordered batch to `site`.
    ///
    /// # Errors
    /// - `NetworkError::ChannelUnavailable` when the site cannot be reached at
    ///   all; the caller treats the whole batch as a transient failure.
    /// - `NetworkError::UnknownSite` when no endpoint is registered.
    async fn transmit(
        &self,
        site: &SiteId,
        batch: &[Change],
    ) -> Result<TransmitReport>;
}
