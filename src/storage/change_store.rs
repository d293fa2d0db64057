//! Core model of the repository side: the change log.

#[cfg(test)]
use mockall::automock;
use tonic::async_trait;

use crate::Change;
use crate::ChangeId;
use crate::NewChange;
use crate::Result;

/// Durable, append-only, ordered log of entity changes.
///
/// Ids are allocated at insertion, strictly increasing and contiguous. The
/// only way records leave the log is [`ChangeStore::prune`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChangeStore: Send + Sync + 'static {
    /// Appends one change and returns its id.
    ///
    /// # Errors
    /// `StorageError::StoreUnavailable` when the durable backing cannot be
    /// reached.
    async fn append(
        &self,
        change: NewChange,
    ) -> Result<ChangeId>;

    /// Appends several changes atomically; ids are assigned in input order.
    async fn append_batch(
        &self,
        changes: Vec<NewChange>,
    ) -> Result<Vec<ChangeId>>;

    /// Up to `limit` changes with id strictly greater than `after`, ascending.
    fn read_since(
        &self,
        after: ChangeId,
        limit: usize,
    ) -> Result<Vec<Change>>;

    /// Highest id ever allocated (zero on an empty log). Survives pruning.
    fn last_change_id(&self) -> Result<ChangeId>;

    /// Oldest id still retained.
    fn first_change_id(&self) -> Result<Option<ChangeId>>;

    /// Removes every change with id `< before`.
    ///
    /// # Errors
    /// `DispatchError::PruneConflict` when a dispatch cursor has not yet
    /// passed `before - 1`. Never forced.
    async fn prune(
        &self,
        before: ChangeId,
    ) -> Result<usize>;

    async fn flush(&self) -> Result<()>;
}
