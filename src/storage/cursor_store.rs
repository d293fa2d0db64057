#[cfg(test)]
use mockall::automock;

use crate::ChangeId;
use crate::Result;
use crate::SiteId;

/// Per-site delivery watermarks.
///
/// Only the dispatcher writes cursors. A cursor never moves backwards and is
/// changed exclusively through [`CursorStore::compare_and_advance`].
#[cfg_attr(test, automock)]
pub trait CursorStore: Send + Sync + 'static {
    /// `None` when the site has never been dispatched to.
    fn cursor(
        &self,
        site: &SiteId,
    ) -> Result<Option<ChangeId>>;

    /// Atomically moves the cursor from `expected` to `new`.
    ///
    /// Returns `Ok(false)` when another writer changed the cursor since it was
    /// read.
    ///
    /// # Errors
    /// `DispatchError::CursorRegression` when `new < expected`.
    fn compare_and_advance(
        &self,
        site: &SiteId,
        expected: Option<ChangeId>,
        new: ChangeId,
    ) -> Result<bool>;

    /// Every stored cursor.
    fn cursors(&self) -> Result<Vec<(SiteId, ChangeId)>>;

    /// Forgets a site's cursor, e.g. after the site is decommissioned.
    fn remove(
        &self,
        site: &SiteId,
    ) -> Result<bool>;
}
