use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::constants::DISPATCH_CURSORS_TREE;
use crate::convert::safe_kv;
use crate::convert::safe_vk;
use crate::convert::utf8_part;
use crate::ChangeId;
use crate::CursorStore;
use crate::DispatchError;
use crate::Result;
use crate::SiteId;

/// Cursor table keyed by site id, value is the big-endian change id.
pub struct SledCursorStore {
    tree: sled::Tree,
}

impl std::fmt::Debug for SledCursorStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledCursorStore").field("sites", &self.tree.len()).finish()
    }
}

impl SledCursorStore {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(DISPATCH_CURSORS_TREE)?,
        })
    }

    /// Lowest cursor over all sites, with the site holding it.
    pub fn min_cursor(&self) -> Result<Option<(SiteId, ChangeId)>> {
        Ok(self.cursors()?.into_iter().min_by_key(|(_, c)| *c))
    }
}

impl CursorStore for SledCursorStore {
    fn cursor(
        &self,
        site: &SiteId,
    ) -> Result<Option<ChangeId>> {
        match self.tree.get(site.as_str().as_bytes())? {
            Some(v) => Ok(Some(ChangeId(safe_vk(&v)?))),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    fn compare_and_advance(
        &self,
        site: &SiteId,
        expected: Option<ChangeId>,
        new: ChangeId,
    ) -> Result<bool> {
        let current = expected.unwrap_or_default();
        if new < current {
            return Err(DispatchError::CursorRegression {
                site: site.clone(),
                current,
                requested: new,
            }
            .into());
        }

        let old = expected.map(|c| safe_kv(c.get()));
        let swapped = self.tree.compare_and_swap(
            site.as_str().as_bytes(),
            old.as_ref().map(|b| &b[..]),
            Some(&safe_kv(new.get())[..]),
        )?;

        match swapped {
            Ok(()) => {
                debug!(%site, from = %current, to = %new, "cursor advanced");
                Ok(true)
            }
            Err(e) => {
                warn!(%site, ?expected, actual = ?e.current, "cursor changed concurrently");
                Ok(false)
            }
        }
    }

    fn cursors(&self) -> Result<Vec<(SiteId, ChangeId)>> {
        let mut out = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (key, value) = item?;
            let site = SiteId::new(utf8_part(&key)?)?;
            out.push((site, ChangeId(safe_vk(&value)?)));
        }
        Ok(out)
    }

    fn remove(
        &self,
        site: &SiteId,
    ) -> Result<bool> {
        Ok(self.tree.remove(site.as_str().as_bytes())?.is_some())
    }
}
