use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::constants::REJECTED_CHANGES_TREE;
use crate::convert::composite_key;
use crate::convert::composite_prefix;
use crate::convert::safe_kv;
use crate::utils::time::get_now_as_u64_millis;
use crate::ChangeId;
use crate::EntityId;
use crate::Result;
use crate::SiteId;

/// A change a client refused outright, kept for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedEntry {
    pub change_id: ChangeId,
    pub entity_id: EntityId,
    pub reason: String,
    pub rejected_at_ms: u64,
}

/// Rejections keyed by `site \0 change_id`, so a site's entries are one
/// prefix scan in id order.
pub struct RejectedLog {
    tree: sled::Tree,
}

impl std::fmt::Debug for RejectedLog {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RejectedLog").field("entries", &self.tree.len()).finish()
    }
}

impl RejectedLog {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            tree: db.open_tree(REJECTED_CHANGES_TREE)?,
        })
    }

    pub fn record(
        &self,
        site: &SiteId,
        change_id: ChangeId,
        entity_id: &EntityId,
        reason: &str,
    ) -> Result<()> {
        warn!(%site, %change_id, %entity_id, reason, "change rejected by client");
        let entry = RejectedEntry {
            change_id,
            entity_id: entity_id.clone(),
            reason: reason.to_string(),
            rejected_at_ms: get_now_as_u64_millis(),
        };
        let key = composite_key(&[site.as_str().as_bytes(), &safe_kv(change_id.get())]);
        self.tree.insert(key, bincode::serialize(&entry)?)?;
        Ok(())
    }

    pub fn list(
        &self,
        site: &SiteId,
    ) -> Result<Vec<RejectedEntry>> {
        let prefix = composite_prefix(&[site.as_str().as_bytes()]);
        let mut out = Vec::new();
        for item in self.tree.scan_prefix(prefix) {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    /// Drops every entry of `site`, returning how many were removed.
    pub fn clear(
        &self,
        site: &SiteId,
    ) -> Result<usize> {
        let prefix = composite_prefix(&[site.as_str().as_bytes()]);
        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for item in self.tree.scan_prefix(prefix) {
            let (key, _) = item?;
            batch.remove(key);
            removed += 1;
        }
        self.tree.apply_batch(batch)?;
        Ok(removed)
    }
}
