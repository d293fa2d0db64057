//! sled-backed change log.
//!
//! Records live in the `changes` tree keyed by big-endian change id, so a
//! range scan yields them in id order. The highest allocated id is kept in a
//! separate meta tree and written in the same transaction as the records:
//! ids stay contiguous across restarts and are never reused after a prune.

use std::sync::Arc;

use parking_lot::Mutex;
use sled::transaction::ConflictableTransactionError;
use sled::transaction::TransactionResult;
use sled::Transactional;
use tonic::async_trait;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::trace;

use super::SledCursorStore;
use crate::constants::CHANGES_TREE;
use crate::constants::CHANGE_META_KEY_LAST_CHANGE_ID;
use crate::constants::CHANGE_META_TREE;
use crate::convert::safe_kv;
use crate::convert::safe_vk;
use crate::Change;
use crate::ChangeId;
use crate::ChangeStore;
use crate::DispatchError;
use crate::Error;
use crate::NewChange;
use crate::Result;
use crate::StorageError;
use crate::CHANGES_APPENDED_METRIC;

pub struct SledChangeStore {
    changes: sled::Tree,
    meta: sled::Tree,
    cursors: Arc<SledCursorStore>,
    /// Single writer: appends are serialized in-process
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for SledChangeStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledChangeStore")
            .field("retained", &self.changes.len())
            .finish()
    }
}

impl Drop for SledChangeStore {
    fn drop(&mut self) {
        match self.changes.flush() {
            Ok(_) => info!("Successfully flush change log"),
            Err(e) => error!(?e, "Failed to flush change log"),
        }
    }
}

impl SledChangeStore {
    pub fn open(
        db: &sled::Db,
        cursors: Arc<SledCursorStore>,
    ) -> Result<Self> {
        Ok(Self {
            changes: db.open_tree(CHANGES_TREE)?,
            meta: db.open_tree(CHANGE_META_TREE)?,
            cursors,
            append_lock: Mutex::new(()),
        })
    }

    pub fn cursors(&self) -> &Arc<SledCursorStore> {
        &self.cursors
    }

    /// Lazy iterator over every retained change with id `> after`.
    ///
    /// The iterator reads the tree as it goes; dropping it and calling
    /// `iter_since` again with the last seen id resumes where it stopped.
    pub fn iter_since(
        &self,
        after: ChangeId,
    ) -> ChangeIter {
        let start = safe_kv(after.get().saturating_add(1));
        ChangeIter {
            inner: self.changes.range(start..),
        }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    fn append_locked(
        &self,
        changes: Vec<NewChange>,
    ) -> Result<Vec<ChangeId>> {
        let _guard = self.append_lock.lock();

        let result: TransactionResult<Vec<ChangeId>, Error> =
            (&self.changes, &self.meta).transaction(|(log, meta)| {
                let last = match meta.get(CHANGE_META_KEY_LAST_CHANGE_ID)? {
                    Some(v) => safe_vk(&v).map_err(ConflictableTransactionError::Abort)?,
                    None => 0,
                };

                let mut ids = Vec::with_capacity(changes.len());
                for (offset, new_change) in changes.iter().enumerate() {
                    let id = ChangeId(last + 1 + offset as u64);
                    let record = new_change.clone().into_change(id);
                    let bytes = bincode::serialize(&record)
                        .map_err(|e| ConflictableTransactionError::Abort(Error::from(e)))?;
                    log.insert(&safe_kv(id.get())[..], bytes)?;
                    ids.push(id);
                }

                if let Some(last_id) = ids.last() {
                    meta.insert(CHANGE_META_KEY_LAST_CHANGE_ID, &safe_kv(last_id.get())[..])?;
                }
                Ok(ids)
            });

        let ids = result.map_err(|e| {
            error!(?e, "append failed");
            Error::from(e)
        })?;
        CHANGES_APPENDED_METRIC.inc_by(ids.len() as u64);
        trace!(count = ids.len(), last = ?ids.last(), "changes appended");
        Ok(ids)
    }
}

#[async_trait]
impl ChangeStore for SledChangeStore {
    async fn append(
        &self,
        change: NewChange,
    ) -> Result<ChangeId> {
        let ids = self.append_locked(vec![change])?;
        ids.into_iter().next().ok_or_else(|| {
            StorageError::DbError("append produced no id".to_string()).into()
        })
    }

    async fn append_batch(
        &self,
        changes: Vec<NewChange>,
    ) -> Result<Vec<ChangeId>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        self.append_locked(changes)
    }

    #[instrument(skip(self))]
    fn read_since(
        &self,
        after: ChangeId,
        limit: usize,
    ) -> Result<Vec<Change>> {
        self.iter_since(after).take(limit).collect()
    }

    fn last_change_id(&self) -> Result<ChangeId> {
        match self.meta.get(CHANGE_META_KEY_LAST_CHANGE_ID)? {
            Some(v) => Ok(ChangeId(safe_vk(&v)?)),
            None => Ok(ChangeId::ZERO),
        }
    }

    fn first_change_id(&self) -> Result<Option<ChangeId>> {
        match self.changes.first()? {
            Some((key, _)) => Ok(Some(ChangeId(safe_vk(&key)?))),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn prune(
        &self,
        before: ChangeId,
    ) -> Result<usize> {
        if let Some((site, cursor)) = self.cursors.min_cursor()? {
            if cursor.next() < before {
                debug!(%site, %cursor, %before, "prune refused");
                return Err(DispatchError::PruneConflict { before, site, cursor }.into());
            }
        }

        let mut batch = sled::Batch::default();
        let mut removed = 0;
        for item in self.changes.range(..safe_kv(before.get())) {
            let (key, _) = item?;
            batch.remove(key);
            removed += 1;
        }
        self.changes.apply_batch(batch)?;

        info!(%before, removed, "change log pruned");
        Ok(removed)
    }

    async fn flush(&self) -> Result<()> {
        trace!("ChangeStore flush");
        self.changes.flush_async().await?;
        self.meta.flush_async().await?;
        Ok(())
    }
}

/// Decoding iterator over a range of the change tree.
pub struct ChangeIter {
    inner: sled::Iter,
}

impl Iterator for ChangeIter {
    type Item = Result<Change>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        Some(item.map_err(Error::from).and_then(|(key, value)| {
            bincode::deserialize::<Change>(&value).map_err(|e| {
                StorageError::DataCorruption {
                    location: format!("change {:?}: {}", safe_vk(&key).ok(), e),
                }
                .into()
            })
        }))
    }
}
