//! Usage records of one client wiki.
//!
//! Each (page, entity, aspect) record is stored twice: `usage_by_page` keyed
//! `page \0 entity \0 aspect` and `usage_by_entity` keyed
//! `entity \0 page \0 aspect`. Both are written in one transaction, so a
//! lookup from either side always sees the same set.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use sled::transaction::ConflictableTransactionError;
use sled::transaction::TransactionResult;
use sled::Transactional;
use tracing::debug;
use tracing::instrument;

use crate::constants::USAGE_BY_ENTITY_TREE;
use crate::constants::USAGE_BY_PAGE_TREE;
use crate::convert::composite_key;
use crate::convert::composite_prefix;
use crate::convert::safe_kv;
use crate::convert::safe_vk;
use crate::convert::split_key;
use crate::convert::utf8_part;
use crate::AspectSet;
use crate::ConvertError;
use crate::EntityId;
use crate::Error;
use crate::PageId;
use crate::Result;
use crate::UsageAspect;
use crate::UsageRecord;

pub struct UsageTracker {
    by_page: sled::Tree,
    by_entity: sled::Tree,
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("UsageTracker").field("records", &self.by_page.len()).finish()
    }
}

fn page_key(
    page: PageId,
    entity_id: &EntityId,
    aspect: UsageAspect,
) -> Vec<u8> {
    composite_key(&[&safe_kv(page.0), entity_id.to_string().as_bytes(), &[aspect.code()]])
}

fn entity_key(
    entity_id: &EntityId,
    page: PageId,
    aspect: UsageAspect,
) -> Vec<u8> {
    composite_key(&[entity_id.to_string().as_bytes(), &safe_kv(page.0), &[aspect.code()]])
}

fn decode_aspect(part: &[u8]) -> Result<UsageAspect> {
    let aspect = match part {
        [code] => UsageAspect::from_code(*code),
        _ => None,
    };
    aspect.ok_or_else(|| ConvertError::ConversionFailure(format!("unknown usage aspect {part:?}")).into())
}

fn decode_page_key(key: &[u8]) -> Result<UsageRecord> {
    // page ids are fixed width and may contain the separator byte
    if key.len() < 9 {
        return Err(ConvertError::InvalidLength(key.len()).into());
    }
    let page = PageId(safe_vk(&key[..8])?);
    let [entity, aspect] = split_key::<2>(&key[9..])?;
    Ok(UsageRecord {
        page,
        entity_id: utf8_part(entity)?.parse()?,
        aspect: decode_aspect(aspect)?,
    })
}

/// Splits `page(8) \0 aspect(1)`, the tail of an entity-index key.
fn decode_entity_key_tail(tail: &[u8]) -> Result<(PageId, UsageAspect)> {
    if tail.len() != 10 {
        return Err(ConvertError::InvalidLength(tail.len()).into());
    }
    Ok((PageId(safe_vk(&tail[..8])?), decode_aspect(&tail[9..])?))
}

impl UsageTracker {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            by_page: db.open_tree(USAGE_BY_PAGE_TREE)?,
            by_entity: db.open_tree(USAGE_BY_ENTITY_TREE)?,
        })
    }

    /// Replaces the usage set of `page` with what its latest render reported.
    ///
    /// Records no longer reported are removed; an empty report turns every
    /// (page, entity) pair back to not-used.
    #[instrument(skip(self, usages), fields(reported = usages.len()))]
    pub fn record_page_usages(
        &self,
        page: PageId,
        usages: &[(EntityId, UsageAspect)],
    ) -> Result<()> {
        let wanted: BTreeSet<(EntityId, UsageAspect)> = usages.iter().cloned().collect();
        let current: BTreeSet<(EntityId, UsageAspect)> = self
            .usages_for_page(page)?
            .into_iter()
            .map(|r| (r.entity_id, r.aspect))
            .collect();

        let added: Vec<_> = wanted.difference(&current).collect();
        let removed: Vec<_> = current.difference(&wanted).collect();
        if added.is_empty() && removed.is_empty() {
            return Ok(());
        }

        let empty: &[u8] = &[];
        let result: TransactionResult<(), Error> =
            (&self.by_page, &self.by_entity).transaction(|(by_page, by_entity)| {
                for (entity_id, aspect) in &removed {
                    by_page.remove(page_key(page, entity_id, *aspect))?;
                    by_entity.remove(entity_key(entity_id, page, *aspect))?;
                }
                for (entity_id, aspect) in &added {
                    by_page.insert(page_key(page, entity_id, *aspect), empty)?;
                    by_entity.insert(entity_key(entity_id, page, *aspect), empty)?;
                }
                Ok::<(), ConflictableTransactionError<Error>>(())
            });
        result?;

        debug!(%page, added = added.len(), removed = removed.len(), "page usages updated");
        Ok(())
    }

    /// Forgets every usage of a deleted page. Returns how many records went.
    pub fn page_deleted(
        &self,
        page: PageId,
    ) -> Result<usize> {
        let records = self.usages_for_page(page)?;
        let result: TransactionResult<(), Error> =
            (&self.by_page, &self.by_entity).transaction(|(by_page, by_entity)| {
                for r in &records {
                    by_page.remove(page_key(r.page, &r.entity_id, r.aspect))?;
                    by_entity.remove(entity_key(&r.entity_id, r.page, r.aspect))?;
                }
                Ok::<(), ConflictableTransactionError<Error>>(())
            });
        result?;
        debug!(%page, removed = records.len(), "page usages dropped");
        Ok(records.len())
    }

    pub fn usages_for_page(
        &self,
        page: PageId,
    ) -> Result<Vec<UsageRecord>> {
        let mut prefix = safe_kv(page.0).to_vec();
        prefix.push(crate::convert::KEY_SEPARATOR);
        let mut out = Vec::new();
        for item in self.by_page.scan_prefix(prefix) {
            let (key, _) = item?;
            out.push(decode_page_key(&key)?);
        }
        Ok(out)
    }

    /// Aspect set per page using `entity_id`.
    fn aspects_by_page(
        &self,
        entity_id: &EntityId,
    ) -> Result<BTreeMap<PageId, AspectSet>> {
        let prefix = composite_prefix(&[entity_id.to_string().as_bytes()]);
        let mut pages: BTreeMap<PageId, AspectSet> = BTreeMap::new();
        for item in self.by_entity.scan_prefix(&prefix) {
            let (key, _) = item?;
            let (page, aspect) = decode_entity_key_tail(&key[prefix.len()..])?;
            pages.entry(page).or_default().insert(aspect);
        }
        Ok(pages)
    }

    pub fn pages_using(
        &self,
        entity_id: &EntityId,
    ) -> Result<BTreeSet<PageId>> {
        Ok(self.aspects_by_page(entity_id)?.into_keys().collect())
    }

    /// Pages whose usage of `entity_id` is hit by a change touching `changed`.
    pub fn pages_to_invalidate(
        &self,
        entity_id: &EntityId,
        changed: &AspectSet,
    ) -> Result<BTreeSet<PageId>> {
        Ok(self
            .aspects_by_page(entity_id)?
            .into_iter()
            .filter(|(_, used)| used.is_hit_by(changed))
            .map(|(page, _)| page)
            .collect())
    }

    /// Number of (page, aspect) records for `entity_id`.
    pub fn entity_usage_count(
        &self,
        entity_id: &EntityId,
    ) -> Result<usize> {
        let prefix = composite_prefix(&[entity_id.to_string().as_bytes()]);
        let mut count = 0;
        for item in self.by_entity.scan_prefix(prefix) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}
