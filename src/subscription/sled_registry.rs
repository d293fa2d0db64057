//! Subscription index over two sled trees.
//!
//! `subs_by_target` is keyed `target \0 site` and answers `subscribers_of`
//! with at most two prefix scans (the entity and its namespace).
//! `subs_by_site` is keyed `site \0 target` and answers `subscriptions_of`.
//! Both are written in one transaction.

use std::collections::BTreeSet;

use sled::transaction::TransactionResult;
use sled::Transactional;
use tracing::debug;
use tracing::instrument;

use super::SubscriptionRegistry;
use super::SubscriptionSet;
use super::Target;
use crate::constants::SUBSCRIPTIONS_BY_SITE_TREE;
use crate::constants::SUBSCRIPTIONS_BY_TARGET_TREE;
use crate::constants::TARGET_TAG_ENTITY;
use crate::constants::TARGET_TAG_NAMESPACE;
use crate::convert::composite_key;
use crate::convert::composite_prefix;
use crate::convert::split_key;
use crate::convert::utf8_part;
use crate::ConvertError;
use crate::EntityId;
use crate::EntityKind;
use crate::Error;
use crate::Result;
use crate::SiteId;

pub struct SledSubscriptionRegistry {
    by_target: sled::Tree,
    by_site: sled::Tree,
}

impl std::fmt::Debug for SledSubscriptionRegistry {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledSubscriptionRegistry")
            .field("subscriptions", &self.by_site.len())
            .finish()
    }
}

impl SledSubscriptionRegistry {
    pub fn open(db: &sled::Db) -> Result<Self> {
        Ok(Self {
            by_target: db.open_tree(SUBSCRIPTIONS_BY_TARGET_TREE)?,
            by_site: db.open_tree(SUBSCRIPTIONS_BY_SITE_TREE)?,
        })
    }

    fn sites_under(
        &self,
        target_key: &[u8],
        out: &mut BTreeSet<SiteId>,
    ) -> Result<()> {
        for item in self.by_target.scan_prefix(composite_prefix(&[target_key])) {
            let (key, _) = item?;
            let [_, site] = split_key::<2>(&key)?;
            out.insert(SiteId::new(utf8_part(site)?)?);
        }
        Ok(())
    }
}

fn encode_target(target: &Target) -> Vec<u8> {
    match target {
        Target::Entity(id) => {
            let id = id.to_string();
            let mut key = Vec::with_capacity(id.len() + 1);
            key.push(TARGET_TAG_ENTITY);
            key.extend_from_slice(id.as_bytes());
            key
        }
        Target::Namespace(kind) => vec![TARGET_TAG_NAMESPACE, kind.prefix() as u8],
    }
}

fn decode_target(bytes: &[u8]) -> Result<Target> {
    let corrupt = || -> Error { ConvertError::ConversionFailure(format!("bad subscription target {bytes:?}")).into() };
    match bytes.split_first() {
        Some((&TARGET_TAG_ENTITY, rest)) => Ok(Target::Entity(utf8_part(rest)?.parse::<EntityId>()?)),
        Some((&TARGET_TAG_NAMESPACE, rest)) => {
            let kind = match rest {
                b"Q" => EntityKind::Item,
                b"P" => EntityKind::Property,
                b"L" => EntityKind::Lexeme,
                b"M" => EntityKind::MediaInfo,
                _ => return Err(corrupt()),
            };
            Ok(Target::Namespace(kind))
        }
        _ => Err(corrupt()),
    }
}

impl SubscriptionRegistry for SledSubscriptionRegistry {
    #[instrument(skip(self))]
    fn subscribe(
        &self,
        site: &SiteId,
        target: &Target,
    ) -> Result<bool> {
        let target_key = encode_target(target);
        let by_target_key = composite_key(&[&target_key, site.as_str().as_bytes()]);
        let by_site_key = composite_key(&[site.as_str().as_bytes(), &target_key]);
        let empty: &[u8] = &[];

        let result: TransactionResult<bool, Error> =
            (&self.by_target, &self.by_site).transaction(|(by_target, by_site)| {
                let existed = by_target.insert(by_target_key.as_slice(), empty)?.is_some();
                by_site.insert(by_site_key.as_slice(), empty)?;
                Ok(!existed)
            });
        let added = result?;
        if added {
            debug!(%site, %target, "subscribed");
        }
        Ok(added)
    }

    #[instrument(skip(self))]
    fn unsubscribe(
        &self,
        site: &SiteId,
        target: &Target,
    ) -> Result<bool> {
        let target_key = encode_target(target);
        let by_target_key = composite_key(&[&target_key, site.as_str().as_bytes()]);
        let by_site_key = composite_key(&[site.as_str().as_bytes(), &target_key]);

        let result: TransactionResult<bool, Error> =
            (&self.by_target, &self.by_site).transaction(|(by_target, by_site)| {
                let existed = by_target.remove(by_target_key.as_slice())?.is_some();
                by_site.remove(by_site_key.as_slice())?;
                Ok(existed)
            });
        let removed = result?;
        if removed {
            debug!(%site, %target, "unsubscribed");
        }
        Ok(removed)
    }

    fn subscribers_of(
        &self,
        entity_id: &EntityId,
    ) -> Result<BTreeSet<SiteId>> {
        let mut sites = BTreeSet::new();
        self.sites_under(&encode_target(&Target::Entity(entity_id.clone())), &mut sites)?;
        self.sites_under(&encode_target(&Target::Namespace(entity_id.kind())), &mut sites)?;
        Ok(sites)
    }

    fn subscriptions_of(
        &self,
        site: &SiteId,
    ) -> Result<SubscriptionSet> {
        let mut set = SubscriptionSet::default();
        for item in self.by_site.scan_prefix(composite_prefix(&[site.as_str().as_bytes()])) {
            let (key, _) = item?;
            let [_, target] = split_key::<2>(&key)?;
            set.insert(decode_target(target)?);
        }
        Ok(set)
    }

    fn known_sites(&self) -> Result<BTreeSet<SiteId>> {
        let mut sites = BTreeSet::new();
        for item in self.by_site.iter() {
            let (key, _) = item?;
            let [site, _] = split_key::<2>(&key)?;
            sites.insert(SiteId::new(utf8_part(site)?)?);
        }
        Ok(sites)
    }
}
