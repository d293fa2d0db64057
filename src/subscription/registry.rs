use std::collections::BTreeSet;
use std::collections::HashSet;
use std::fmt;

#[cfg(test)]
use mockall::automock;

use crate::EntityId;
use crate::EntityKind;
use crate::Result;
use crate::SiteId;

/// What a site subscribes to: one entity, or a whole entity namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    Entity(EntityId),
    Namespace(EntityKind),
}

impl fmt::Display for Target {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Target::Entity(id) => write!(f, "{id}"),
            Target::Namespace(kind) => write!(f, "{}*", kind.prefix()),
        }
    }
}

impl From<EntityId> for Target {
    fn from(id: EntityId) -> Self {
        Target::Entity(id)
    }
}

/// Snapshot of one site's subscriptions, used to filter a batch locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    entities: HashSet<EntityId>,
    namespaces: HashSet<EntityKind>,
}

impl SubscriptionSet {
    pub fn insert(
        &mut self,
        target: Target,
    ) {
        match target {
            Target::Entity(id) => {
                self.entities.insert(id);
            }
            Target::Namespace(kind) => {
                self.namespaces.insert(kind);
            }
        }
    }

    pub fn matches(
        &self,
        entity_id: &EntityId,
    ) -> bool {
        self.namespaces.contains(&entity_id.kind()) || self.entities.contains(entity_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.namespaces.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entities.len() + self.namespaces.len()
    }
}

impl FromIterator<Target> for SubscriptionSet {
    fn from_iter<I: IntoIterator<Item = Target>>(iter: I) -> Self {
        let mut set = SubscriptionSet::default();
        for target in iter {
            set.insert(target);
        }
        set
    }
}

/// Set-valued mapping from client sites to the targets they follow.
///
/// Every operation is idempotent. Sites are registered lazily by their first
/// subscription; asking about an unknown entity yields an empty set.
#[cfg_attr(test, automock)]
pub trait SubscriptionRegistry: Send + Sync + 'static {
    /// Returns `true` when the subscription did not exist before.
    fn subscribe(
        &self,
        site: &SiteId,
        target: &Target,
    ) -> Result<bool>;

    /// Returns `true` when a subscription was removed.
    fn unsubscribe(
        &self,
        site: &SiteId,
        target: &Target,
    ) -> Result<bool>;

    /// Sites subscribed to `entity_id` directly or through its namespace.
    fn subscribers_of(
        &self,
        entity_id: &EntityId,
    ) -> Result<BTreeSet<SiteId>>;

    fn subscriptions_of(
        &self,
        site: &SiteId,
    ) -> Result<SubscriptionSet>;

    /// Sites holding at least one subscription.
    fn known_sites(&self) -> Result<BTreeSet<SiteId>>;
}
