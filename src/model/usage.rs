use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Kind of entity data a local page depends on. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UsageAspect {
    Label,
    Description,
    Sitelink,
    Statement,
    /// The page depends on the entity as a whole
    All,
}

impl UsageAspect {
    pub const ALL_ASPECTS: [UsageAspect; 5] = [
        UsageAspect::Label,
        UsageAspect::Description,
        UsageAspect::Sitelink,
        UsageAspect::Statement,
        UsageAspect::All,
    ];

    /// Single byte storage code.
    pub fn code(self) -> u8 {
        match self {
            UsageAspect::Label => b'L',
            UsageAspect::Description => b'D',
            UsageAspect::Sitelink => b'S',
            UsageAspect::Statement => b'C',
            UsageAspect::All => b'X',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'L' => Some(UsageAspect::Label),
            b'D' => Some(UsageAspect::Description),
            b'S' => Some(UsageAspect::Sitelink),
            b'C' => Some(UsageAspect::Statement),
            b'X' => Some(UsageAspect::All),
            _ => None,
        }
    }

    fn bit(self) -> u8 {
        match self {
            UsageAspect::Label => 1,
            UsageAspect::Description => 1 << 1,
            UsageAspect::Sitelink => 1 << 2,
            UsageAspect::Statement => 1 << 3,
            UsageAspect::All => 1 << 4,
        }
    }
}

impl fmt::Display for UsageAspect {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            UsageAspect::Label => "label",
            UsageAspect::Description => "description",
            UsageAspect::Sitelink => "sitelink",
            UsageAspect::Statement => "statement",
            UsageAspect::All => "all",
        };
        f.write_str(name)
    }
}

/// Small bit set over [`UsageAspect`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AspectSet(u8);

impl AspectSet {
    pub fn empty() -> Self {
        AspectSet(0)
    }

    /// Every aspect, including `All`.
    pub fn everything() -> Self {
        UsageAspect::ALL_ASPECTS.iter().copied().collect()
    }

    pub fn insert(
        &mut self,
        aspect: UsageAspect,
    ) {
        self.0 |= aspect.bit();
    }

    pub fn contains(
        &self,
        aspect: UsageAspect,
    ) -> bool {
        self.0 & aspect.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn union(
        self,
        other: AspectSet,
    ) -> AspectSet {
        AspectSet(self.0 | other.0)
    }

    /// Whether a page using `self` must be refreshed for a change touching
    /// `changed`. A page using `All` is hit by any change; a change touching
    /// `All` hits every usage.
    pub fn is_hit_by(
        &self,
        changed: &AspectSet,
    ) -> bool {
        if self.is_empty() {
            return false;
        }
        if self.contains(UsageAspect::All) || changed.contains(UsageAspect::All) {
            return true;
        }
        self.0 & changed.0 != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = UsageAspect> + '_ {
        UsageAspect::ALL_ASPECTS.iter().copied().filter(move |a| self.contains(*a))
    }
}

impl FromIterator<UsageAspect> for AspectSet {
    fn from_iter<I: IntoIterator<Item = UsageAspect>>(iter: I) -> Self {
        let mut set = AspectSet::empty();
        for aspect in iter {
            set.insert(aspect);
        }
        set
    }
}

/// One (page, entity, aspect) dependency on a client wiki.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UsageRecord {
    pub page: super::PageId,
    pub entity_id: super::EntityId,
    pub aspect: UsageAspect,
}
