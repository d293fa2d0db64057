use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::DispatchError;
use crate::Error;

/// Position in the change log. Zero means "nothing yet".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangeId(pub u64);

impl ChangeId {
    pub const ZERO: ChangeId = ChangeId(0);

    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn next(self) -> ChangeId {
        ChangeId(self.0.saturating_add(1))
    }
}

impl fmt::Display for ChangeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChangeId {
    fn from(v: u64) -> Self {
        ChangeId(v)
    }
}

/// Entity namespace, derived from the id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Item,
    Property,
    Lexeme,
    MediaInfo,
}

impl EntityKind {
    pub fn prefix(self) -> char {
        match self {
            EntityKind::Item => 'Q',
            EntityKind::Property => 'P',
            EntityKind::Lexeme => 'L',
            EntityKind::MediaInfo => 'M',
        }
    }

    fn from_prefix(c: char) -> Option<Self> {
        match c {
            'Q' => Some(EntityKind::Item),
            'P' => Some(EntityKind::Property),
            'L' => Some(EntityKind::Lexeme),
            'M' => Some(EntityKind::MediaInfo),
            _ => None,
        }
    }
}

/// Stable identifier of a structured-data entity, e.g. `Q42`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    kind: EntityKind,
    number: u64,
}

impl EntityId {
    pub fn new(
        kind: EntityKind,
        number: u64,
    ) -> Self {
        Self { kind, number }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn number(&self) -> u64 {
        self.number
    }
}

impl fmt::Display for EntityId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.number)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::from(DispatchError::InvalidEntityId(s.to_string()));
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let kind = chars
            .next()
            .map(|c| c.to_ascii_uppercase())
            .and_then(EntityKind::from_prefix)
            .ok_or_else(invalid)?;
        let digits = chars.as_str();
        if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let number = digits.parse::<u64>().map_err(|_| invalid())?;
        Ok(EntityId { kind, number })
    }
}

impl TryFrom<String> for EntityId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.to_string()
    }
}

/// Global identifier of a wiki, e.g. `enwiki`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() || id.contains('\0') {
            return Err(DispatchError::InvalidSiteId(id).into());
        }
        Ok(SiteId(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Local page identifier on a client wiki.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
