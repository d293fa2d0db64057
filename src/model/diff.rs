//! Versioned diff payloads.
//!
//! A diff is a closed set of typed operations. The outer [`DiffPayload`] tag
//! carries the format version so that clients running an older build can
//! refuse payloads they do not understand instead of misreading them.

use serde::Deserialize;
use serde::Serialize;

use super::AspectSet;
use super::EntityId;
use super::UsageAspect;
use crate::DispatchError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiffPayload {
    V1(EntityDiff),
}

impl DiffPayload {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn version(&self) -> u32 {
        match self {
            DiffPayload::V1(_) => 1,
        }
    }

    pub fn ops(&self) -> &[DiffOp] {
        match self {
            DiffPayload::V1(diff) => &diff.ops,
        }
    }

    pub fn affected_aspects(&self) -> AspectSet {
        self.ops().iter().filter_map(DiffOp::aspect).collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes a wire payload. Unknown enum tags come back as
    /// [`DispatchError::UnsupportedDiff`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| DispatchError::UnsupportedDiff(e.to_string()).into())
    }
}

impl Default for DiffPayload {
    fn default() -> Self {
        DiffPayload::V1(EntityDiff::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDiff {
    pub ops: Vec<DiffOp>,
}

impl EntityDiff {
    pub fn new(ops: Vec<DiffOp>) -> Self {
        Self { ops }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueChange {
    Added(String),
    Removed(String),
    Changed { old: String, new: String },
}

/// Single typed modification of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiffOp {
    Label {
        language: String,
        change: ValueChange,
    },
    Description {
        language: String,
        change: ValueChange,
    },
    Alias {
        language: String,
        added: Vec<String>,
        removed: Vec<String>,
    },
    Sitelink {
        site: String,
        change: ValueChange,
        badges_added: Vec<EntityId>,
        badges_removed: Vec<EntityId>,
    },
    Statement {
        guid: String,
        property: EntityId,
        change: ValueChange,
    },
}

impl DiffOp {
    /// Aliases have no aspect of their own; only `All` usages see them.
    pub fn aspect(&self) -> Option<UsageAspect> {
        match self {
            DiffOp::Label { .. } => Some(UsageAspect::Label),
            DiffOp::Description { .. } => Some(UsageAspect::Description),
            DiffOp::Alias { .. } => None,
            DiffOp::Sitelink { .. } => Some(UsageAspect::Sitelink),
            DiffOp::Statement { .. } => Some(UsageAspect::Statement),
        }
    }
}
