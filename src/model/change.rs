use serde::Deserialize;
use serde::Serialize;

use super::AspectSet;
use super::DiffPayload;
use super::EntityId;
use crate::ChangeId;

/// Kind of mutation recorded for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Add,
    Modify,
    Remove,
    Restore,
}

impl ChangeType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeType::Add => "add",
            ChangeType::Modify => "update",
            ChangeType::Remove => "remove",
            ChangeType::Restore => "restore",
        }
    }
}

/// Who performed the edit on the repository.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: u64,
    pub user_name: String,
    pub is_bot: bool,
}

/// A mutation reported by the content platform, before it has a place in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewChange {
    pub entity_id: EntityId,
    pub revision_id: u64,
    /// Unix epoch, milliseconds
    pub timestamp_ms: u64,
    pub change_type: ChangeType,
    pub user: UserIdentity,
    pub diff: DiffPayload,
}

impl NewChange {
    /// Freezes the mutation under the id the store allocated for it.
    pub fn into_change(
        self,
        change_id: ChangeId,
    ) -> Change {
        Change {
            change_id,
            entity_id: self.entity_id,
            revision_id: self.revision_id,
            timestamp_ms: self.timestamp_ms,
            change_type: self.change_type,
            user: self.user,
            diff: self.diff,
        }
    }
}

/// Immutable record of one mutation to an entity.
///
/// Fields are private: once the store has assigned a `change_id` nothing can
/// alter the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    change_id: ChangeId,
    entity_id: EntityId,
    revision_id: u64,
    timestamp_ms: u64,
    change_type: ChangeType,
    user: UserIdentity,
    diff: DiffPayload,
}

impl Change {
    pub fn change_id(&self) -> ChangeId {
        self.change_id
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    pub fn revision_id(&self) -> u64 {
        self.revision_id
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    pub fn diff(&self) -> &DiffPayload {
        &self.diff
    }

    /// Usage aspects touched by this change.
    ///
    /// Removing or restoring an entity affects every aspect, whatever the diff
    /// says.
    pub fn affected_aspects(&self) -> AspectSet {
        match self.change_type {
            ChangeType::Remove | ChangeType::Restore => AspectSet::everything(),
            ChangeType::Add | ChangeType::Modify => self.diff.affected_aspects(),
        }
    }
}
