//! Wire types of the change relay, generated by `tonic-build` from
//! `proto/change_relay.proto`.

#[allow(clippy::all)]
pub mod relay {
    tonic::include_proto!("relay");
}

pub use relay::*;

use crate::Change;
use crate::ChangeType;
use crate::Result;

impl From<ChangeType> for ChangeKind {
    fn from(change_type: ChangeType) -> Self {
        match change_type {
            ChangeType::Add => ChangeKind::Add,
            ChangeType::Modify => ChangeKind::Modify,
            ChangeType::Remove => ChangeKind::Remove,
            ChangeType::Restore => ChangeKind::Restore,
        }
    }
}

impl ChangeKind {
    /// `None` for `Unspecified` and for values this build does not know.
    pub fn to_change_type(self) -> Option<ChangeType> {
        match self {
            ChangeKind::Add => Some(ChangeType::Add),
            ChangeKind::Modify => Some(ChangeType::Modify),
            ChangeKind::Remove => Some(ChangeType::Remove),
            ChangeKind::Restore => Some(ChangeType::Restore),
            ChangeKind::Unspecified => None,
        }
    }
}

impl ChangeRecord {
    pub fn from_change(change: &Change) -> Result<Self> {
        let user = change.user();
        Ok(ChangeRecord {
            change_id: change.change_id().get(),
            entity_id: change.entity_id().to_string(),
            revision_id: change.revision_id(),
            timestamp_ms: change.timestamp_ms(),
            change_kind: ChangeKind::from(change.change_type()) as i32,
            user: Some(UserIdentity {
                user_id: user.user_id,
                user_name: user.user_name.clone(),
                is_bot: user.is_bot,
            }),
            diff: change.diff().encode()?,
        })
    }
}

impl EntryOutcome {
    pub fn delivered(change_id: u64) -> Self {
        EntryOutcome {
            change_id,
            status: DeliveryStatus::Delivered as i32,
            reason: String::new(),
        }
    }

    pub fn rejected(
        change_id: u64,
        reason: impl Into<String>,
    ) -> Self {
        EntryOutcome {
            change_id,
            status: DeliveryStatus::Rejected as i32,
            reason: reason.into(),
        }
    }

    pub fn transient(
        change_id: u64,
        reason: impl Into<String>,
    ) -> Self {
        EntryOutcome {
            change_id,
            status: DeliveryStatus::TransientFailure as i32,
            reason: reason.into(),
        }
    }
}
