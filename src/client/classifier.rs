use std::fmt;

use crate::proto::ChangeKind;
use crate::proto::ChangeRecord;
use crate::Change;
use crate::ChangeId;
use crate::DiffPayload;
use crate::EntityId;
use crate::NewChange;
use crate::SiteId;
use crate::UserIdentity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrrelevantReason {
    /// Sent by a repository this client does not follow
    ForeignRepo { repo: String },
}

impl fmt::Display for IrrelevantReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            IrrelevantReason::ForeignRepo { repo } => write!(f, "change from foreign repository {repo}"),
        }
    }
}

/// Outcome of looking at one incoming record.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Relevant(Change),
    Irrelevant(IrrelevantReason),
    /// Cannot be understood by this build; never worth retrying
    Malformed(String),
}

/// Decides whether a wire record is an entity change this client applies.
#[derive(Debug, Clone)]
pub struct ChangeClassifier {
    repo_site_id: SiteId,
}

impl ChangeClassifier {
    pub fn new(repo_site_id: SiteId) -> Self {
        Self { repo_site_id }
    }

    pub fn classify(
        &self,
        origin_repo: &str,
        record: &ChangeRecord,
    ) -> Classification {
        if origin_repo != self.repo_site_id.as_str() {
            return Classification::Irrelevant(IrrelevantReason::ForeignRepo {
                repo: origin_repo.to_string(),
            });
        }
        if record.change_id == 0 {
            return Classification::Malformed("change id 0 is never assigned".to_string());
        }

        let entity_id = match record.entity_id.parse::<EntityId>() {
            Ok(id) => id,
            Err(e) => return Classification::Malformed(e.to_string()),
        };
        let change_type = match ChangeKind::try_from(record.change_kind)
            .ok()
            .and_then(ChangeKind::to_change_type)
        {
            Some(t) => t,
            None => return Classification::Malformed(format!("unknown change kind {}", record.change_kind)),
        };
        let diff = match DiffPayload::decode(&record.diff) {
            Ok(diff) => diff,
            Err(e) => return Classification::Malformed(e.to_string()),
        };

        let user = record
            .user
            .as_ref()
            .map(|u| UserIdentity {
                user_id: u.user_id,
                user_name: u.user_name.clone(),
                is_bot: u.is_bot,
            })
            .unwrap_or_default();

        let change = NewChange {
            entity_id,
            revision_id: record.revision_id,
            timestamp_ms: record.timestamp_ms,
            change_type,
            user,
            diff,
        }
        .into_change(ChangeId(record.change_id));
        Classification::Relevant(change)
    }
}
