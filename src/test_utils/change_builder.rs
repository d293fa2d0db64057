use crate::Change;
use crate::ChangeId;
use crate::ChangeType;
use crate::DiffOp;
use crate::DiffPayload;
use crate::EntityDiff;
use crate::EntityId;
use crate::NewChange;
use crate::UserIdentity;
use crate::ValueChange;

/// Fluent builder for [`NewChange`] and [`Change`] fixtures.
///
/// Defaults to a `Modify` of revision 1 by an anonymous user with an empty
/// diff.
pub struct ChangeBuilder {
    entity_id: EntityId,
    revision_id: u64,
    timestamp_ms: u64,
    change_type: ChangeType,
    user: UserIdentity,
    ops: Vec<DiffOp>,
}

impl ChangeBuilder {
    pub fn new(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.parse().expect("valid entity id"),
            revision_id: 1,
            timestamp_ms: 1_700_000_000_000,
            change_type: ChangeType::Modify,
            user: UserIdentity::default(),
            ops: Vec::new(),
        }
    }

    pub fn revision(
        mut self,
        revision_id: u64,
    ) -> Self {
        self.revision_id = revision_id;
        self
    }

    pub fn timestamp(
        mut self,
        timestamp_ms: u64,
    ) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn change_type(
        mut self,
        change_type: ChangeType,
    ) -> Self {
        self.change_type = change_type;
        self
    }

    pub fn user(
        mut self,
        user_id: u64,
        user_name: &str,
    ) -> Self {
        self.user = UserIdentity {
            user_id,
            user_name: user_name.to_string(),
            is_bot: false,
        };
        self
    }

    pub fn label(
        mut self,
        language: &str,
        value: &str,
    ) -> Self {
        self.ops.push(DiffOp::Label {
            language: language.to_string(),
            change: ValueChange::Added(value.to_string()),
        });
        self
    }

    pub fn description(
        mut self,
        language: &str,
        value: &str,
    ) -> Self {
        self.ops.push(DiffOp::Description {
            language: language.to_string(),
            change: ValueChange::Added(value.to_string()),
        });
        self
    }

    pub fn alias(
        mut self,
        language: &str,
        value: &str,
    ) -> Self {
        self.ops.push(DiffOp::Alias {
            language: language.to_string(),
            added: vec![value.to_string()],
            removed: Vec::new(),
        });
        self
    }

    pub fn sitelink(
        mut self,
        site: &str,
        title: &str,
    ) -> Self {
        self.ops.push(DiffOp::Sitelink {
            site: site.to_string(),
            change: ValueChange::Added(title.to_string()),
            badges_added: Vec::new(),
            badges_removed: Vec::new(),
        });
        self
    }

    pub fn statement(
        mut self,
        property: &str,
        value: &str,
    ) -> Self {
        let guid = format!("{}${}", self.entity_id, self.ops.len() + 1);
        self.ops.push(DiffOp::Statement {
            guid,
            property: property.parse().expect("valid property id"),
            change: ValueChange::Added(value.to_string()),
        });
        self
    }

    pub fn build_new(self) -> NewChange {
        NewChange {
            entity_id: self.entity_id,
            revision_id: self.revision_id,
            timestamp_ms: self.timestamp_ms,
            change_type: self.change_type,
            user: self.user,
            diff: DiffPayload::V1(EntityDiff::new(self.ops)),
        }
    }

    pub fn build(
        self,
        change_id: u64,
    ) -> Change {
        self.build_new().into_change(ChangeId(change_id))
    }
}
