//! The single consolidated state enumeration of the console.

use serde_json::{Map, Value};
use std::fmt;

use super::guarded::GuardedVerb;
use crate::backend::BulkVerb;
use crate::entity::EntityKind;

/// What a free-text reply is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputPurpose {
    Search(EntityKind),
    BulkIds(EntityKind),
    ExpiringDays(EntityKind),
    ExtendDays(EntityKind),
}

impl InputPurpose {
    pub const fn kind(self) -> EntityKind {
        match self {
            InputPurpose::Search(kind)
            | InputPurpose::BulkIds(kind)
            | InputPurpose::ExpiringDays(kind)
            | InputPurpose::ExtendDays(kind) => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConsoleState {
    RootMenu,
    SectionMenu(EntityKind),
    ListSelect(EntityKind),
    EntityView { kind: EntityKind, id: String },
    AwaitTextInput(InputPurpose),
    ConfirmAction(GuardedVerb),
    EditFieldSelect { kind: EntityKind, id: String },
    EditFieldValue { kind: EntityKind, id: String, field: String },
    CreateField { kind: EntityKind, index: usize },
    BulkSelect(EntityKind),
    BulkConfirm(EntityKind),
}

/// Data-free discriminant used by the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateTag {
    RootMenu,
    SectionMenu,
    ListSelect,
    EntityView,
    AwaitTextInput,
    ConfirmAction,
    EditFieldSelect,
    EditFieldValue,
    CreateField,
    BulkSelect,
    BulkConfirm,
}

impl StateTag {
    pub const ALL: [StateTag; 11] = [
        StateTag::RootMenu,
        StateTag::SectionMenu,
        StateTag::ListSelect,
        StateTag::EntityView,
        StateTag::AwaitTextInput,
        StateTag::ConfirmAction,
        StateTag::EditFieldSelect,
        StateTag::EditFieldValue,
        StateTag::CreateField,
        StateTag::BulkSelect,
        StateTag::BulkConfirm,
    ];
}

impl ConsoleState {
    pub fn tag(&self) -> StateTag {
        match self {
            ConsoleState::RootMenu => StateTag::RootMenu,
            ConsoleState::SectionMenu(_) => StateTag::SectionMenu,
            ConsoleState::ListSelect(_) => StateTag::ListSelect,
            ConsoleState::EntityView { .. } => StateTag::EntityView,
            ConsoleState::AwaitTextInput(_) => StateTag::AwaitTextInput,
            ConsoleState::ConfirmAction(_) => StateTag::ConfirmAction,
            ConsoleState::EditFieldSelect { .. } => StateTag::EditFieldSelect,
            ConsoleState::EditFieldValue { .. } => StateTag::EditFieldValue,
            ConsoleState::CreateField { .. } => StateTag::CreateField,
            ConsoleState::BulkSelect(_) => StateTag::BulkSelect,
            ConsoleState::BulkConfirm(_) => StateTag::BulkConfirm,
        }
    }

    /// Menu and browsing states. Everything else belongs to a workflow.
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            ConsoleState::RootMenu
                | ConsoleState::SectionMenu(_)
                | ConsoleState::ListSelect(_)
                | ConsoleState::EntityView { .. }
        )
    }

    /// The entity kind this state is scoped to, if any.
    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            ConsoleState::RootMenu | ConsoleState::ConfirmAction(_) => None,
            ConsoleState::SectionMenu(kind)
            | ConsoleState::ListSelect(kind)
            | ConsoleState::BulkSelect(kind)
            | ConsoleState::BulkConfirm(kind)
            | ConsoleState::EntityView { kind, .. }
            | ConsoleState::EditFieldSelect { kind, .. }
            | ConsoleState::EditFieldValue { kind, .. }
            | ConsoleState::CreateField { kind, .. } => Some(*kind),
            ConsoleState::AwaitTextInput(purpose) => Some(purpose.kind()),
        }
    }
}

impl fmt::Display for ConsoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleState::RootMenu => f.write_str("ROOT_MENU"),
            ConsoleState::SectionMenu(kind) => write!(f, "SECTION_MENU({kind})"),
            ConsoleState::ListSelect(kind) => write!(f, "LIST_SELECT({kind})"),
            ConsoleState::EntityView { kind, id } => write!(f, "ENTITY_VIEW({kind},{id})"),
            ConsoleState::AwaitTextInput(purpose) => write!(f, "AWAIT_TEXT_INPUT({purpose:?})"),
            ConsoleState::ConfirmAction(verb) => write!(f, "CONFIRM_ACTION({verb:?})"),
            ConsoleState::EditFieldSelect { kind, id } => write!(f, "EDIT_FIELD_SELECT({kind},{id})"),
            ConsoleState::EditFieldValue { kind, id, field } => {
                write!(f, "EDIT_FIELD_VALUE({kind},{id},{field})")
            }
            ConsoleState::CreateField { kind, index } => write!(f, "CREATE_FIELD({kind},{index})"),
            ConsoleState::BulkSelect(kind) => write!(f, "BULK_SELECT({kind})"),
            ConsoleState::BulkConfirm(kind) => write!(f, "BULK_CONFIRM({kind})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingVerb {
    Guarded(GuardedVerb),
    Bulk(BulkVerb),
}

/// Intent stashed between a confirmation prompt and the operator's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
    pub verb: PendingVerb,
    pub kind: EntityKind,
    pub target_ids: Vec<String>,
    pub fields: Map<String, Value>,
}

impl PendingAction {
    pub fn guarded(verb: GuardedVerb, kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            verb: PendingVerb::Guarded(verb),
            kind,
            target_ids: vec![id.into()],
            fields: Map::new(),
        }
    }

    pub fn bulk(verb: BulkVerb, kind: EntityKind) -> Self {
        Self {
            verb: PendingVerb::Bulk(verb),
            kind,
            target_ids: Vec::new(),
            fields: Map::new(),
        }
    }

    pub fn bulk_verb(&self) -> Option<BulkVerb> {
        match self.verb {
            PendingVerb::Bulk(verb) => Some(verb),
            PendingVerb::Guarded(_) => None,
        }
    }

    pub fn single_target(&self) -> Option<&str> {
        match self.target_ids.as_slice() {
            [id] => Some(id.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_states() {
        assert!(ConsoleState::RootMenu.is_navigation());
        assert!(ConsoleState::EntityView {
            kind: EntityKind::User,
            id: "1".into()
        }
        .is_navigation());
        assert!(!ConsoleState::BulkConfirm(EntityKind::User).is_navigation());
        assert!(!ConsoleState::AwaitTextInput(InputPurpose::Search(EntityKind::Node)).is_navigation());
    }

    #[test]
    fn kind_scoping() {
        assert_eq!(ConsoleState::RootMenu.kind(), None);
        assert_eq!(
            ConsoleState::AwaitTextInput(InputPurpose::ExtendDays(EntityKind::Host)).kind(),
            Some(EntityKind::Host)
        );
        assert_eq!(
            ConsoleState::CreateField {
                kind: EntityKind::Node,
                index: 2
            }
            .to_string(),
            "CREATE_FIELD(node,2)"
        );
    }

    #[test]
    fn pending_single_target() {
        let pending = PendingAction::guarded(GuardedVerb::Delete, EntityKind::User, "u1");
        assert_eq!(pending.single_target(), Some("u1"));
        assert_eq!(pending.bulk_verb(), None);

        let bulk = PendingAction::bulk(BulkVerb::Disable, EntityKind::User);
        assert_eq!(bulk.single_target(), None);
        assert_eq!(bulk.bulk_verb(), Some(BulkVerb::Disable));
    }
}
