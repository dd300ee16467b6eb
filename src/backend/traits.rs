//! Resource client traits and types for the panel control plane.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::{Entity, EntityKind};

/// Optional narrowing passed to `list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub search: Option<String>,
}

impl ListFilter {
    pub fn search(query: impl Into<String>) -> Self {
        Self {
            search: Some(query.into()),
        }
    }
}

/// Non-CRUD single-entity operations exposed by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntityAction {
    ResetTraffic,
    Restart,
    RevokeSubscription,
}

impl EntityAction {
    pub const fn path_segment(self) -> &'static str {
        match self {
            EntityAction::ResetTraffic => "reset-traffic",
            EntityAction::Restart => "restart",
            EntityAction::RevokeSubscription => "revoke",
        }
    }
}

/// Operations that can be applied to many entities at once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BulkVerb {
    Enable,
    Disable,
    Delete,
    ResetTraffic,
    ExtendExpiry { days: u32 },
}

impl BulkVerb {
    pub const fn as_str(self) -> &'static str {
        match self {
            BulkVerb::Enable => "enable",
            BulkVerb::Disable => "disable",
            BulkVerb::Delete => "delete",
            BulkVerb::ResetTraffic => "reset-traffic",
            BulkVerb::ExtendExpiry { .. } => "extend-expiration",
        }
    }

    pub fn describe(self) -> String {
        match self {
            BulkVerb::Enable => "enable".into(),
            BulkVerb::Disable => "disable".into(),
            BulkVerb::Delete => "delete".into(),
            BulkVerb::ResetTraffic => "reset traffic for".into(),
            BulkVerb::ExtendExpiry { days } => format!("extend expiry by {days} days for"),
        }
    }
}

/// Result of a bulk request. `affected` is `None` when the backend reports no count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BulkOutcome {
    pub requested: usize,
    pub affected: Option<usize>,
    pub detail: Option<String>,
}

impl BulkOutcome {
    pub fn is_partial(&self) -> bool {
        self.affected.is_some_and(|affected| affected < self.requested)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend request timed out")]
    Timeout,
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: String },
    #[error("backend rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected backend response: {0}")]
    Protocol(String),
}

impl BackendError {
    /// Transport-level failures that the operator may simply retry.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Timeout)
    }
}

/// Request/response translator for the panel API. Holds no session state.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn list(&self, kind: EntityKind, filter: &ListFilter) -> Result<Vec<Entity>, BackendError>;

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Entity, BackendError>;

    async fn create(&self, kind: EntityKind, payload: Map<String, Value>) -> Result<Entity, BackendError>;

    async fn update(
        &self,
        kind: EntityKind,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<Entity, BackendError>;

    async fn set_enabled(&self, kind: EntityKind, id: &str, enabled: bool) -> Result<Entity, BackendError>;

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), BackendError>;

    /// Run a non-CRUD action. Returns the refreshed entity when the backend echoes one.
    async fn invoke(
        &self,
        kind: EntityKind,
        id: &str,
        action: EntityAction,
    ) -> Result<Option<Entity>, BackendError>;

    async fn bulk(&self, kind: EntityKind, verb: BulkVerb, ids: &[String]) -> Result<BulkOutcome, BackendError>;

    /// The name of this client implementation.
    fn name(&self) -> &str;
}

/// Cheap liveness check used by the auth gate before every gated action.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_outcome_partial_detection() {
        let full = BulkOutcome {
            requested: 3,
            affected: Some(3),
            detail: None,
        };
        let partial = BulkOutcome {
            requested: 3,
            affected: Some(1),
            detail: None,
        };
        let unknown = BulkOutcome {
            requested: 3,
            affected: None,
            detail: None,
        };
        assert!(!full.is_partial());
        assert!(partial.is_partial());
        assert!(!unknown.is_partial());
    }

    #[test]
    fn unavailable_classification() {
        assert!(BackendError::Timeout.is_unavailable());
        assert!(BackendError::Unavailable("refused".into()).is_unavailable());
        assert!(!BackendError::Rejected("bad".into()).is_unavailable());
        assert!(!BackendError::NotFound {
            kind: EntityKind::User,
            id: "1".into()
        }
        .is_unavailable());
    }

    #[test]
    fn bulk_verb_wire_names() {
        assert_eq!(BulkVerb::ResetTraffic.as_str(), "reset-traffic");
        assert_eq!(BulkVerb::ExtendExpiry { days: 7 }.as_str(), "extend-expiration");
        assert!(BulkVerb::ExtendExpiry { days: 7 }.describe().contains("7 days"));
    }
}
