//! Classification of handler failures at the router boundary.

use crate::backend::BackendError;
use crate::entity::EntityKind;

/// What the router does with a failed handler. Authorization denials never get
/// here; the gate answers them before a handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Transport failure or timeout. State is left unchanged for a retry.
    BackendUnavailable,
    /// The referenced entity is gone. The session returns to its list or menu.
    NotFound { kind: EntityKind, id: String },
    /// Anything else, logged with full context.
    Unhandled,
}

impl Failure {
    pub fn classify(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<BackendError>() {
            Some(backend) if backend.is_unavailable() => Failure::BackendUnavailable,
            Some(BackendError::NotFound { kind, id }) => Failure::NotFound {
                kind: *kind,
                id: id.clone(),
            },
            _ => Failure::Unhandled,
        }
    }

    pub const fn message(&self) -> &'static str {
        match self {
            Failure::BackendUnavailable => {
                "⚠️ The panel backend did not respond. Nothing was changed; try again."
            }
            Failure::NotFound { .. } => "🔍 That entity no longer exists.",
            Failure::Unhandled => "❗ Something went wrong. Nothing was changed; try again.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn classifies_backend_errors_through_context() {
        let err = anyhow::Error::from(BackendError::Timeout).context("listing users");
        assert_eq!(Failure::classify(&err), Failure::BackendUnavailable);

        let err: anyhow::Result<()> = Err(BackendError::NotFound {
            kind: EntityKind::Node,
            id: "n1".into(),
        })
        .context("opening node");
        assert_eq!(
            Failure::classify(&err.unwrap_err()),
            Failure::NotFound {
                kind: EntityKind::Node,
                id: "n1".into()
            }
        );
    }

    #[test]
    fn everything_else_is_unhandled() {
        let rejected = anyhow::Error::from(BackendError::Rejected("bad".into()));
        assert_eq!(Failure::classify(&rejected), Failure::Unhandled);
        assert_eq!(Failure::classify(&anyhow::anyhow!("boom")), Failure::Unhandled);
        assert!(!Failure::Unhandled.message().contains("boom"));
    }
}
