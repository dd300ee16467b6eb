//! Admission guard trait for the console's inbound events.
//!
//! A [`Guard`] is one interceptor stage in front of the router. Stages are
//! composed by [`AuthGate`](super::AuthGate) and run in order; the first
//! denial wins and later stages never run.

use async_trait::async_trait;
use std::fmt;

/// Why an inbound event was turned away. Carries no backend detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// Caller is not on the admin allow-list.
    NotAdmin,
    /// Every reachability probe endpoint failed or timed out.
    BackendUnavailable,
}

impl DenyReason {
    /// Fixed operator-facing message.
    pub const fn message(self) -> &'static str {
        match self {
            DenyReason::NotAdmin => "⛔ You are not authorized to use this console.",
            DenyReason::BackendUnavailable => {
                "⚠️ The panel backend is unavailable right now. Please try again later."
            }
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NotAdmin => f.write_str("not_admin"),
            DenyReason::BackendUnavailable => f.write_str("backend_unavailable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied(DenyReason),
}

impl Admission {
    pub fn is_allowed(self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// One admission stage.
///
/// Implementations must be `Send + Sync`; the gate is shared by every session lane.
#[async_trait]
pub trait Guard: Send + Sync {
    /// Admit or deny the given operator.
    async fn check(&self, user_id: i64) -> Admission;

    /// Stage name, used in logs.
    fn name(&self) -> &str;
}
