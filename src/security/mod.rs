//! Security subsystem: admission of inbound events and secret redaction.
//!
//! [`AuthGate`] is injected into the router at construction. It composes
//! [`Guard`] stages (admin allow-list, backend reachability) that run before any
//! session state is touched.

pub mod gate;
pub mod traits;

pub use gate::{AuthGate, RequireAdmin, RequireBackend};
pub use traits::{Admission, DenyReason, Guard};

/// Redact sensitive values for safe logging. Shows first 4 chars + "***" suffix.
pub fn redact(value: &str) -> String {
    if value.chars().count() <= 4 {
        "***".to_string()
    } else {
        let head: String = value.chars().take(4).collect();
        format!("{head}***")
    }
}

/// Redact an optional secret, marking absence explicitly.
pub fn redact_opt(value: Option<&str>) -> String {
    value.map_or_else(|| "(not set)".to_string(), redact)
}
