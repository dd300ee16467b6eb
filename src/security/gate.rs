//! The auth gate and its two standard stages.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use super::traits::{Admission, DenyReason, Guard};
use crate::backend::ReachabilityProbe;

/// Static admin allow-list, fixed for the process lifetime.
pub struct RequireAdmin {
    admins: HashSet<i64>,
}

impl RequireAdmin {
    pub fn new(admins: impl IntoIterator<Item = i64>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Guard for RequireAdmin {
    async fn check(&self, user_id: i64) -> Admission {
        if self.admins.contains(&user_id) {
            Admission::Allowed
        } else {
            Admission::Denied(DenyReason::NotAdmin)
        }
    }

    fn name(&self) -> &str {
        "require_admin"
    }
}

/// Live backend reachability. The probe result is never cached.
pub struct RequireBackend {
    probe: Arc<dyn ReachabilityProbe>,
}

impl RequireBackend {
    pub fn new(probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Guard for RequireBackend {
    async fn check(&self, _user_id: i64) -> Admission {
        match self.probe.probe().await {
            Ok(()) => Admission::Allowed,
            Err(err) => {
                tracing::warn!(error = %err, "backend reachability probe failed");
                Admission::Denied(DenyReason::BackendUnavailable)
            }
        }
    }

    fn name(&self) -> &str {
        "require_backend"
    }
}

/// Ordered composition of guard stages.
pub struct AuthGate {
    stages: Vec<Box<dyn Guard>>,
}

impl AuthGate {
    pub fn new(stages: Vec<Box<dyn Guard>>) -> Self {
        Self { stages }
    }

    /// The standard gate: allow-list first, then the backend probe.
    pub fn standard(admins: impl IntoIterator<Item = i64>, probe: Arc<dyn ReachabilityProbe>) -> Self {
        Self::new(vec![
            Box::new(RequireAdmin::new(admins)),
            Box::new(RequireBackend::new(probe)),
        ])
    }

    pub async fn admit(&self, user_id: i64) -> Admission {
        for stage in &self.stages {
            if let Admission::Denied(reason) = stage.check(user_id).await {
                tracing::info!(user_id, stage = stage.name(), reason = %reason, "event denied");
                return Admission::Denied(reason);
            }
        }
        Admission::Allowed
    }

}
