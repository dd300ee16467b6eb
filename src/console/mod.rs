//! The console: a per-session finite-state machine over chat events.
//!
//! [`ConsoleRouter`] owns the transition table in [`router`]. Workflow handlers
//! live in [`navigation`], [`form`], [`guarded`] and [`bulk`]; they mutate a
//! working copy of the session and return a [`router::Transition`] naming the
//! next [`ConsoleState`] and the [`Render`] to show.

pub mod bulk;
pub mod error;
pub mod event;
pub mod form;
pub mod guarded;
pub mod navigation;
pub mod pagination;
pub mod render;
pub mod router;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use event::{CallbackToken, InboundEvent, Verb};
pub use render::{Button, Render};
pub use router::ConsoleRouter;
pub use state::ConsoleState;

use std::sync::Arc;

use crate::backend::{ReachabilityProbe, ResourceClient};
use crate::config::Config;
use crate::security::AuthGate;
use crate::sessions::SessionStore;

/// Wire a router from config: standard auth gate over `probe`, shared session store.
pub fn create_router(
    config: &Config,
    client: Arc<dyn ResourceClient>,
    probe: Arc<dyn ReachabilityProbe>,
    store: Arc<dyn SessionStore>,
) -> ConsoleRouter {
    let gate = AuthGate::standard(config.admin_ids.iter().copied(), probe);
    ConsoleRouter::new(client, gate, store, config.console.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::FakeClient;
    use crate::sessions::{create_session_store, SessionKey};

    #[tokio::test]
    async fn factory_uses_the_configured_allow_list() {
        let config = Config {
            admin_ids: vec![7],
            ..Config::default()
        };
        let client = Arc::new(FakeClient::default());
        let router = create_router(&config, client.clone(), client, create_session_store());

        let allowed = router
            .handle(SessionKey::new(7, 7), InboundEvent::command("/users").unwrap())
            .await;
        assert!(allowed.has_verb(Verb::List));

        let denied = router
            .handle(SessionKey::new(8, 8), InboundEvent::command("/users").unwrap())
            .await;
        assert!(denied.buttons.is_empty());
    }
}
