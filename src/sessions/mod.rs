//! Session management: per-(user, chat) console state.

pub mod in_memory;
pub mod traits;

pub use in_memory::InMemorySessionStore;
pub use traits::{Listing, SearchContext, Session, SessionKey, SessionStore};

use std::sync::Arc;

/// Create a default in-memory session store.
pub fn create_session_store() -> Arc<dyn SessionStore> {
    Arc::new(InMemorySessionStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, EntityKind};
    use serde_json::json;

    fn user(id: &str) -> Entity {
        Entity::from_value(EntityKind::User, json!({"uuid": id, "username": id})).unwrap()
    }

    #[test]
    fn factory_returns_in_memory_store() {
        assert_eq!(create_session_store().name(), "in_memory");
    }

    #[test]
    fn listing_tracks_cache_and_eviction() {
        let mut session = Session::new(SessionKey::new(1, 1));
        session.page = 3;
        session.set_listing(EntityKind::User, vec![user("a"), user("b"), user("c")]);
        assert_eq!(session.page, 0);
        assert_eq!(session.listed_entities(EntityKind::User).len(), 3);
        assert!(session.listed_entities(EntityKind::Node).is_empty());

        session.evict(EntityKind::User, "b");
        let ids: Vec<&str> = session
            .listed_entities(EntityKind::User)
            .iter()
            .map(|e| e.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(session.cached(EntityKind::User, "b").is_none());
    }

    #[test]
    fn clear_workflow_drops_intent_only() {
        let mut session = Session::new(SessionKey::new(1, 1));
        session.set_listing(EntityKind::User, vec![user("a")]);
        session.edit_buffer.push(crate::entity::FieldEntry {
            field: "username".into(),
            value: Some(json!("a")),
            validated: true,
        });
        session.clear_workflow();
        assert!(session.edit_buffer.is_empty());
        assert!(session.pending_action.is_none());
        assert!(session.has_listing(EntityKind::User));
    }
}
