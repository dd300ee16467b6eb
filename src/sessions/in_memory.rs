//! In-memory session store implementation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use super::traits::{Session, SessionKey, SessionStore};

/// An in-memory session store backed by a mutex-protected hash map.
/// Sessions do not survive a restart.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, key: &SessionKey) -> Result<Option<Session>> {
        let sessions = self.sessions.lock();
        Ok(sessions.get(key).cloned())
    }

    async fn put(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.lock();
        sessions.insert(session.key, session);
        Ok(())
    }

    async fn delete(&self, key: &SessionKey) -> Result<()> {
        let mut sessions = self.sessions.lock();
        sessions.remove(key);
        Ok(())
    }

    async fn evict_idle(&self, ttl: Duration) -> Result<usize> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| session.idle_for(now) <= ttl);
        Ok(before - sessions.len())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.sessions.lock().len())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::state::ConsoleState;
    use crate::entity::EntityKind;

    fn test_key() -> SessionKey {
        SessionKey::new(1001, 77)
    }

    #[tokio::test]
    async fn put_and_get_session() {
        let store = InMemorySessionStore::new();
        let mut session = Session::new(test_key());
        session.state = ConsoleState::SectionMenu(EntityKind::Node);
        store.put(session).await.unwrap();

        let fetched = store.get(&test_key()).await.unwrap().unwrap();
        assert_eq!(fetched.state, ConsoleState::SectionMenu(EntityKind::Node));
    }

    #[tokio::test]
    async fn get_returns_none_for_missing_session() {
        let store = InMemorySessionStore::new();
        assert!(store.get(&test_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_are_per_user_and_chat() {
        let store = InMemorySessionStore::new();
        store.put(Session::new(SessionKey::new(1, 10))).await.unwrap();
        store.put(Session::new(SessionKey::new(1, 11))).await.unwrap();
        store.put(Session::new(SessionKey::new(2, 10))).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 3);

        store.delete(&SessionKey::new(1, 10)).await.unwrap();
        assert!(store.get(&SessionKey::new(1, 10)).await.unwrap().is_none());
        assert!(store.get(&SessionKey::new(1, 11)).await.unwrap().is_some());

        // Deleting twice is fine
        store.delete(&SessionKey::new(1, 10)).await.unwrap();
    }

    #[tokio::test]
    async fn evict_idle_removes_only_stale_sessions() {
        let store = InMemorySessionStore::new();

        let mut stale = Session::new(SessionKey::new(1, 1));
        stale.last_activity = Utc::now() - chrono::Duration::minutes(45);
        store.put(stale).await.unwrap();
        store.put(Session::new(SessionKey::new(2, 2))).await.unwrap();

        let removed = store.evict_idle(Duration::from_secs(30 * 60)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(&SessionKey::new(1, 1)).await.unwrap().is_none());
        assert!(store.get(&SessionKey::new(2, 2)).await.unwrap().is_some());
    }
}
