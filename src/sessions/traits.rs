//! Session storage traits and types for per-conversation console state.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use crate::console::state::{ConsoleState, PendingAction};
use crate::entity::{Entity, EntityKind, EntityRef, FieldEntry};

/// Composite key identifying a unique session: one operator in one chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub user_id: i64,
    pub chat_id: i64,
}

impl SessionKey {
    pub fn new(user_id: i64, chat_id: i64) -> Self {
        Self { user_id, chat_id }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.chat_id)
    }
}

/// Active search, kept while paging through its results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchContext {
    pub kind: EntityKind,
    pub query: String,
}

/// Ids of the last rendered list, in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub kind: EntityKind,
    pub ids: Vec<String>,
}

/// A tracked console session.
#[derive(Debug, Clone)]
pub struct Session {
    pub key: SessionKey,
    pub state: ConsoleState,
    pub pending_action: Option<PendingAction>,
    pub edit_buffer: Vec<FieldEntry>,
    pub search_context: Option<SearchContext>,
    pub page: usize,
    pub listing: Option<Listing>,
    pub entity_cache: HashMap<EntityRef, Entity>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            state: ConsoleState::RootMenu,
            pending_action: None,
            edit_buffer: Vec::new(),
            search_context: None,
            page: 0,
            listing: None,
            entity_cache: HashMap::new(),
            last_activity: Utc::now(),
        }
    }

    /// Drop any in-progress workflow intent. Starting a workflow always begins here.
    pub fn clear_workflow(&mut self) {
        self.pending_action = None;
        self.edit_buffer.clear();
    }

    pub fn cache(&mut self, entity: Entity) {
        self.entity_cache.insert(entity.reference(), entity);
    }

    pub fn cached(&self, kind: EntityKind, id: &str) -> Option<&Entity> {
        self.entity_cache.get(&EntityRef::new(kind, id))
    }

    /// Forget an entity everywhere in the session (cache and current listing).
    pub fn evict(&mut self, kind: EntityKind, id: &str) {
        self.entity_cache.remove(&EntityRef::new(kind, id));
        if let Some(listing) = self.listing.as_mut().filter(|listing| listing.kind == kind) {
            listing.ids.retain(|listed| listed != id);
        }
    }

    /// Replace the listing and refresh the cache with the fetched snapshots.
    pub fn set_listing(&mut self, kind: EntityKind, entities: Vec<Entity>) {
        self.entity_cache.retain(|reference, _| reference.kind != kind);
        let ids = entities.iter().map(|entity| entity.id.clone()).collect();
        for entity in entities {
            self.cache(entity);
        }
        self.listing = Some(Listing { kind, ids });
        self.page = 0;
    }

    /// Cached entities of the current listing, in order. Evicted ids are skipped.
    pub fn listed_entities(&self, kind: EntityKind) -> Vec<&Entity> {
        match &self.listing {
            Some(listing) if listing.kind == kind => listing
                .ids
                .iter()
                .filter_map(|id| self.cached(kind, id))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn has_listing(&self, kind: EntityKind) -> bool {
        self.listing.as_ref().is_some_and(|listing| listing.kind == kind)
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity).to_std().unwrap_or_default()
    }
}

/// Storage for console sessions keyed by (user, chat).
///
/// The router is the only writer: it loads a session, works on a copy, and
/// stores the result only when the handler finished.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Get an existing session by key, if it exists.
    async fn get(&self, key: &SessionKey) -> Result<Option<Session>>;

    /// Insert or replace a session.
    async fn put(&self, session: Session) -> Result<()>;

    /// Delete a session. Deleting a missing session is not an error.
    async fn delete(&self, key: &SessionKey) -> Result<()>;

    /// Drop sessions idle longer than `ttl`. Returns how many were removed.
    async fn evict_idle(&self, ttl: Duration) -> Result<usize>;

    /// Number of live sessions.
    async fn len(&self) -> Result<usize>;

    /// The name of this session store implementation.
    fn name(&self) -> &str;
}
