//! Recording fake backend and a router harness for workflow tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::event::{CallbackToken, InboundEvent};
use super::render::Render;
use super::router::ConsoleRouter;
use crate::backend::{
    BackendError, BulkOutcome, BulkVerb, EntityAction, ListFilter, ReachabilityProbe, ResourceClient,
};
use crate::config::ConsoleConfig;
use crate::entity::{Entity, EntityKind, EntityStatus};
use crate::security::AuthGate;
use crate::sessions::{create_session_store, Session, SessionKey, SessionStore};

const MUTATIONS: &[&str] = &["create", "update", "set_enabled", "delete", "invoke", "bulk"];

pub fn user(id: &str, name: &str) -> Entity {
    user_with(json!({ "uuid": id, "username": name, "status": "ACTIVE" }))
}

pub fn user_with(value: Value) -> Entity {
    Entity::from_value(EntityKind::User, value).unwrap()
}

pub fn user_expiring(id: &str, at: DateTime<Utc>) -> Entity {
    user_with(json!({
        "uuid": id,
        "username": id,
        "status": "ACTIVE",
        "expireAt": at.to_rfc3339(),
    }))
}

#[derive(Default)]
struct FakeState {
    entities: Vec<Entity>,
    calls: Vec<&'static str>,
    last_search: Option<String>,
    last_payload: Option<Map<String, Value>>,
    last_bulk: Option<(BulkVerb, Vec<String>)>,
    fail_next: Option<BackendError>,
    reject_next: Option<String>,
    unreachable: bool,
}

/// In-memory `ResourceClient` that records every call.
#[derive(Default)]
pub struct FakeClient {
    state: Mutex<FakeState>,
}

impl FakeClient {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                entities,
                ..FakeState::default()
            }),
        }
    }

    pub fn count(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| **c == call).count()
    }

    pub fn mutations(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| MUTATIONS.contains(c))
            .count()
    }

    pub fn last_search(&self) -> Option<String> {
        self.state.lock().last_search.clone()
    }

    pub fn last_payload(&self) -> Option<Map<String, Value>> {
        self.state.lock().last_payload.clone()
    }

    pub fn last_bulk(&self) -> Option<(BulkVerb, Vec<String>)> {
        self.state.lock().last_bulk.clone()
    }

    /// The next call of any kind fails with a timeout.
    pub fn fail_next_with_timeout(&self) {
        self.state.lock().fail_next = Some(BackendError::Timeout);
    }

    /// The next mutating call is rejected with `detail`.
    pub fn reject_next(&self, detail: &str) {
        self.state.lock().reject_next = Some(detail.to_string());
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    /// Simulate another operator deleting an entity.
    pub fn remove(&self, kind: EntityKind, id: &str) {
        self.state
            .lock()
            .entities
            .retain(|entity| !(entity.kind == kind && entity.id == id));
    }

    fn begin(&self, call: &'static str) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        if MUTATIONS.contains(&call) {
            if let Some(detail) = state.reject_next.take() {
                return Err(BackendError::Rejected(detail));
            }
        }
        Ok(())
    }

    fn find(&self, kind: EntityKind, id: &str) -> Result<Entity, BackendError> {
        self.state
            .lock()
            .entities
            .iter()
            .find(|entity| entity.kind == kind && entity.id == id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                kind,
                id: id.to_string(),
            })
    }

    fn replace(&self, entity: Entity) {
        let mut state = self.state.lock();
        if let Some(slot) = state
            .entities
            .iter_mut()
            .find(|slot| slot.kind == entity.kind && slot.id == entity.id)
        {
            *slot = entity;
        }
    }
}

#[async_trait]
impl ResourceClient for FakeClient {
    async fn list(&self, kind: EntityKind, filter: &ListFilter) -> Result<Vec<Entity>, BackendError> {
        self.begin("list")?;
        let mut state = self.state.lock();
        state.last_search.clone_from(&filter.search);
        Ok(state
            .entities
            .iter()
            .filter(|entity| entity.kind == kind)
            .cloned()
            .collect())
    }

    async fn get(&self, kind: EntityKind, id: &str) -> Result<Entity, BackendError> {
        self.begin("get")?;
        self.find(kind, id)
    }

    async fn create(&self, kind: EntityKind, payload: Map<String, Value>) -> Result<Entity, BackendError> {
        self.begin("create")?;
        let mut object = payload.clone();
        object.insert("uuid".into(), Value::String(uuid::Uuid::new_v4().to_string()));
        let entity = Entity::from_value(kind, Value::Object(object))
            .ok_or_else(|| BackendError::Protocol("unusable payload".into()))?;
        let mut state = self.state.lock();
        state.last_payload = Some(payload);
        state.entities.push(entity.clone());
        Ok(entity)
    }

    async fn update(&self, kind: EntityKind, id: &str, patch: Map<String, Value>) -> Result<Entity, BackendError> {
        self.begin("update")?;
        self.state.lock().last_payload = Some(patch.clone());
        let current = self.find(kind, id)?;
        let mut object = current.payload.as_object().cloned().unwrap_or_default();
        object.extend(patch);
        let entity = Entity::from_value(kind, Value::Object(object))
            .ok_or_else(|| BackendError::Protocol("unusable payload".into()))?;
        self.replace(entity.clone());
        Ok(entity)
    }

    async fn set_enabled(&self, kind: EntityKind, id: &str, enabled: bool) -> Result<Entity, BackendError> {
        self.begin("set_enabled")?;
        let mut entity = self.find(kind, id)?;
        entity.status = if enabled {
            EntityStatus::Active
        } else {
            EntityStatus::Disabled
        };
        self.replace(entity.clone());
        Ok(entity)
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), BackendError> {
        self.begin("delete")?;
        self.find(kind, id)?;
        self.remove(kind, id);
        Ok(())
    }

    async fn invoke(&self, kind: EntityKind, id: &str, _action: EntityAction) -> Result<Option<Entity>, BackendError> {
        self.begin("invoke")?;
        self.find(kind, id).map(Some)
    }

    async fn bulk(&self, kind: EntityKind, verb: BulkVerb, ids: &[String]) -> Result<BulkOutcome, BackendError> {
        self.begin("bulk")?;
        let mut state = self.state.lock();
        state.last_bulk = Some((verb, ids.to_vec()));
        let affected = ids
            .iter()
            .filter(|id| {
                state
                    .entities
                    .iter()
                    .any(|entity| entity.kind == kind && &entity.id == *id)
            })
            .count();
        Ok(BulkOutcome {
            requested: ids.len(),
            affected: Some(affected),
            detail: None,
        })
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[async_trait]
impl ReachabilityProbe for FakeClient {
    async fn probe(&self) -> Result<(), BackendError> {
        if self.state.lock().unreachable {
            Err(BackendError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

/// A router wired to a [`FakeClient`] with one admin.
pub struct Harness {
    pub router: ConsoleRouter,
    pub client: Arc<FakeClient>,
    pub store: Arc<dyn SessionStore>,
    pub admin: i64,
}

impl Harness {
    pub fn with_users(users: Vec<Entity>) -> Self {
        let admin = 4242;
        let client = Arc::new(FakeClient::new(users));
        let store = create_session_store();
        let gate = AuthGate::standard([admin], client.clone());
        let router = ConsoleRouter::new(client.clone(), gate, store.clone(), ConsoleConfig::default());
        Self {
            router,
            client,
            store,
            admin,
        }
    }

    pub async fn press(&self, key: SessionKey, token: &str) -> Render {
        let token = CallbackToken::parse(token).unwrap_or_else(|| panic!("invalid token {token}"));
        self.router.handle(key, InboundEvent::ButtonPress(token)).await
    }

    pub async fn session(&self, key: SessionKey) -> Option<Session> {
        self.store.get(&key).await.unwrap()
    }
}
