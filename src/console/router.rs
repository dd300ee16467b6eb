//! Table-driven console router.
//!
//! Every inbound event passes the auth gate first, then is matched against
//! [`RULES`] by (current state, event). The first matching rule names the
//! handler; unmatched pairs re-render the current view with a notice. Handlers
//! work on a copy of the session, which is committed only when they succeed.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::bulk;
use super::error::Failure;
use super::event::{CallbackToken, InboundEvent, Verb};
use super::form;
use super::guarded::{self, GuardedVerb};
use super::navigation;
use super::render::{Button, Render};
use super::state::{ConsoleState, InputPurpose, StateTag};
use crate::backend::ResourceClient;
use crate::config::ConsoleConfig;
use crate::entity::{find_field, EntityKind};
use crate::security::{Admission, AuthGate, DenyReason};
use crate::sessions::{Session, SessionKey, SessionStore};

/// Everything a handler may touch while processing one event.
pub struct Context<'a> {
    pub client: &'a dyn ResourceClient,
    pub settings: &'a ConsoleConfig,
    pub session: &'a mut Session,
    pub now: DateTime<Utc>,
}

/// A handler's result: the state to commit and the view to send.
#[derive(Debug, Clone)]
pub struct Transition {
    pub next: ConsoleState,
    pub render: Render,
}

impl Transition {
    pub fn new(next: ConsoleState, render: Render) -> Self {
        Self { next, render }
    }
}

// ── Transition table ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum StatePattern {
    Any,
    Navigation,
    Is(StateTag),
}

impl StatePattern {
    fn matches(self, state: &ConsoleState) -> bool {
        match self {
            StatePattern::Any => true,
            StatePattern::Navigation => state.is_navigation(),
            StatePattern::Is(tag) => state.tag() == tag,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EventPattern {
    Command(&'static str),
    Button(Verb),
    Text,
}

impl EventPattern {
    fn matches(self, event: &InboundEvent) -> bool {
        match (self, event) {
            (EventPattern::Command(name), InboundEvent::Command(got)) => got.as_str() == name,
            (EventPattern::Button(verb), InboundEvent::ButtonPress(token)) => token.verb == verb,
            (EventPattern::Text, InboundEvent::TextMessage(_)) => true,
            _ => false,
        }
    }
}

/// Handler names the table resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerId {
    Home,
    Cancel,
    OpenSection,
    OpenList,
    Refresh,
    TurnPage,
    OpenEntity,
    PromptSearch,
    TextInput,
    BeginCreate,
    CreateValue,
    CreateSkip,
    BeginEdit,
    PickEditField,
    EditValue,
    RequestGuarded,
    ConfirmGuarded,
    DeclineGuarded,
    BeginBulk,
    ChooseBulkVerb,
    ChooseCriterion,
    ConfirmBulk,
    Rerender,
    Unrecognized,
}

impl HandlerId {
    pub const fn as_str(self) -> &'static str {
        match self {
            HandlerId::Home => "home",
            HandlerId::Cancel => "cancel",
            HandlerId::OpenSection => "open_section",
            HandlerId::OpenList => "open_list",
            HandlerId::Refresh => "refresh",
            HandlerId::TurnPage => "turn_page",
            HandlerId::OpenEntity => "open_entity",
            HandlerId::PromptSearch => "prompt_search",
            HandlerId::TextInput => "text_input",
            HandlerId::BeginCreate => "begin_create",
            HandlerId::CreateValue => "create_value",
            HandlerId::CreateSkip => "create_skip",
            HandlerId::BeginEdit => "begin_edit",
            HandlerId::PickEditField => "pick_edit_field",
            HandlerId::EditValue => "edit_value",
            HandlerId::RequestGuarded => "request_guarded",
            HandlerId::ConfirmGuarded => "confirm_guarded",
            HandlerId::DeclineGuarded => "decline_guarded",
            HandlerId::BeginBulk => "begin_bulk",
            HandlerId::ChooseBulkVerb => "choose_bulk_verb",
            HandlerId::ChooseCriterion => "choose_criterion",
            HandlerId::ConfirmBulk => "confirm_bulk",
            HandlerId::Rerender => "rerender",
            HandlerId::Unrecognized => "unrecognized",
        }
    }
}

struct Rule {
    state: StatePattern,
    event: EventPattern,
    handler: HandlerId,
}

const fn rule(state: StatePattern, event: EventPattern, handler: HandlerId) -> Rule {
    Rule { state, event, handler }
}

use self::EventPattern::{Button as Press, Command as Cmd, Text};
use self::StatePattern::{Any, Is, Navigation};

/// Ordered rules; the first match wins.
const RULES: &[Rule] = &[
    // Escape hatches, valid everywhere.
    rule(Any, Cmd("start"), HandlerId::Home),
    rule(Any, Cmd("menu"), HandlerId::Home),
    rule(Any, Cmd("cancel"), HandlerId::Cancel),
    rule(Any, Cmd("users"), HandlerId::OpenSection),
    rule(Any, Cmd("nodes"), HandlerId::OpenSection),
    rule(Any, Cmd("hosts"), HandlerId::OpenSection),
    rule(Any, Cmd("inbounds"), HandlerId::OpenSection),
    rule(Any, Press(Verb::Menu), HandlerId::Home),
    rule(Any, Press(Verb::Cancel), HandlerId::Cancel),
    rule(Any, Press(Verb::Section), HandlerId::OpenSection),
    rule(Any, Press(Verb::List), HandlerId::OpenList),
    rule(Any, Press(Verb::Noop), HandlerId::Rerender),
    // Browsing.
    rule(Navigation, Press(Verb::Refresh), HandlerId::Refresh),
    rule(Navigation, Press(Verb::Page), HandlerId::TurnPage),
    rule(Navigation, Press(Verb::Select), HandlerId::OpenEntity),
    rule(Navigation, Press(Verb::Search), HandlerId::PromptSearch),
    rule(Is(StateTag::AwaitTextInput), Text, HandlerId::TextInput),
    // Create.
    rule(Navigation, Press(Verb::Create), HandlerId::BeginCreate),
    rule(Is(StateTag::CreateField), Text, HandlerId::CreateValue),
    rule(Is(StateTag::CreateField), Press(Verb::Choice), HandlerId::CreateValue),
    rule(Is(StateTag::CreateField), Press(Verb::Skip), HandlerId::CreateSkip),
    // Edit.
    rule(Is(StateTag::EntityView), Press(Verb::Edit), HandlerId::BeginEdit),
    rule(Is(StateTag::EditFieldSelect), Press(Verb::Field), HandlerId::PickEditField),
    rule(Is(StateTag::EditFieldValue), Text, HandlerId::EditValue),
    rule(Is(StateTag::EditFieldValue), Press(Verb::Choice), HandlerId::EditValue),
    // Guarded single-entity actions.
    rule(Is(StateTag::EntityView), Press(Verb::Enable), HandlerId::RequestGuarded),
    rule(Is(StateTag::EntityView), Press(Verb::Disable), HandlerId::RequestGuarded),
    rule(Is(StateTag::EntityView), Press(Verb::Delete), HandlerId::RequestGuarded),
    rule(Is(StateTag::EntityView), Press(Verb::Reset), HandlerId::RequestGuarded),
    rule(Is(StateTag::EntityView), Press(Verb::Restart), HandlerId::RequestGuarded),
    rule(Is(StateTag::EntityView), Press(Verb::Revoke), HandlerId::RequestGuarded),
    rule(Is(StateTag::ConfirmAction), Press(Verb::Yes), HandlerId::ConfirmGuarded),
    rule(Is(StateTag::ConfirmAction), Press(Verb::No), HandlerId::DeclineGuarded),
    // Bulk.
    rule(Navigation, Press(Verb::Bulk), HandlerId::BeginBulk),
    rule(Is(StateTag::BulkSelect), Press(Verb::BulkOp), HandlerId::ChooseBulkVerb),
    rule(Is(StateTag::BulkSelect), Press(Verb::Criterion), HandlerId::ChooseCriterion),
    rule(Is(StateTag::BulkConfirm), Press(Verb::Yes), HandlerId::ConfirmBulk),
    rule(Is(StateTag::BulkConfirm), Press(Verb::No), HandlerId::Cancel),
];

/// Resolve the handler for an event in a state.
pub fn route(state: &ConsoleState, event: &InboundEvent) -> HandlerId {
    RULES
        .iter()
        .find(|rule| rule.state.matches(state) && rule.event.matches(event))
        .map_or(HandlerId::Unrecognized, |rule| rule.handler)
}

// ── Pure rendering ───────────────────────────────────────────────

/// Render a state from the session alone. Never calls the backend.
pub fn render_state(session: &Session, state: &ConsoleState, settings: &ConsoleConfig) -> Render {
    match state {
        ConsoleState::RootMenu => navigation::root_view(),
        ConsoleState::SectionMenu(kind) => navigation::section_view(*kind),
        ConsoleState::ListSelect(kind) if session.has_listing(*kind) => {
            navigation::list_view(session, *kind, settings)
        }
        ConsoleState::ListSelect(kind) => navigation::section_view(*kind),
        ConsoleState::EntityView { kind, id } => navigation::entity_state_view(session, *kind, id),
        ConsoleState::AwaitTextInput(purpose) => bulk::input_prompt(*purpose),
        ConsoleState::ConfirmAction(verb) => guarded::pending_view(session, *verb),
        ConsoleState::EditFieldSelect { kind, id } => form::edit_menu(*kind, id, session.cached(*kind, id)),
        ConsoleState::EditFieldValue { kind, id, field } => match find_field(*kind, field) {
            Some(spec) => form::edit_prompt(spec, session.cached(*kind, id), None),
            None => form::edit_menu(*kind, id, session.cached(*kind, id)),
        },
        ConsoleState::CreateField { kind, index } => form::create_prompt(*kind, *index, None),
        ConsoleState::BulkSelect(kind) => bulk::select_view(session, *kind),
        ConsoleState::BulkConfirm(kind) => match &session.pending_action {
            Some(pending) => bulk::confirm_view(session, pending),
            None => navigation::section_view(*kind),
        },
    }
}

// ── Handlers owned by the router ─────────────────────────────────

/// Discard the workflow and fall back to the state it started from.
/// Navigation states are left as they are, so cancelling twice is a no-op.
fn cancel(ctx: &mut Context<'_>) -> Result<Transition> {
    let state = ctx.session.state.clone();
    let pending_target = ctx
        .session
        .pending_action
        .as_ref()
        .and_then(|pending| Some((pending.kind, pending.single_target()?.to_string())));
    ctx.session.clear_workflow();

    let next = match state {
        ConsoleState::RootMenu
        | ConsoleState::SectionMenu(_)
        | ConsoleState::ListSelect(_)
        | ConsoleState::EntityView { .. } => state,
        ConsoleState::AwaitTextInput(purpose) => ConsoleState::SectionMenu(purpose.kind()),
        ConsoleState::ConfirmAction(_) => match pending_target {
            Some((kind, id)) => ConsoleState::EntityView { kind, id },
            None => ConsoleState::RootMenu,
        },
        ConsoleState::EditFieldSelect { kind, id } | ConsoleState::EditFieldValue { kind, id, .. } => {
            ConsoleState::EntityView { kind, id }
        }
        ConsoleState::CreateField { kind, .. }
        | ConsoleState::BulkSelect(kind)
        | ConsoleState::BulkConfirm(kind) => ConsoleState::SectionMenu(kind),
    };
    let render = render_state(ctx.session, &next, ctx.settings).with_notice("Cancelled.");
    Ok(Transition::new(next, render))
}

fn stay(ctx: &Context<'_>, notice: Option<&str>) -> Transition {
    let state = ctx.session.state.clone();
    let render = render_state(ctx.session, &state, ctx.settings);
    let render = match notice {
        Some(notice) => render.with_notice(notice),
        None => render,
    };
    Transition::new(state, render)
}

const UNRECOGNIZED: &str = "That action is not available here.";

fn token_of(event: &InboundEvent) -> Option<&CallbackToken> {
    match event {
        InboundEvent::ButtonPress(token) => Some(token),
        _ => None,
    }
}

fn text_of(event: &InboundEvent) -> Option<&str> {
    match event {
        InboundEvent::TextMessage(text) => Some(text.as_str()),
        InboundEvent::ButtonPress(token) => token.id.as_deref(),
        InboundEvent::Command(_) => None,
    }
}

/// The kind an event refers to: the token's own kind, else the state's.
fn kind_of(state: &ConsoleState, event: &InboundEvent) -> Option<EntityKind> {
    match event {
        InboundEvent::Command(name) => EntityKind::parse(name),
        InboundEvent::ButtonPress(token) => token.kind.or_else(|| state.kind()),
        InboundEvent::TextMessage(_) => state.kind(),
    }
}

/// The entity id an event refers to: the token's id, else the state's.
fn entity_id_of(state: &ConsoleState, event: &InboundEvent) -> Option<String> {
    if let Some(id) = token_of(event).and_then(|token| token.id.clone()) {
        return Some(id);
    }
    match state {
        ConsoleState::EntityView { id, .. } => Some(id.clone()),
        _ => None,
    }
}

async fn dispatch(ctx: &mut Context<'_>, handler: HandlerId, event: &InboundEvent) -> Result<Transition> {
    let state = ctx.session.state.clone();
    let kind = kind_of(&state, event);

    match (handler, kind) {
        (HandlerId::Home, _) => navigation::home(ctx),
        (HandlerId::Cancel, _) => cancel(ctx),
        (HandlerId::Rerender, _) => Ok(stay(ctx, None)),
        (HandlerId::OpenSection, Some(kind)) => navigation::open_section(ctx, kind),
        (HandlerId::OpenList, Some(kind)) => navigation::open_list(ctx, kind).await,
        (HandlerId::Refresh, Some(kind)) => match token_of(event).and_then(|token| token.id.as_deref()) {
            Some(id) => navigation::open_entity(ctx, kind, id, true).await,
            None => navigation::refresh_list(ctx, kind).await,
        },
        (HandlerId::TurnPage, Some(kind)) => {
            let page = token_of(event)
                .and_then(|token| token.id.as_deref())
                .and_then(|raw| raw.parse().ok());
            navigation::turn_page(ctx, kind, page).await
        }
        (HandlerId::OpenEntity, Some(kind)) => match token_of(event).and_then(|token| token.id.clone()) {
            Some(id) => navigation::open_entity(ctx, kind, &id, false).await,
            None => Ok(stay(ctx, Some(UNRECOGNIZED))),
        },
        (HandlerId::PromptSearch, Some(kind)) => navigation::prompt_search(ctx, kind),
        (HandlerId::TextInput, _) => {
            let (ConsoleState::AwaitTextInput(purpose), Some(raw)) = (&state, text_of(event)) else {
                return Ok(stay(ctx, Some(UNRECOGNIZED)));
            };
            match *purpose {
                InputPurpose::Search(kind) => navigation::submit_search(ctx, kind, raw).await,
                InputPurpose::BulkIds(kind) => bulk::submit_ids(ctx, kind, raw),
                InputPurpose::ExpiringDays(kind) => bulk::submit_expiring_days(ctx, kind, raw).await,
                InputPurpose::ExtendDays(kind) => bulk::submit_extend_days(ctx, kind, raw),
            }
        }
        (HandlerId::BeginCreate, Some(kind)) => form::begin_create(ctx, kind),
        (HandlerId::CreateValue, _) => match (&state, text_of(event)) {
            (ConsoleState::CreateField { kind, index }, Some(raw)) => {
                form::submit_create_value(ctx, *kind, *index, raw).await
            }
            _ => Ok(stay(ctx, Some(UNRECOGNIZED))),
        },
        (HandlerId::CreateSkip, _) => match &state {
            ConsoleState::CreateField { kind, index } => form::skip_create_field(ctx, *kind, *index).await,
            _ => Ok(stay(ctx, Some(UNRECOGNIZED))),
        },
        (HandlerId::BeginEdit, Some(kind)) => match entity_id_of(&state, event) {
            Some(id) => form::begin_edit(ctx, kind, &id).await,
            None => Ok(stay(ctx, Some(UNRECOGNIZED))),
        },
        (HandlerId::PickEditField, _) => match (&state, token_of(event).and_then(|token| token.id.as_deref())) {
            (ConsoleState::EditFieldSelect { kind, id }, Some(key)) => form::pick_edit_field(ctx, *kind, id, key),
            _ => Ok(stay(ctx, Some(UNRECOGNIZED))),
        },
        (HandlerId::EditValue, _) => match (&state, text_of(event)) {
            (ConsoleState::EditFieldValue { kind, id, field }, Some(raw)) => {
                form::submit_edit_value(ctx, *kind, id, field, raw).await
            }
            _ => Ok(stay(ctx, Some(UNRECOGNIZED))),
        },
        (HandlerId::RequestGuarded, Some(kind)) => {
            let verb = token_of(event).and_then(|token| GuardedVerb::from_verb(token.verb));
            match (verb, entity_id_of(&state, event)) {
                (Some(verb), Some(id)) => guarded::request(ctx, verb, kind, &id).await,
                _ => Ok(stay(ctx, Some(UNRECOGNIZED))),
            }
        }
        (HandlerId::ConfirmGuarded, _) => match state {
            ConsoleState::ConfirmAction(verb) => guarded::confirm(ctx, verb).await,
            _ => Ok(stay(ctx, Some(UNRECOGNIZED))),
        },
        (HandlerId::DeclineGuarded, _) => match state {
            ConsoleState::ConfirmAction(verb) => guarded::decline(ctx, verb),
            _ => Ok(stay(ctx, Some(UNRECOGNIZED))),
        },
        (HandlerId::BeginBulk, Some(kind)) => bulk::begin(ctx, kind),
        (HandlerId::ChooseBulkVerb, Some(kind)) => match token_of(event).and_then(|token| token.id.clone()) {
            Some(raw) => bulk::choose_verb(ctx, kind, &raw),
            None => Ok(stay(ctx, Some(UNRECOGNIZED))),
        },
        (HandlerId::ChooseCriterion, Some(kind)) => match token_of(event).and_then(|token| token.id.clone()) {
            Some(raw) => bulk::choose_criterion(ctx, kind, &raw).await,
            None => Ok(stay(ctx, Some(UNRECOGNIZED))),
        },
        (HandlerId::ConfirmBulk, Some(kind)) => bulk::confirm(ctx, kind).await,
        _ => Ok(stay(ctx, Some(UNRECOGNIZED))),
    }
}

// ── Router ───────────────────────────────────────────────────────

/// Per-event entry point: gate, load, route, dispatch, commit.
pub struct ConsoleRouter {
    client: Arc<dyn ResourceClient>,
    gate: AuthGate,
    store: Arc<dyn SessionStore>,
    settings: ConsoleConfig,
}

impl ConsoleRouter {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        gate: AuthGate,
        store: Arc<dyn SessionStore>,
        settings: ConsoleConfig,
    ) -> Self {
        Self {
            client,
            gate,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Process one event. Never fails: every outcome is a view for the operator.
    pub async fn handle(&self, key: SessionKey, event: InboundEvent) -> Render {
        if let Admission::Denied(reason) = self.gate.admit(key.user_id).await {
            tracing::warn!(
                user_id = key.user_id,
                chat_id = key.chat_id,
                reason = %reason,
                event = event.kind_name(),
                "event denied"
            );
            let render = Render::new(reason.message());
            return match reason {
                DenyReason::NotAdmin => render,
                DenyReason::BackendUnavailable => render.row(vec![Button::main_menu()]),
            };
        }

        let now = Utc::now();
        let stored = match self.store.get(&key).await {
            Ok(stored) => stored,
            Err(err) => {
                tracing::error!(user_id = key.user_id, chat_id = key.chat_id, "session load failed: {err:#}");
                return Render::new(Failure::Unhandled.message()).row(vec![Button::main_menu()]);
            }
        };
        let mut original = stored.unwrap_or_else(|| Session::new(key));
        original.last_activity = now;

        let handler = route(&original.state, &event);
        tracing::debug!(
            user_id = key.user_id,
            chat_id = key.chat_id,
            state = %original.state,
            event = event.kind_name(),
            handler = handler.as_str(),
            "routing event"
        );

        let mut working = original.clone();
        let result = {
            let mut ctx = Context {
                client: self.client.as_ref(),
                settings: &self.settings,
                session: &mut working,
                now,
            };
            dispatch(&mut ctx, handler, &event).await
        };

        match result {
            Ok(transition) => {
                working.state = transition.next;
                self.commit(working).await;
                transition.render
            }
            Err(err) => self.recover(original, handler, &err).await,
        }
    }

    /// Turn a handler failure into a view. The handler's partial changes are discarded.
    async fn recover(&self, mut session: Session, handler: HandlerId, err: &anyhow::Error) -> Render {
        let failure = Failure::classify(err);
        let key = session.key;
        match &failure {
            Failure::NotFound { kind, id } => {
                tracing::info!(
                    user_id = key.user_id,
                    chat_id = key.chat_id,
                    kind = %kind,
                    id = %id,
                    "entity vanished"
                );
                session.evict(*kind, id);
                session.clear_workflow();
                session.state = if session.has_listing(*kind) {
                    ConsoleState::ListSelect(*kind)
                } else {
                    ConsoleState::SectionMenu(*kind)
                };
            }
            Failure::BackendUnavailable => {
                tracing::warn!(
                    user_id = key.user_id,
                    chat_id = key.chat_id,
                    state = %session.state,
                    handler = handler.as_str(),
                    error = %err,
                    "backend unavailable"
                );
            }
            Failure::Unhandled => {
                tracing::error!(
                    user_id = key.user_id,
                    chat_id = key.chat_id,
                    state = %session.state,
                    handler = handler.as_str(),
                    "handler failed: {err:#}"
                );
            }
        }

        let render = render_state(&session, &session.state, &self.settings).with_notice(failure.message());
        self.commit(session).await;
        render
    }

    async fn commit(&self, session: Session) {
        let key = session.key;
        let result = if session.state == ConsoleState::RootMenu {
            self.store.delete(&key).await
        } else {
            self.store.put(session).await
        };
        if let Err(err) = result {
            tracing::error!(user_id = key.user_id, chat_id = key.chat_id, "session commit failed: {err:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::{user, Harness};
    use crate::sessions::Session;

    fn press(token: &str) -> InboundEvent {
        InboundEvent::ButtonPress(CallbackToken::parse(token).unwrap())
    }

    #[test]
    fn first_matching_rule_wins() {
        let confirm = ConsoleState::ConfirmAction(GuardedVerb::Delete);
        assert_eq!(route(&confirm, &press("yes")), HandlerId::ConfirmGuarded);
        assert_eq!(route(&confirm, &press("cancel")), HandlerId::Cancel);
        assert_eq!(
            route(&ConsoleState::BulkConfirm(EntityKind::User), &press("yes")),
            HandlerId::ConfirmBulk
        );
        assert_eq!(route(&ConsoleState::RootMenu, &press("yes")), HandlerId::Unrecognized);
        assert_eq!(
            route(&confirm, &InboundEvent::Command("start".into())),
            HandlerId::Home
        );
        assert_eq!(
            route(&ConsoleState::RootMenu, &InboundEvent::TextMessage("hi".into())),
            HandlerId::Unrecognized
        );
    }

    #[test]
    fn every_rendered_button_is_routable_from_its_state() {
        let settings = ConsoleConfig::default();
        let mut session = Session::new(SessionKey::new(1, 1));
        session.set_listing(EntityKind::User, vec![user("u1", "alice"), user("u2", "bob")]);

        let states = vec![
            ConsoleState::RootMenu,
            ConsoleState::SectionMenu(EntityKind::User),
            ConsoleState::SectionMenu(EntityKind::Inbound),
            ConsoleState::ListSelect(EntityKind::User),
            ConsoleState::EntityView {
                kind: EntityKind::User,
                id: "u1".into(),
            },
            ConsoleState::AwaitTextInput(InputPurpose::Search(EntityKind::Node)),
            ConsoleState::EditFieldSelect {
                kind: EntityKind::User,
                id: "u1".into(),
            },
            ConsoleState::EditFieldValue {
                kind: EntityKind::User,
                id: "u1".into(),
                field: "trafficLimitStrategy".into(),
            },
            ConsoleState::CreateField {
                kind: EntityKind::User,
                index: 2,
            },
            ConsoleState::BulkSelect(EntityKind::User),
        ];
        for state in states {
            let render = render_state(&session, &state, &settings);
            for token in render.tokens() {
                let event = InboundEvent::ButtonPress(token.clone());
                assert_ne!(
                    route(&state, &event),
                    HandlerId::Unrecognized,
                    "{token} is dead in {state}"
                );
            }
        }
    }

    #[tokio::test]
    async fn non_admin_is_denied_without_a_session() {
        let harness = Harness::with_users(vec![user("u1", "alice")]);
        let key = SessionKey::new(harness.admin + 1, 1);

        let render = harness.press(key, "list_user").await;
        assert!(render.text.contains("not authorized"));
        assert!(harness.session(key).await.is_none());
        assert_eq!(harness.client.count("list"), 0);
    }

    #[tokio::test]
    async fn unreachable_backend_denies_before_state_changes() {
        let harness = Harness::with_users(vec![user("u1", "alice")]);
        let key = SessionKey::new(harness.admin, 1);
        harness.press(key, "section_user").await;

        harness.client.set_reachable(false);
        let render = harness.press(key, "list_user").await;
        assert!(render.text.contains("unavailable"));
        assert_eq!(harness.client.count("list"), 0);
        assert_eq!(
            harness.session(key).await.unwrap().state,
            ConsoleState::SectionMenu(EntityKind::User)
        );
    }

    #[tokio::test]
    async fn start_hard_resets_mid_workflow() {
        let harness = Harness::with_users(Vec::new());
        let key = SessionKey::new(harness.admin, 1);
        harness.press(key, "create_user").await;
        harness
            .router
            .handle(key, InboundEvent::TextMessage("carol".into()))
            .await;

        let render = harness
            .router
            .handle(key, InboundEvent::command("/start").unwrap())
            .await;
        assert!(render.has_verb(Verb::Section));
        assert!(harness.session(key).await.is_none());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let harness = Harness::with_users(Vec::new());
        let key = SessionKey::new(harness.admin, 1);
        harness.press(key, "create_node").await;

        let first = harness.press(key, "cancel").await;
        let after_first = harness.session(key).await.unwrap();
        let second = harness.press(key, "cancel").await;
        let after_second = harness.session(key).await.unwrap();

        assert_eq!(after_first.state, ConsoleState::SectionMenu(EntityKind::Node));
        assert_eq!(after_first.state, after_second.state);
        assert!(after_second.edit_buffer.is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unmatched_events_rerender_the_current_view() {
        let harness = Harness::with_users(vec![user("u1", "alice")]);
        let key = SessionKey::new(harness.admin, 1);
        harness.press(key, "list_user").await;

        let render = harness
            .router
            .handle(key, InboundEvent::TextMessage("hello".into()))
            .await;
        assert!(render.text.contains("not available"));
        assert!(render.text.contains("alice"));
        assert_eq!(
            harness.session(key).await.unwrap().state,
            ConsoleState::ListSelect(EntityKind::User)
        );
    }

    #[tokio::test]
    async fn vanished_entity_returns_to_the_list() {
        let harness = Harness::with_users(vec![user("u1", "alice"), user("u2", "bob")]);
        let key = SessionKey::new(harness.admin, 1);
        harness.press(key, "list_user").await;
        harness.press(key, "select_user_u1").await;

        harness.client.remove(EntityKind::User, "u1");
        let render = harness.press(key, "refresh_user_u1").await;

        assert!(render.text.contains("no longer exists"));
        assert!(!render.tokens().any(|t| t.id.as_deref() == Some("u1")));
        let session = harness.session(key).await.unwrap();
        assert_eq!(session.state, ConsoleState::ListSelect(EntityKind::User));
        assert!(session.cached(EntityKind::User, "u1").is_none());
    }

    #[tokio::test]
    async fn unavailable_backend_keeps_state_for_retry() {
        let harness = Harness::with_users(vec![user("u1", "alice")]);
        let key = SessionKey::new(harness.admin, 1);
        harness.press(key, "section_user").await;

        harness.client.fail_next_with_timeout();
        let render = harness.press(key, "list_user").await;
        assert!(render.text.contains("did not respond"));
        assert!(render.has_verb(Verb::List));
        assert_eq!(
            harness.session(key).await.unwrap().state,
            ConsoleState::SectionMenu(EntityKind::User)
        );

        harness.press(key, "list_user").await;
        assert_eq!(
            harness.session(key).await.unwrap().state,
            ConsoleState::ListSelect(EntityKind::User)
        );
    }

    #[tokio::test]
    async fn legacy_select_token_uses_the_state_kind() {
        let harness = Harness::with_users(vec![user("u_1", "alice")]);
        let key = SessionKey::new(harness.admin, 1);
        harness.press(key, "list_user").await;

        harness.press(key, "select_u_1").await;
        assert_eq!(
            harness.session(key).await.unwrap().state,
            ConsoleState::EntityView {
                kind: EntityKind::User,
                id: "u_1".into()
            }
        );
    }
}
