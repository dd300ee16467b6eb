//! Confirm-before-mutate workflow for single-entity actions.
//!
//! `request` stashes the intent in `pending_action` and shows Yes/No. Only an
//! affirmative answer reaches the backend, and it issues exactly one call.

use anyhow::Result;

use super::event::{CallbackToken, Verb};
use super::navigation::{entity_state_view, list_view, root_view, section_view};
use super::render::{bold, Button, Render};
use super::router::{Context, Transition};
use super::state::{ConsoleState, PendingAction, PendingVerb};
use crate::backend::EntityAction;
use crate::entity::{Entity, EntityKind};
use crate::sessions::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardedVerb {
    Enable,
    Disable,
    Delete,
    ResetTraffic,
    Restart,
    RevokeSubscription,
}

impl GuardedVerb {
    pub const ALL: [GuardedVerb; 6] = [
        GuardedVerb::Enable,
        GuardedVerb::Disable,
        GuardedVerb::ResetTraffic,
        GuardedVerb::Restart,
        GuardedVerb::RevokeSubscription,
        GuardedVerb::Delete,
    ];

    pub fn from_verb(verb: Verb) -> Option<Self> {
        match verb {
            Verb::Enable => Some(GuardedVerb::Enable),
            Verb::Disable => Some(GuardedVerb::Disable),
            Verb::Delete => Some(GuardedVerb::Delete),
            Verb::Reset => Some(GuardedVerb::ResetTraffic),
            Verb::Restart => Some(GuardedVerb::Restart),
            Verb::Revoke => Some(GuardedVerb::RevokeSubscription),
            _ => None,
        }
    }

    pub const fn verb(self) -> Verb {
        match self {
            GuardedVerb::Enable => Verb::Enable,
            GuardedVerb::Disable => Verb::Disable,
            GuardedVerb::Delete => Verb::Delete,
            GuardedVerb::ResetTraffic => Verb::Reset,
            GuardedVerb::Restart => Verb::Restart,
            GuardedVerb::RevokeSubscription => Verb::Revoke,
        }
    }

    pub const fn supported_by(self, kind: EntityKind) -> bool {
        match self {
            GuardedVerb::Enable | GuardedVerb::Disable | GuardedVerb::Delete => kind.is_mutable(),
            GuardedVerb::ResetTraffic | GuardedVerb::RevokeSubscription => {
                matches!(kind, EntityKind::User)
            }
            GuardedVerb::Restart => matches!(kind, EntityKind::Node),
        }
    }

    /// Actions shown on an entity view. Enable/disable follow the current status.
    pub fn offered_for(entity: &Entity) -> Vec<GuardedVerb> {
        GuardedVerb::ALL
            .into_iter()
            .filter(|verb| verb.supported_by(entity.kind))
            .filter(|verb| match verb {
                GuardedVerb::Enable => !entity.status.is_enabled(),
                GuardedVerb::Disable => entity.status.is_enabled(),
                _ => true,
            })
            .collect()
    }

    pub const fn button_label(self) -> &'static str {
        match self {
            GuardedVerb::Enable => "▶️ Enable",
            GuardedVerb::Disable => "⏸ Disable",
            GuardedVerb::Delete => "🗑 Delete",
            GuardedVerb::ResetTraffic => "♻️ Reset traffic",
            GuardedVerb::Restart => "🔁 Restart",
            GuardedVerb::RevokeSubscription => "🔑 Revoke subscription",
        }
    }

    const fn question(self) -> &'static str {
        match self {
            GuardedVerb::Enable => "Enable",
            GuardedVerb::Disable => "Disable",
            GuardedVerb::Delete => "Permanently delete",
            GuardedVerb::ResetTraffic => "Reset traffic usage of",
            GuardedVerb::Restart => "Restart",
            GuardedVerb::RevokeSubscription => "Revoke the subscription link of",
        }
    }

    const fn done(self) -> &'static str {
        match self {
            GuardedVerb::Enable => "enabled",
            GuardedVerb::Disable => "disabled",
            GuardedVerb::Delete => "deleted",
            GuardedVerb::ResetTraffic => "traffic reset",
            GuardedVerb::Restart => "restart requested",
            GuardedVerb::RevokeSubscription => "subscription revoked",
        }
    }
}

pub fn confirm_view(verb: GuardedVerb, kind: EntityKind, label: &str) -> Render {
    let mut text = format!("{} {} {}?", verb.question(), kind.as_str(), bold(label));
    if verb == GuardedVerb::Delete {
        text.push_str("\nThis cannot be undone.");
    }
    Render::new(text).row(vec![
        Button::new("✅ Yes", CallbackToken::new(Verb::Yes)),
        Button::new("❌ No", CallbackToken::new(Verb::No)),
    ])
}

/// Re-render a pending confirmation from the session alone.
pub fn pending_view(session: &Session, verb: GuardedVerb) -> Render {
    match guarded_target(session, verb) {
        Some((kind, id)) => {
            let label = session
                .cached(kind, &id)
                .map_or_else(|| id.clone(), |entity| entity.label.clone());
            confirm_view(verb, kind, &label)
        }
        None => root_view(),
    }
}

fn guarded_target(session: &Session, verb: GuardedVerb) -> Option<(EntityKind, String)> {
    let pending = session.pending_action.as_ref()?;
    if pending.verb != PendingVerb::Guarded(verb) {
        return None;
    }
    Some((pending.kind, pending.single_target()?.to_string()))
}

pub async fn request(ctx: &mut Context<'_>, verb: GuardedVerb, kind: EntityKind, id: &str) -> Result<Transition> {
    let view = ConsoleState::EntityView {
        kind,
        id: id.to_string(),
    };
    if !verb.supported_by(kind) {
        tracing::debug!(kind = %kind, verb = ?verb, "action not supported for kind");
        return Ok(Transition::new(view, entity_state_view(ctx.session, kind, id)));
    }

    let label = match ctx.session.cached(kind, id) {
        Some(entity) => entity.label.clone(),
        None => {
            let entity = ctx.client.get(kind, id).await?;
            let label = entity.label.clone();
            ctx.session.cache(entity);
            label
        }
    };

    ctx.session.clear_workflow();
    ctx.session.pending_action = Some(PendingAction::guarded(verb, kind, id));
    Ok(Transition::new(
        ConsoleState::ConfirmAction(verb),
        confirm_view(verb, kind, &label),
    ))
}

/// Affirmative answer: exactly one backend call.
pub async fn confirm(ctx: &mut Context<'_>, verb: GuardedVerb) -> Result<Transition> {
    let Some((kind, id)) = guarded_target(ctx.session, verb) else {
        ctx.session.clear_workflow();
        return Ok(Transition::new(
            ConsoleState::RootMenu,
            root_view().with_notice("Nothing to confirm."),
        ));
    };

    let refreshed = match verb {
        GuardedVerb::Enable | GuardedVerb::Disable => Some(
            ctx.client
                .set_enabled(kind, &id, verb == GuardedVerb::Enable)
                .await?,
        ),
        GuardedVerb::Delete => {
            ctx.client.delete(kind, &id).await?;
            None
        }
        GuardedVerb::ResetTraffic => ctx.client.invoke(kind, &id, EntityAction::ResetTraffic).await?,
        GuardedVerb::Restart => ctx.client.invoke(kind, &id, EntityAction::Restart).await?,
        GuardedVerb::RevokeSubscription => {
            ctx.client
                .invoke(kind, &id, EntityAction::RevokeSubscription)
                .await?
        }
    };

    let label = ctx
        .session
        .cached(kind, &id)
        .map_or_else(|| id.clone(), |entity| entity.label.clone());
    let notice = format!("✅ {} {}: {}.", kind.icon(), bold(&label), verb.done());
    tracing::info!(
        user_id = ctx.session.key.user_id,
        kind = %kind,
        id = %id,
        action = ?verb,
        "guarded action applied"
    );
    ctx.session.clear_workflow();

    if verb == GuardedVerb::Delete {
        ctx.session.evict(kind, &id);
        if ctx.session.has_listing(kind) {
            return Ok(Transition::new(
                ConsoleState::ListSelect(kind),
                list_view(ctx.session, kind, ctx.settings).with_notice(&notice),
            ));
        }
        return Ok(Transition::new(
            ConsoleState::SectionMenu(kind),
            section_view(kind).with_notice(&notice),
        ));
    }

    if let Some(entity) = refreshed {
        ctx.session.cache(entity);
    }
    Ok(Transition::new(
        ConsoleState::EntityView {
            kind,
            id: id.clone(),
        },
        entity_state_view(ctx.session, kind, &id).with_notice(&notice),
    ))
}

/// Negative answer: discard the intent, no backend call.
pub fn decline(ctx: &mut Context<'_>, verb: GuardedVerb) -> Result<Transition> {
    let target = guarded_target(ctx.session, verb);
    ctx.session.clear_workflow();
    Ok(match target {
        Some((kind, id)) => Transition::new(
            ConsoleState::EntityView {
                kind,
                id: id.clone(),
            },
            entity_state_view(ctx.session, kind, &id).with_notice("Cancelled. Nothing was changed."),
        ),
        None => Transition::new(ConsoleState::RootMenu, root_view()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::{user, Harness};
    use crate::entity::EntityStatus;
    use crate::sessions::SessionKey;

    async fn open_alice(harness: &Harness, key: SessionKey) {
        harness.press(key, "list_user").await;
        harness.press(key, "select_user_u1").await;
    }

    #[test]
    fn offered_actions_follow_kind_and_status() {
        let active = user("u1", "alice");
        let offered = GuardedVerb::offered_for(&active);
        assert!(offered.contains(&GuardedVerb::Disable));
        assert!(!offered.contains(&GuardedVerb::Enable));
        assert!(!offered.contains(&GuardedVerb::Restart));

        let mut disabled = active.clone();
        disabled.status = EntityStatus::Disabled;
        assert!(GuardedVerb::offered_for(&disabled).contains(&GuardedVerb::Enable));
        assert!(!GuardedVerb::Delete.supported_by(EntityKind::Inbound));
        assert!(GuardedVerb::Restart.supported_by(EntityKind::Node));
    }

    #[tokio::test]
    async fn yes_issues_exactly_one_call() {
        let harness = Harness::with_users(vec![user("u1", "alice")]);
        let key = SessionKey::new(harness.admin, 1);
        open_alice(&harness, key).await;

        let render = harness.press(key, "disable_user_u1").await;
        assert!(render.has_verb(Verb::Yes));
        assert_eq!(harness.client.mutations(), 0);
        assert_eq!(
            harness.session(key).await.unwrap().state,
            ConsoleState::ConfirmAction(GuardedVerb::Disable)
        );

        let render = harness.press(key, "yes").await;
        assert_eq!(harness.client.mutations(), 1);
        assert_eq!(harness.client.count("set_enabled"), 1);
        assert!(render.text.contains("disabled"));

        let session = harness.session(key).await.unwrap();
        assert!(session.pending_action.is_none());
        assert_eq!(
            session.state,
            ConsoleState::EntityView {
                kind: EntityKind::User,
                id: "u1".into()
            }
        );
        // A second "yes" has nothing to confirm.
        harness.press(key, "yes").await;
        assert_eq!(harness.client.mutations(), 1);
    }

    #[tokio::test]
    async fn no_and_navigation_away_issue_no_call() {
        let harness = Harness::with_users(vec![user("u1", "alice")]);
        let key = SessionKey::new(harness.admin, 1);
        open_alice(&harness, key).await;

        harness.press(key, "delete_user_u1").await;
        let render = harness.press(key, "no").await;
        assert!(render.text.contains("Nothing was changed"));
        assert!(harness.session(key).await.unwrap().pending_action.is_none());

        harness.press(key, "delete_user_u1").await;
        harness.press(key, "section_user").await;
        assert!(harness.session(key).await.unwrap().pending_action.is_none());

        // Stale "yes" after navigating away falls through without a call.
        harness.press(key, "yes").await;
        assert_eq!(harness.client.mutations(), 0);
    }

    #[tokio::test]
    async fn delete_returns_to_the_list_without_the_entity() {
        let harness = Harness::with_users(vec![user("u1", "alice"), user("u2", "bob")]);
        let key = SessionKey::new(harness.admin, 1);
        open_alice(&harness, key).await;

        harness.press(key, "delete_user_u1").await;
        let render = harness.press(key, "yes").await;

        assert_eq!(harness.client.count("delete"), 1);
        assert!(render.text.contains("deleted"));
        assert!(!render.tokens().any(|t| t.id.as_deref() == Some("u1")));
        assert_eq!(
            harness.session(key).await.unwrap().state,
            ConsoleState::ListSelect(EntityKind::User)
        );
    }

    #[tokio::test]
    async fn failed_confirmation_keeps_the_intent_for_retry() {
        let harness = Harness::with_users(vec![user("u1", "alice")]);
        let key = SessionKey::new(harness.admin, 1);
        open_alice(&harness, key).await;
        harness.press(key, "reset_user_u1").await;

        harness.client.fail_next_with_timeout();
        let render = harness.press(key, "yes").await;
        assert!(render.text.contains("did not respond"));
        let session = harness.session(key).await.unwrap();
        assert_eq!(session.state, ConsoleState::ConfirmAction(GuardedVerb::ResetTraffic));
        assert_eq!(session.pending_action.unwrap().single_target(), Some("u1"));

        harness.press(key, "yes").await;
        assert_eq!(harness.client.count("invoke"), 2);
    }
}
