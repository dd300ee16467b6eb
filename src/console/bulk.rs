//! Bulk operations: verb, then target criterion, then one confirmation gate.
//!
//! Criteria other than an explicit id list are resolved locally from a full
//! listing, so the confirmation can show the exact affected count. The backend
//! always receives explicit ids.

use anyhow::Result;
use chrono::{DateTime, Utc};

use super::event::{CallbackToken, Verb};
use super::navigation::{search_prompt, section_view};
use super::render::{bold, code, escape, grid, italic, Button, Render};
use super::router::{Context, Transition};
use super::state::{ConsoleState, InputPurpose, PendingAction, PendingVerb};
use crate::backend::{BulkOutcome, BulkVerb, ListFilter};
use crate::entity::{truncate_label, Entity, EntityKind, EntityRef, EntityStatus};
use crate::sessions::Session;

/// Entity labels listed on the confirmation before it switches to a count.
const PREVIEW_LIMIT: usize = 10;
const MAX_DAYS: u32 = 3650;
const MAX_DETAIL_CHARS: usize = 200;

/// How bulk targets are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    Ids,
    Status(EntityStatus),
    Expiring,
    All,
}

impl Criterion {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ids" => Some(Criterion::Ids),
            "expiring" => Some(Criterion::Expiring),
            "all" => Some(Criterion::All),
            other => EntityStatus::ALL
                .into_iter()
                .find(|status| status.as_str() == other)
                .map(Criterion::Status),
        }
    }

    pub fn token_id(self) -> &'static str {
        match self {
            Criterion::Ids => "ids",
            Criterion::Expiring => "expiring",
            Criterion::All => "all",
            Criterion::Status(status) => status.as_str(),
        }
    }
}

/// Bulk verbs the backend supports for a kind, with their token ids.
fn verbs_for(kind: EntityKind) -> Vec<(&'static str, &'static str)> {
    let mut verbs = vec![("▶️ Enable", "enable"), ("⏸ Disable", "disable")];
    if kind == EntityKind::User {
        verbs.push(("♻️ Reset traffic", "reset"));
        verbs.push(("📅 Extend expiry", "extend"));
    }
    verbs.push(("🗑 Delete", "delete"));
    verbs
}

fn parse_verb(kind: EntityKind, raw: &str) -> Option<BulkVerb> {
    if !verbs_for(kind).iter().any(|(_, id)| *id == raw) {
        return None;
    }
    match raw {
        "enable" => Some(BulkVerb::Enable),
        "disable" => Some(BulkVerb::Disable),
        "delete" => Some(BulkVerb::Delete),
        "reset" => Some(BulkVerb::ResetTraffic),
        "extend" => Some(BulkVerb::ExtendExpiry { days: 0 }),
        _ => None,
    }
}

/// Split an operator-supplied id list on commas and whitespace, dropping duplicates.
/// Fails with the first id that could not name a single entity path segment.
pub fn parse_id_list(raw: &str) -> Result<Vec<String>, String> {
    let mut ids: Vec<String> = Vec::new();
    for id in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        if id == "." || id == ".." || id.contains(['/', '\\', '?', '#']) {
            return Err(id.to_string());
        }
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

fn parse_days(raw: &str, min: u32) -> Option<u32> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|days| (min..=MAX_DAYS).contains(days))
}

/// Apply a listing criterion locally. `days` is only used by `Expiring`.
pub fn select_targets(entities: &[Entity], criterion: Criterion, days: u32, now: DateTime<Utc>) -> Vec<String> {
    entities
        .iter()
        .filter(|entity| match criterion {
            Criterion::All => true,
            Criterion::Status(status) => entity.status == status,
            Criterion::Expiring => entity.expires_within(now, days),
            Criterion::Ids => false,
        })
        .map(|entity| entity.id.clone())
        .collect()
}

// ── Views ────────────────────────────────────────────────────────

pub fn verb_menu(kind: EntityKind) -> Render {
    let buttons = verbs_for(kind)
        .into_iter()
        .map(|(label, id)| Button::new(label, CallbackToken::entity(Verb::BulkOp, kind, id)))
        .collect();
    Render::new(format!(
        "📦 Bulk actions for {}\nChoose an operation:",
        bold(kind.plural())
    ))
    .rows(grid(buttons, 2))
    .row(vec![Button::cancel()])
}

pub fn criteria_menu(kind: EntityKind, verb: BulkVerb) -> Render {
    let crit = |label: &str, criterion: Criterion| {
        Button::new(
            label,
            CallbackToken::entity(Verb::Criterion, kind, criterion.token_id()),
        )
    };
    let statuses = EntityStatus::ALL
        .into_iter()
        .map(|status| {
            crit(
                &format!("{} {}", status.glyph(), status.as_str()),
                Criterion::Status(status),
            )
        })
        .collect();

    Render::new(format!(
        "📦 {} {}\nWhich {} should be affected?",
        escape(&verb.describe()),
        bold(kind.plural()),
        kind.plural()
    ))
    .row(vec![
        crit("🆔 By ids", Criterion::Ids),
        crit("🌐 All", Criterion::All),
    ])
    .rows(grid(statuses, 2))
    .row(vec![crit("⏳ Expiring soon", Criterion::Expiring)])
    .row(vec![Button::cancel()])
}

pub fn input_prompt(purpose: InputPurpose) -> Render {
    let text = match purpose {
        InputPurpose::BulkIds(kind) => format!(
            "🆔 Send the {} ids, separated by spaces, commas or new lines.",
            kind.as_str()
        ),
        InputPurpose::ExpiringDays(kind) => format!(
            "⏳ Select {} expiring within how many days? {}",
            kind.plural(),
            italic(&format!("0-{MAX_DAYS}"))
        ),
        InputPurpose::ExtendDays(_) => format!(
            "📅 Extend expiry by how many days? {}",
            italic(&format!("1-{MAX_DAYS}"))
        ),
        InputPurpose::Search(kind) => return search_prompt(kind),
    };
    Render::new(text).row(vec![Button::cancel()])
}

pub fn confirm_view(session: &Session, pending: &PendingAction) -> Render {
    let Some(verb) = pending.bulk_verb() else {
        return section_view(pending.kind);
    };
    let kind = pending.kind;
    let count = pending.target_ids.len();

    let mut text = format!(
        "📦 About to {} {} {}.",
        escape(&verb.describe()),
        bold(&count.to_string()),
        kind.plural()
    );
    for id in pending.target_ids.iter().take(PREVIEW_LIMIT) {
        let label = session
            .cached(kind, id)
            .map_or_else(|| code(id), |entity| escape(&entity.display_name(32)));
        text.push_str(&format!("\n• {label}"));
    }
    if count > PREVIEW_LIMIT {
        text.push_str(&format!("\n…and {} more", count - PREVIEW_LIMIT));
    }
    if verb == BulkVerb::Delete {
        text.push_str("\nThis cannot be undone.");
    }
    text.push_str("\nContinue?");

    Render::new(text).row(vec![
        Button::new("✅ Yes", CallbackToken::new(Verb::Yes)),
        Button::new("❌ No", CallbackToken::new(Verb::No)),
    ])
}

/// Render whichever bulk step the session is in.
pub fn select_view(session: &Session, kind: EntityKind) -> Render {
    match session.pending_action.as_ref().and_then(PendingAction::bulk_verb) {
        Some(verb) => criteria_menu(kind, verb),
        None => verb_menu(kind),
    }
}

pub fn report(kind: EntityKind, verb: BulkVerb, outcome: &BulkOutcome) -> String {
    let mut text = match outcome.affected {
        Some(affected) if outcome.is_partial() => format!(
            "⚠️ Partial success: {} {}: {} of {} affected.",
            escape(&verb.describe()),
            kind.plural(),
            affected,
            outcome.requested
        ),
        Some(affected) => format!(
            "✅ Done: {} {}: {} of {} affected.",
            escape(&verb.describe()),
            kind.plural(),
            affected,
            outcome.requested
        ),
        None => format!(
            "✅ Sent: {} {} {}. The panel did not report an affected count.",
            escape(&verb.describe()),
            outcome.requested,
            kind.plural()
        ),
    };
    if let Some(detail) = outcome.detail.as_deref().filter(|d| !d.trim().is_empty()) {
        text.push_str(&format!("\n{}", italic(&truncate_label(detail, MAX_DETAIL_CHARS))));
    }
    text
}

// ── Handlers ─────────────────────────────────────────────────────

pub fn begin(ctx: &mut Context<'_>, kind: EntityKind) -> Result<Transition> {
    if !kind.is_mutable() {
        return Ok(Transition::new(ConsoleState::SectionMenu(kind), section_view(kind)));
    }
    ctx.session.clear_workflow();
    Ok(Transition::new(ConsoleState::BulkSelect(kind), verb_menu(kind)))
}

pub fn choose_verb(ctx: &mut Context<'_>, kind: EntityKind, raw: &str) -> Result<Transition> {
    let Some(verb) = parse_verb(kind, raw) else {
        return Ok(Transition::new(ConsoleState::BulkSelect(kind), verb_menu(kind)));
    };
    ctx.session.clear_workflow();
    ctx.session.pending_action = Some(PendingAction::bulk(verb, kind));

    if matches!(verb, BulkVerb::ExtendExpiry { .. }) {
        let purpose = InputPurpose::ExtendDays(kind);
        return Ok(Transition::new(
            ConsoleState::AwaitTextInput(purpose),
            input_prompt(purpose),
        ));
    }
    Ok(Transition::new(
        ConsoleState::BulkSelect(kind),
        criteria_menu(kind, verb),
    ))
}

pub fn submit_extend_days(ctx: &mut Context<'_>, kind: EntityKind, raw: &str) -> Result<Transition> {
    let purpose = InputPurpose::ExtendDays(kind);
    let Some(days) = parse_days(raw, 1) else {
        return Ok(Transition::new(
            ConsoleState::AwaitTextInput(purpose),
            input_prompt(purpose).with_notice(&format!("⚠️ Enter a whole number between 1 and {MAX_DAYS}.")),
        ));
    };
    let Some(pending) = ctx.session.pending_action.as_mut() else {
        return begin(ctx, kind);
    };
    pending.verb = PendingVerb::Bulk(BulkVerb::ExtendExpiry { days });
    Ok(Transition::new(
        ConsoleState::BulkSelect(kind),
        criteria_menu(kind, BulkVerb::ExtendExpiry { days }),
    ))
}

pub async fn choose_criterion(ctx: &mut Context<'_>, kind: EntityKind, raw: &str) -> Result<Transition> {
    let Some(verb) = ctx.session.pending_action.as_ref().and_then(PendingAction::bulk_verb) else {
        return Ok(Transition::new(ConsoleState::BulkSelect(kind), verb_menu(kind)));
    };
    let Some(criterion) = Criterion::parse(raw) else {
        return Ok(Transition::new(
            ConsoleState::BulkSelect(kind),
            criteria_menu(kind, verb),
        ));
    };

    match criterion {
        Criterion::Ids => {
            let purpose = InputPurpose::BulkIds(kind);
            Ok(Transition::new(
                ConsoleState::AwaitTextInput(purpose),
                input_prompt(purpose),
            ))
        }
        Criterion::Expiring => {
            let purpose = InputPurpose::ExpiringDays(kind);
            Ok(Transition::new(
                ConsoleState::AwaitTextInput(purpose),
                input_prompt(purpose),
            ))
        }
        Criterion::All | Criterion::Status(_) => resolve_and_stage(ctx, kind, criterion, 0).await,
    }
}

pub fn submit_ids(ctx: &mut Context<'_>, kind: EntityKind, raw: &str) -> Result<Transition> {
    match parse_id_list(raw) {
        Ok(ids) => stage(ctx, kind, ids),
        Err(bad) => {
            let purpose = InputPurpose::BulkIds(kind);
            Ok(Transition::new(
                ConsoleState::AwaitTextInput(purpose),
                input_prompt(purpose).with_notice(&format!("⚠️ Not a valid id: {}", code(&bad))),
            ))
        }
    }
}

pub async fn submit_expiring_days(ctx: &mut Context<'_>, kind: EntityKind, raw: &str) -> Result<Transition> {
    let purpose = InputPurpose::ExpiringDays(kind);
    let Some(days) = parse_days(raw, 0) else {
        return Ok(Transition::new(
            ConsoleState::AwaitTextInput(purpose),
            input_prompt(purpose).with_notice(&format!("⚠️ Enter a whole number between 0 and {MAX_DAYS}.")),
        ));
    };
    resolve_and_stage(ctx, kind, Criterion::Expiring, days).await
}

/// List everything of `kind`, filter locally, then stage the matching ids.
async fn resolve_and_stage(ctx: &mut Context<'_>, kind: EntityKind, criterion: Criterion, days: u32) -> Result<Transition> {
    let entities = ctx.client.list(kind, &ListFilter::default()).await?;
    let ids = select_targets(&entities, criterion, days, ctx.now);
    tracing::debug!(
        kind = %kind,
        criterion = criterion.token_id(),
        listed = entities.len(),
        selected = ids.len(),
        "bulk criterion resolved"
    );
    for entity in entities.into_iter().filter(|entity| ids.contains(&entity.id)) {
        ctx.session.cache(entity);
    }
    stage(ctx, kind, ids)
}

/// Move to the confirmation gate. An empty selection never reaches it.
fn stage(ctx: &mut Context<'_>, kind: EntityKind, ids: Vec<String>) -> Result<Transition> {
    let Some(pending) = ctx.session.pending_action.as_mut() else {
        return begin(ctx, kind);
    };
    let Some(verb) = pending.bulk_verb() else {
        return begin(ctx, kind);
    };

    if ids.is_empty() {
        pending.target_ids.clear();
        return Ok(Transition::new(
            ConsoleState::BulkSelect(kind),
            criteria_menu(kind, verb).with_notice(&format!("No {} matched. Nothing to do.", kind.plural())),
        ));
    }

    pending.target_ids = ids;
    let pending = pending.clone();
    Ok(Transition::new(
        ConsoleState::BulkConfirm(kind),
        confirm_view(ctx.session, &pending),
    ))
}

/// One batched call with the staged ids, then a partial-success report.
pub async fn confirm(ctx: &mut Context<'_>, kind: EntityKind) -> Result<Transition> {
    let staged = ctx
        .session
        .pending_action
        .as_ref()
        .filter(|pending| pending.kind == kind && !pending.target_ids.is_empty())
        .and_then(|pending| Some((pending.bulk_verb()?, pending.target_ids.clone())));
    let Some((verb, ids)) = staged else {
        ctx.session.clear_workflow();
        return Ok(Transition::new(
            ConsoleState::SectionMenu(kind),
            section_view(kind).with_notice("Nothing to confirm."),
        ));
    };

    let outcome = ctx.client.bulk(kind, verb, &ids).await?;
    tracing::info!(
        user_id = ctx.session.key.user_id,
        kind = %kind,
        verb = verb.as_str(),
        requested = outcome.requested,
        affected = ?outcome.affected,
        "bulk action applied"
    );

    ctx.session.clear_workflow();
    // Snapshots of touched entities are stale now.
    for id in &ids {
        ctx.session.entity_cache.remove(&EntityRef::new(kind, id.clone()));
    }
    if ctx.session.has_listing(kind) {
        ctx.session.listing = None;
    }

    Ok(Transition::new(
        ConsoleState::SectionMenu(kind),
        section_view(kind).with_notice(&report(kind, verb, &outcome)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::testing::{user, user_expiring, Harness};
    use crate::console::InboundEvent;
    use crate::sessions::SessionKey;
    use chrono::Duration;

    #[test]
    fn id_list_is_split_and_deduplicated() {
        assert_eq!(
            parse_id_list("a, b\nc  a,,b").unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_id_list(" ,\n").unwrap().is_empty());
    }

    #[test]
    fn id_list_rejects_path_like_ids() {
        assert_eq!(parse_id_list("n1, x/../../users/U1").unwrap_err(), "x/../../users/U1");
        assert_eq!(parse_id_list("..").unwrap_err(), "..");
        assert_eq!(parse_id_list("n1 n2?all=1").unwrap_err(), "n2?all=1");
        assert_eq!(parse_id_list("a.b c-d").unwrap(), vec!["a.b".to_string(), "c-d".to_string()]);
    }

    #[test]
    fn criterion_tokens() {
        for criterion in [
            Criterion::Ids,
            Criterion::All,
            Criterion::Expiring,
            Criterion::Status(EntityStatus::Limited),
        ] {
            assert_eq!(Criterion::parse(criterion.token_id()), Some(criterion));
        }
        assert_eq!(Criterion::parse("bogus"), None);
    }

    #[test]
    fn extend_and_reset_are_user_only() {
        assert!(parse_verb(EntityKind::User, "extend").is_some());
        assert!(parse_verb(EntityKind::Host, "extend").is_none());
        assert!(parse_verb(EntityKind::Node, "reset").is_none());
        assert_eq!(parse_verb(EntityKind::Node, "disable"), Some(BulkVerb::Disable));
    }

    #[test]
    fn report_distinguishes_partial_and_unknown_counts() {
        let partial = BulkOutcome {
            requested: 3,
            affected: Some(2),
            detail: Some("1 <locked>".into()),
        };
        let text = report(EntityKind::User, BulkVerb::Disable, &partial);
        assert!(text.contains("Partial success"));
        assert!(text.contains("2 of 3"));
        assert!(text.contains("&lt;locked&gt;"));

        let unknown = BulkOutcome {
            requested: 4,
            affected: None,
            detail: None,
        };
        assert!(report(EntityKind::Host, BulkVerb::Enable, &unknown).contains("did not report"));

        let noisy = BulkOutcome {
            requested: 2,
            affected: Some(1),
            detail: Some("&".repeat(5_000)),
        };
        let text = report(EntityKind::User, BulkVerb::Delete, &noisy);
        assert!(text.contains("…</i>"));
        assert_eq!(text.matches("&amp;").count(), MAX_DETAIL_CHARS - 1);
    }

    #[tokio::test]
    async fn expiring_criterion_stages_exactly_the_matching_ids() {
        let now = Utc::now();
        let mut users: Vec<Entity> = (1..=10)
            .map(|i| user_expiring(&format!("u{i}"), now + Duration::days(40 + i)))
            .collect();
        users[1] = user_expiring("u2", now + Duration::days(1));
        users[4] = user_expiring("u5", now + Duration::days(3));
        users[7] = user_expiring("u8", now + Duration::hours(100));
        let harness = Harness::with_users(users);
        let key = SessionKey::new(harness.admin, 1);

        harness.press(key, "bulk_user").await;
        harness.press(key, "bulkop_user_disable").await;
        harness.press(key, "crit_user_expiring").await;
        let render = harness
            .router
            .handle(key, InboundEvent::TextMessage("5".into()))
            .await;

        assert!(render.text.contains("<b>3</b>"));
        assert_eq!(
            harness.session(key).await.unwrap().state,
            ConsoleState::BulkConfirm(EntityKind::User)
        );
        assert_eq!(harness.client.count("bulk"), 0);

        let render = harness.press(key, "yes").await;
        assert_eq!(harness.client.count("bulk"), 1);
        assert_eq!(
            harness.client.last_bulk(),
            Some((BulkVerb::Disable, vec!["u2".to_string(), "u5".to_string(), "u8".to_string()]))
        );
        assert!(render.text.contains("3 of 3"));
        assert_eq!(
            harness.session(key).await.unwrap().state,
            ConsoleState::SectionMenu(EntityKind::User)
        );
    }

    #[tokio::test]
    async fn empty_selection_never_reaches_confirmation() {
        let harness = Harness::with_users(vec![user("u1", "alice")]);
        let key = SessionKey::new(harness.admin, 1);

        harness.press(key, "bulk_user").await;
        harness.press(key, "bulkop_user_enable").await;
        let render = harness.press(key, "crit_user_expired").await;

        assert!(render.text.contains("Nothing to do"));
        assert_eq!(
            harness.session(key).await.unwrap().state,
            ConsoleState::BulkSelect(EntityKind::User)
        );
        harness.press(key, "yes").await;
        assert_eq!(harness.client.count("bulk"), 0);
    }

    #[tokio::test]
    async fn extend_asks_for_days_then_sends_them() {
        let harness = Harness::with_users(vec![user("u1", "alice"), user("u2", "bob")]);
        let key = SessionKey::new(harness.admin, 1);

        harness.press(key, "bulk_user").await;
        harness.press(key, "bulkop_user_extend").await;
        let render = harness.router.handle(key, InboundEvent::TextMessage("0".into())).await;
        assert!(render.text.contains("between 1"));

        harness.router.handle(key, InboundEvent::TextMessage("30".into())).await;
        harness.press(key, "crit_user_ids").await;
        harness
            .router
            .handle(key, InboundEvent::TextMessage("u2, u1 u2".into()))
            .await;
        harness.press(key, "yes").await;

        assert_eq!(
            harness.client.last_bulk(),
            Some((
                BulkVerb::ExtendExpiry { days: 30 },
                vec!["u2".to_string(), "u1".to_string()]
            ))
        );
    }

    #[tokio::test]
    async fn path_like_ids_are_reprompted_without_staging() {
        let harness = Harness::with_users(vec![user("u1", "alice")]);
        let key = SessionKey::new(harness.admin, 1);

        harness.press(key, "bulk_user").await;
        harness.press(key, "bulkop_user_delete").await;
        harness.press(key, "crit_user_ids").await;
        let render = harness
            .router
            .handle(key, InboundEvent::TextMessage("u1 x/../../nodes/n1".into()))
            .await;

        assert!(render.text.contains("Not a valid id"));
        assert_eq!(
            harness.session(key).await.unwrap().state,
            ConsoleState::AwaitTextInput(InputPurpose::BulkIds(EntityKind::User))
        );
        assert_eq!(harness.client.count("bulk"), 0);
    }

    #[tokio::test]
    async fn declining_discards_the_selection() {
        let harness = Harness::with_users(vec![user("u1", "alice")]);
        let key = SessionKey::new(harness.admin, 1);

        harness.press(key, "bulk_user").await;
        harness.press(key, "bulkop_user_delete").await;
        harness.press(key, "crit_user_all").await;
        harness.press(key, "no").await;

        let session = harness.session(key).await.unwrap();
        assert_eq!(session.state, ConsoleState::SectionMenu(EntityKind::User));
        assert!(session.pending_action.is_none());
        assert_eq!(harness.client.count("bulk"), 0);
    }
}
