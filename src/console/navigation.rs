//! Menus, lists, search and entity views.

use anyhow::Result;
use chrono::SecondsFormat;

use super::event::{CallbackToken, Verb};
use super::guarded::GuardedVerb;
use super::pagination::{entity_buttons, paginate};
use super::render::{bold, code, escape, grid, italic, Button, Render};
use super::router::{Context, Transition};
use super::state::{ConsoleState, InputPurpose};
use crate::backend::ListFilter;
use crate::config::ConsoleConfig;
use crate::entity::{fields_for, format_bytes, Entity, EntityKind, FieldType};
use crate::sessions::{SearchContext, Session};

// ── Views ────────────────────────────────────────────────────────

pub fn root_view() -> Render {
    let sections = EntityKind::ALL
        .into_iter()
        .map(|kind| {
            Button::new(
                format!("{} {}", kind.icon(), kind.title()),
                CallbackToken::kind(Verb::Section, kind),
            )
        })
        .collect();
    Render::new(format!("{}\nChoose a section:", bold("Panel console"))).rows(grid(sections, 2))
}

pub fn section_view(kind: EntityKind) -> Render {
    let mut render = Render::new(format!(
        "{} {}\nWhat would you like to do?",
        kind.icon(),
        bold(kind.title())
    ))
    .row(vec![
        Button::new("📋 List", CallbackToken::kind(Verb::List, kind)),
        Button::new("🔎 Search", CallbackToken::kind(Verb::Search, kind)),
    ]);
    if kind.is_mutable() {
        render = render.row(vec![
            Button::new("➕ Create", CallbackToken::kind(Verb::Create, kind)),
            Button::new("📦 Bulk actions", CallbackToken::kind(Verb::Bulk, kind)),
        ]);
    }
    render.row(vec![Button::main_menu()])
}

/// Render the session's current listing from cache. No backend call.
pub fn list_view(session: &Session, kind: EntityKind, settings: &ConsoleConfig) -> Render {
    let entities = session.listed_entities(kind);
    let page = paginate(&entities, session.page, settings.page_size);

    let mut text = format!("{} {}", kind.icon(), bold(kind.title()));
    if let Some(search) = session
        .search_context
        .as_ref()
        .filter(|search| search.kind == kind)
    {
        text.push_str(&format!(" · search {}", code(&search.query)));
    }
    if entities.is_empty() {
        text.push_str(&format!("\nNo {} found.", kind.plural()));
    } else {
        text.push_str(&format!(
            "\n{} total · page {}/{}",
            page.total_count,
            page.page + 1,
            page.total_pages
        ));
    }

    Render::new(text)
        .rows(entity_buttons(&page, kind, settings.label_max_chars))
        .row(vec![
            Button::new("🔄 Refresh", CallbackToken::kind(Verb::Refresh, kind)),
            Button::new("« Back", CallbackToken::kind(Verb::Section, kind)),
        ])
}

/// Human-readable value of a form field on an entity.
pub fn display_value(entity: &Entity, key: &str, field_type: FieldType) -> Option<String> {
    match field_type {
        FieldType::TrafficGb => {
            let bytes = entity.payload.get(key)?.as_u64()?;
            Some(if bytes == 0 {
                "unlimited".to_string()
            } else {
                format_bytes(bytes)
            })
        }
        FieldType::Date => entity
            .field_value(key)
            .map(|raw| raw.chars().take(10).collect()),
        _ => entity.field_value(key),
    }
}

/// Short field label without the input hint in parentheses.
pub fn short_label(label: &str) -> &str {
    label.split(" (").next().unwrap_or(label)
}

pub fn entity_view(entity: &Entity, back_page: Option<usize>) -> Render {
    let kind = entity.kind;
    let mut lines = vec![
        format!("{} {}", kind.icon(), bold(&entity.label)),
        format!("Status: {} {}", entity.status.glyph(), entity.status.as_str()),
    ];
    if kind != EntityKind::Inbound {
        lines.push(format!("Usage: {}", format_bytes(entity.used_bytes)));
    }
    if let Some(expires_at) = entity.expires_at {
        lines.push(format!(
            "Expires: {}",
            escape(&expires_at.to_rfc3339_opts(SecondsFormat::Secs, true))
        ));
    } else if kind == EntityKind::User {
        lines.push("Expires: never".to_string());
    }
    for spec in fields_for(kind) {
        // Expiry has its own line and the label field is the title.
        if spec.key == "expireAt" || entity.field_value(spec.key).as_deref() == Some(entity.label.as_str()) {
            continue;
        }
        if let Some(value) = display_value(entity, spec.key, spec.field_type) {
            lines.push(format!("{}: {}", escape(short_label(spec.label)), code(&value)));
        }
    }
    lines.push(format!("ID: {}", code(&entity.id)));

    let mut actions = Vec::new();
    if kind.is_mutable() {
        actions.push(Button::new(
            "✏️ Edit",
            CallbackToken::entity(Verb::Edit, kind, entity.id.clone()),
        ));
    }
    for verb in GuardedVerb::offered_for(entity) {
        actions.push(Button::new(
            verb.button_label(),
            CallbackToken::entity(verb.verb(), kind, entity.id.clone()),
        ));
    }

    let back = match back_page {
        Some(page) => CallbackToken::entity(Verb::Page, kind, page.to_string()),
        None => CallbackToken::kind(Verb::Section, kind),
    };

    Render::new(lines.join("\n"))
        .rows(grid(actions, 2))
        .row(vec![
            Button::new(
                "🔄 Refresh",
                CallbackToken::entity(Verb::Refresh, kind, entity.id.clone()),
            ),
            Button::new("« Back", back),
        ])
}

/// Entity view from the session cache, or a minimal placeholder with a refresh button.
pub fn entity_state_view(session: &Session, kind: EntityKind, id: &str) -> Render {
    let back_page = session.has_listing(kind).then_some(session.page);
    match session.cached(kind, id) {
        Some(entity) => entity_view(entity, back_page),
        None => Render::new(format!("{} {}", kind.icon(), code(id))).row(vec![
            Button::new("🔄 Refresh", CallbackToken::entity(Verb::Refresh, kind, id)),
            Button::new("« Back", CallbackToken::kind(Verb::Section, kind)),
        ]),
    }
}

pub fn search_prompt(kind: EntityKind) -> Render {
    Render::new(format!(
        "🔎 Send a search query for {}.\n{}",
        kind.plural(),
        italic("Matches name or id, case-insensitive.")
    ))
    .row(vec![Button::cancel()])
}

// ── Handlers ─────────────────────────────────────────────────────

pub fn home(ctx: &mut Context<'_>) -> Result<Transition> {
    ctx.session.clear_workflow();
    ctx.session.search_context = None;
    Ok(Transition::new(ConsoleState::RootMenu, root_view()))
}

pub fn open_section(ctx: &mut Context<'_>, kind: EntityKind) -> Result<Transition> {
    ctx.session.clear_workflow();
    ctx.session.search_context = None;
    Ok(Transition::new(ConsoleState::SectionMenu(kind), section_view(kind)))
}

/// Fetch the full list of `kind` and show page 0.
pub async fn open_list(ctx: &mut Context<'_>, kind: EntityKind) -> Result<Transition> {
    ctx.session.clear_workflow();
    ctx.session.search_context = None;
    let entities = ctx.client.list(kind, &ListFilter::default()).await?;
    tracing::debug!(kind = %kind, count = entities.len(), "listed entities");
    ctx.session.set_listing(kind, entities);
    Ok(Transition::new(
        ConsoleState::ListSelect(kind),
        list_view(ctx.session, kind, ctx.settings),
    ))
}

/// Re-fetch the listing, keeping the active search and the current page.
pub async fn refresh_list(ctx: &mut Context<'_>, kind: EntityKind) -> Result<Transition> {
    let page = ctx.session.page;
    let search = ctx
        .session
        .search_context
        .clone()
        .filter(|search| search.kind == kind);
    let entities = match &search {
        Some(search) => search_entities(ctx, kind, &search.query).await?,
        None => ctx.client.list(kind, &ListFilter::default()).await?,
    };
    ctx.session.set_listing(kind, entities);
    ctx.session.page = page;
    ctx.session.search_context = search;
    Ok(Transition::new(
        ConsoleState::ListSelect(kind),
        list_view(ctx.session, kind, ctx.settings),
    ))
}

/// Move within the cached listing; fetches only when nothing is cached yet.
pub async fn turn_page(ctx: &mut Context<'_>, kind: EntityKind, page: Option<usize>) -> Result<Transition> {
    if !ctx.session.has_listing(kind) {
        return open_list(ctx, kind).await;
    }
    let total = ctx.session.listed_entities(kind).len();
    let total_pages = total.div_ceil(ctx.settings.page_size.max(1)).max(1);
    ctx.session.page = page.unwrap_or(ctx.session.page).min(total_pages - 1);
    Ok(Transition::new(
        ConsoleState::ListSelect(kind),
        list_view(ctx.session, kind, ctx.settings),
    ))
}

/// Show an entity, using the cached snapshot unless `refresh` is set.
pub async fn open_entity(ctx: &mut Context<'_>, kind: EntityKind, id: &str, refresh: bool) -> Result<Transition> {
    ctx.session.clear_workflow();
    if refresh || ctx.session.cached(kind, id).is_none() {
        let entity = ctx.client.get(kind, id).await?;
        ctx.session.cache(entity);
    }
    Ok(Transition::new(
        ConsoleState::EntityView {
            kind,
            id: id.to_string(),
        },
        entity_state_view(ctx.session, kind, id),
    ))
}

pub fn prompt_search(ctx: &mut Context<'_>, kind: EntityKind) -> Result<Transition> {
    ctx.session.clear_workflow();
    Ok(Transition::new(
        ConsoleState::AwaitTextInput(InputPurpose::Search(kind)),
        search_prompt(kind),
    ))
}

async fn search_entities(ctx: &mut Context<'_>, kind: EntityKind, query: &str) -> Result<Vec<Entity>> {
    let mut entities = ctx.client.list(kind, &ListFilter::search(query)).await?;
    // Not every panel honours the search parameter.
    entities.retain(|entity| entity.matches_query(query));
    Ok(entities)
}

pub async fn submit_search(ctx: &mut Context<'_>, kind: EntityKind, raw: &str) -> Result<Transition> {
    let query = raw.trim();
    if query.is_empty() {
        return Ok(Transition::new(
            ConsoleState::AwaitTextInput(InputPurpose::Search(kind)),
            search_prompt(kind).with_notice("⚠️ The search query cannot be empty."),
        ));
    }

    let entities = search_entities(ctx, kind, query).await?;
    ctx.session.set_listing(kind, entities);
    ctx.session.search_context = Some(SearchContext {
        kind,
        query: query.to_string(),
    });
    Ok(Transition::new(
        ConsoleState::ListSelect(kind),
        list_view(ctx.session, kind, ctx.settings),
    ))
}
