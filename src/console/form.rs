//! Create and edit forms: prompt, validate, store, advance.
//!
//! Creation walks every field of the kind's schema in order, accumulating
//! validated values in the session's edit buffer. Editing changes one field at a
//! time. Both end in exactly one backend call.

use anyhow::Result;
use serde_json::Map;

use super::event::{CallbackToken, Verb};
use super::navigation::{display_value, entity_state_view, section_view, short_label};
use super::render::{bold, code, escape, grid, italic, Button, Render};
use super::router::{Context, Transition};
use super::state::ConsoleState;
use crate::backend::BackendError;
use crate::entity::{build_payload, fields_for, find_field, Entity, EntityKind, FieldEntry, FieldError, FieldSpec};

fn choice_rows(spec: &FieldSpec) -> Vec<Vec<Button>> {
    let buttons = spec
        .choices()
        .iter()
        .map(|choice| Button::new(*choice, CallbackToken::with_id(Verb::Choice, *choice)))
        .collect();
    grid(buttons, 2)
}

pub fn create_prompt(kind: EntityKind, index: usize, error: Option<&FieldError>) -> Render {
    let fields = fields_for(kind);
    let Some(spec) = fields.get(index) else {
        return section_view(kind);
    };

    let mut text = format!(
        "➕ New {} · step {}/{}\n{}\n{}",
        kind.as_str(),
        index + 1,
        fields.len(),
        bold(spec.label),
        italic(&spec.hint())
    );
    if spec.skippable() {
        text.push_str("\nOptional: press Skip to leave it unset.");
    }
    if let Some(error) = error {
        text.push_str(&format!("\n\n⚠️ {}", escape(&error.message)));
    }

    let mut controls = Vec::with_capacity(2);
    if spec.skippable() {
        controls.push(Button::new("⏭ Skip", CallbackToken::new(Verb::Skip)));
    }
    controls.push(Button::cancel());

    Render::new(text).rows(choice_rows(spec)).row(controls)
}

pub fn edit_menu(kind: EntityKind, id: &str, entity: Option<&Entity>) -> Render {
    let label = entity.map_or(id, |entity| entity.label.as_str());
    let buttons = fields_for(kind)
        .iter()
        .filter(|spec| spec.editable)
        .map(|spec| {
            let current = entity
                .and_then(|entity| display_value(entity, spec.key, spec.field_type))
                .unwrap_or_else(|| "-".to_string());
            Button::new(
                format!("{}: {}", short_label(spec.label), current),
                CallbackToken::entity(Verb::Field, kind, spec.key),
            )
        })
        .collect();

    Render::new(format!("✏️ Edit {}\nChoose a field:", bold(label)))
        .rows(grid(buttons, 1))
        .row(vec![Button::cancel()])
}

pub fn edit_prompt(spec: &FieldSpec, entity: Option<&Entity>, error: Option<&FieldError>) -> Render {
    let current = entity
        .and_then(|entity| display_value(entity, spec.key, spec.field_type))
        .unwrap_or_else(|| "not set".to_string());
    let mut text = format!(
        "✏️ {}\nCurrent: {}\n{}",
        bold(spec.label),
        code(&current),
        italic(&spec.hint())
    );
    if let Some(error) = error {
        text.push_str(&format!("\n\n⚠️ {}", escape(&error.message)));
    }
    Render::new(text)
        .rows(choice_rows(spec))
        .row(vec![Button::cancel()])
}

// ── Create ───────────────────────────────────────────────────────

pub fn begin_create(ctx: &mut Context<'_>, kind: EntityKind) -> Result<Transition> {
    if !kind.is_mutable() || fields_for(kind).is_empty() {
        return Ok(Transition::new(ConsoleState::SectionMenu(kind), section_view(kind)));
    }
    ctx.session.clear_workflow();
    Ok(Transition::new(
        ConsoleState::CreateField { kind, index: 0 },
        create_prompt(kind, 0, None),
    ))
}

/// Validate the answer for field `index`; advance on success, re-prompt on failure.
pub async fn submit_create_value(
    ctx: &mut Context<'_>,
    kind: EntityKind,
    index: usize,
    raw: &str,
) -> Result<Transition> {
    let Some(spec) = fields_for(kind).get(index) else {
        return Ok(Transition::new(ConsoleState::SectionMenu(kind), section_view(kind)));
    };

    match spec.validate(raw, ctx.now.date_naive()) {
        Ok(value) => {
            record(ctx, spec, Some(value));
            advance(ctx, kind, index).await
        }
        Err(error) => {
            tracing::debug!(kind = %kind, field = spec.key, error = %error, "field rejected");
            Ok(Transition::new(
                ConsoleState::CreateField { kind, index },
                create_prompt(kind, index, Some(&error)),
            ))
        }
    }
}

pub async fn skip_create_field(ctx: &mut Context<'_>, kind: EntityKind, index: usize) -> Result<Transition> {
    let Some(spec) = fields_for(kind).get(index) else {
        return Ok(Transition::new(ConsoleState::SectionMenu(kind), section_view(kind)));
    };
    if !spec.skippable() {
        let error = FieldError {
            field: spec.key.to_string(),
            label: spec.label.to_string(),
            message: "this field is required".to_string(),
        };
        return Ok(Transition::new(
            ConsoleState::CreateField { kind, index },
            create_prompt(kind, index, Some(&error)),
        ));
    }
    record(ctx, spec, None);
    advance(ctx, kind, index).await
}

fn record(ctx: &mut Context<'_>, spec: &FieldSpec, value: Option<serde_json::Value>) {
    ctx.session.edit_buffer.retain(|entry| entry.field != spec.key);
    ctx.session.edit_buffer.push(FieldEntry {
        field: spec.key.to_string(),
        validated: value.is_some(),
        value,
    });
}

async fn advance(ctx: &mut Context<'_>, kind: EntityKind, index: usize) -> Result<Transition> {
    let next = index + 1;
    if next < fields_for(kind).len() {
        return Ok(Transition::new(
            ConsoleState::CreateField { kind, index: next },
            create_prompt(kind, next, None),
        ));
    }
    finish_create(ctx, kind).await
}

async fn finish_create(ctx: &mut Context<'_>, kind: EntityKind) -> Result<Transition> {
    let payload = match build_payload(
        kind,
        &ctx.session.edit_buffer,
        ctx.now,
        ctx.settings.default_expiry_days,
    ) {
        Ok(payload) => payload,
        Err(error) => {
            // Send the operator back to the field that is still missing.
            let index = fields_for(kind)
                .iter()
                .position(|spec| spec.key == error.field)
                .unwrap_or(0);
            return Ok(Transition::new(
                ConsoleState::CreateField { kind, index },
                create_prompt(kind, index, Some(&error)),
            ));
        }
    };

    match ctx.client.create(kind, payload).await {
        Ok(entity) => {
            tracing::info!(
                user_id = ctx.session.key.user_id,
                kind = %kind,
                id = %entity.id,
                "entity created"
            );
            ctx.session.clear_workflow();
            let id = entity.id.clone();
            let notice = format!("✅ Created {} {}.", kind.as_str(), bold(&entity.label));
            ctx.session.cache(entity);
            Ok(Transition::new(
                ConsoleState::EntityView {
                    kind,
                    id: id.clone(),
                },
                entity_state_view(ctx.session, kind, &id).with_notice(&notice),
            ))
        }
        Err(BackendError::Rejected(detail)) => {
            tracing::warn!(kind = %kind, detail = %detail, "backend rejected create");
            ctx.session.clear_workflow();
            Ok(Transition::new(
                ConsoleState::SectionMenu(kind),
                section_view(kind).with_notice(&format!(
                    "❌ The panel rejected the new {}. Nothing was created.",
                    kind.as_str()
                )),
            ))
        }
        Err(other) => Err(other.into()),
    }
}

// ── Edit ─────────────────────────────────────────────────────────

pub async fn begin_edit(ctx: &mut Context<'_>, kind: EntityKind, id: &str) -> Result<Transition> {
    if !kind.is_mutable() {
        return Ok(Transition::new(
            ConsoleState::EntityView {
                kind,
                id: id.to_string(),
            },
            entity_state_view(ctx.session, kind, id),
        ));
    }
    if ctx.session.cached(kind, id).is_none() {
        let entity = ctx.client.get(kind, id).await?;
        ctx.session.cache(entity);
    }
    ctx.session.clear_workflow();
    Ok(Transition::new(
        ConsoleState::EditFieldSelect {
            kind,
            id: id.to_string(),
        },
        edit_menu(kind, id, ctx.session.cached(kind, id)),
    ))
}

pub fn pick_edit_field(ctx: &mut Context<'_>, kind: EntityKind, id: &str, key: &str) -> Result<Transition> {
    let Some(spec) = find_field(kind, key).filter(|spec| spec.editable) else {
        return Ok(Transition::new(
            ConsoleState::EditFieldSelect {
                kind,
                id: id.to_string(),
            },
            edit_menu(kind, id, ctx.session.cached(kind, id)),
        ));
    };
    ctx.session.edit_buffer.clear();
    Ok(Transition::new(
        ConsoleState::EditFieldValue {
            kind,
            id: id.to_string(),
            field: spec.key.to_string(),
        },
        edit_prompt(spec, ctx.session.cached(kind, id), None),
    ))
}

pub async fn submit_edit_value(
    ctx: &mut Context<'_>,
    kind: EntityKind,
    id: &str,
    key: &str,
    raw: &str,
) -> Result<Transition> {
    let Some(spec) = find_field(kind, key).filter(|spec| spec.editable) else {
        return Ok(Transition::new(
            ConsoleState::EditFieldSelect {
                kind,
                id: id.to_string(),
            },
            edit_menu(kind, id, ctx.session.cached(kind, id)),
        ));
    };

    let value = match spec.validate(raw, ctx.now.date_naive()) {
        Ok(value) => value,
        Err(error) => {
            return Ok(Transition::new(
                ConsoleState::EditFieldValue {
                    kind,
                    id: id.to_string(),
                    field: key.to_string(),
                },
                edit_prompt(spec, ctx.session.cached(kind, id), Some(&error)),
            ));
        }
    };

    record(ctx, spec, Some(value.clone()));
    let mut patch = Map::new();
    patch.insert(spec.key.to_string(), value);

    let view = ConsoleState::EntityView {
        kind,
        id: id.to_string(),
    };
    match ctx.client.update(kind, id, patch).await {
        Ok(entity) => {
            tracing::info!(
                user_id = ctx.session.key.user_id,
                kind = %kind,
                id = %id,
                field = spec.key,
                "entity updated"
            );
            ctx.session.clear_workflow();
            ctx.session.cache(entity);
            let notice = format!("✅ {} updated.", escape(short_label(spec.label)));
            Ok(Transition::new(
                view,
                entity_state_view(ctx.session, kind, id).with_notice(&notice),
            ))
        }
        Err(BackendError::Rejected(detail)) => {
            tracing::warn!(kind = %kind, id = %id, field = spec.key, detail = %detail, "backend rejected update");
            ctx.session.clear_workflow();
            Ok(Transition::new(
                view,
                entity_state_view(ctx.session, kind, id)
                    .with_notice("❌ The panel rejected the change. Nothing was updated."),
            ))
        }
        Err(other) => Err(other.into()),
    }
}
