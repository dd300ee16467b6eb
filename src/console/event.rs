//! Inbound console events and the structured callback token.
//!
//! Button callbacks travel over the chat platform as short strings
//! (`<verb>_<kind>_<id>`, or the legacy `<verb>_<id>`). They are decoded into
//! [`CallbackToken`] once, at the channel boundary; the router only ever sees
//! the structured form.

use std::fmt;

use crate::entity::EntityKind;

/// Button verbs understood by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Menu,
    Section,
    List,
    Refresh,
    Page,
    Select,
    Search,
    Create,
    Edit,
    Field,
    Choice,
    Skip,
    Enable,
    Disable,
    Delete,
    Reset,
    Restart,
    Revoke,
    Yes,
    No,
    Bulk,
    BulkOp,
    Criterion,
    Cancel,
    Noop,
}

impl Verb {
    pub const ALL: [Verb; 25] = [
        Verb::Menu,
        Verb::Section,
        Verb::List,
        Verb::Refresh,
        Verb::Page,
        Verb::Select,
        Verb::Search,
        Verb::Create,
        Verb::Edit,
        Verb::Field,
        Verb::Choice,
        Verb::Skip,
        Verb::Enable,
        Verb::Disable,
        Verb::Delete,
        Verb::Reset,
        Verb::Restart,
        Verb::Revoke,
        Verb::Yes,
        Verb::No,
        Verb::Bulk,
        Verb::BulkOp,
        Verb::Criterion,
        Verb::Cancel,
        Verb::Noop,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Verb::Menu => "menu",
            Verb::Section => "section",
            Verb::List => "list",
            Verb::Refresh => "refresh",
            Verb::Page => "page",
            Verb::Select => "select",
            Verb::Search => "search",
            Verb::Create => "create",
            Verb::Edit => "edit",
            Verb::Field => "field",
            Verb::Choice => "choice",
            Verb::Skip => "skip",
            Verb::Enable => "enable",
            Verb::Disable => "disable",
            Verb::Delete => "delete",
            Verb::Reset => "reset",
            Verb::Restart => "restart",
            Verb::Revoke => "revoke",
            Verb::Yes => "yes",
            Verb::No => "no",
            Verb::Bulk => "bulk",
            Verb::BulkOp => "bulkop",
            Verb::Criterion => "crit",
            Verb::Cancel => "cancel",
            Verb::Noop => "noop",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Verb::ALL.into_iter().find(|verb| verb.as_str() == raw)
    }
}

/// Structured form of a button callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackToken {
    pub verb: Verb,
    pub kind: Option<EntityKind>,
    pub id: Option<String>,
}

impl CallbackToken {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            kind: None,
            id: None,
        }
    }

    pub fn kind(verb: Verb, kind: EntityKind) -> Self {
        Self {
            verb,
            kind: Some(kind),
            id: None,
        }
    }

    pub fn entity(verb: Verb, kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            verb,
            kind: Some(kind),
            id: Some(id.into()),
        }
    }

    pub fn with_id(verb: Verb, id: impl Into<String>) -> Self {
        Self {
            verb,
            kind: None,
            id: Some(id.into()),
        }
    }

    /// Wire form: `verb`, `verb_kind`, `verb_kind_id` or `verb_id`.
    pub fn encode(&self) -> String {
        let mut out = self.verb.as_str().to_string();
        if let Some(kind) = self.kind {
            out.push('_');
            out.push_str(kind.as_str());
        }
        if let Some(id) = &self.id {
            out.push('_');
            out.push_str(id);
        }
        out
    }

    /// Decode a wire token. Ids may themselves contain underscores; a second
    /// segment that is not an entity kind is the start of a legacy `verb_id` id.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (verb, rest) = match raw.split_once('_') {
            Some((verb, rest)) => (verb, Some(rest)),
            None => (raw, None),
        };
        let verb = Verb::parse(verb)?;

        let Some(rest) = rest.filter(|rest| !rest.is_empty()) else {
            return Some(Self::new(verb));
        };

        let (head, tail) = match rest.split_once('_') {
            Some((head, tail)) => (head, Some(tail)),
            None => (rest, None),
        };

        match kind_segment(head) {
            Some(kind) => Some(Self {
                verb,
                kind: Some(kind),
                id: tail.filter(|id| !id.is_empty()).map(ToString::to_string),
            }),
            None => Some(Self::with_id(verb, rest)),
        }
    }
}

/// Only the exact singular tokens count as a kind segment inside callback data.
fn kind_segment(raw: &str) -> Option<EntityKind> {
    EntityKind::ALL.into_iter().find(|kind| kind.as_str() == raw)
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Platform-agnostic inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Slash command, normalized: no leading `/`, no `@bot` suffix, lowercase.
    Command(String),
    ButtonPress(CallbackToken),
    TextMessage(String),
}

impl InboundEvent {
    /// Build a command event from raw chat text such as `/Start@panel_bot now`.
    pub fn command(raw: &str) -> Option<Self> {
        let body = raw.trim().strip_prefix('/')?;
        let name = body.split_whitespace().next()?;
        let name = name.split('@').next().unwrap_or(name);
        if name.is_empty() {
            return None;
        }
        Some(InboundEvent::Command(name.to_ascii_lowercase()))
    }

    /// Text messages starting with `/` are commands, everything else is free text.
    pub fn from_text(raw: &str) -> Self {
        Self::command(raw).unwrap_or_else(|| InboundEvent::TextMessage(raw.to_string()))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            InboundEvent::Command(_) => "command",
            InboundEvent::ButtonPress(_) => "button",
            InboundEvent::TextMessage(_) => "text",
        }
    }
}
