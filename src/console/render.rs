//! Outbound view model: text in the constrained markup subset plus a button grid.

use super::event::{CallbackToken, Verb};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub token: CallbackToken,
}

impl Button {
    pub fn new(label: impl Into<String>, token: CallbackToken) -> Self {
        Self {
            label: label.into(),
            token,
        }
    }

    pub fn cancel() -> Self {
        Self::new("✖️ Cancel", CallbackToken::new(Verb::Cancel))
    }

    pub fn main_menu() -> Self {
        Self::new("🏠 Main menu", CallbackToken::new(Verb::Menu))
    }
}

/// A rendered view. `text` is already escaped markup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Render {
    pub text: String,
    pub buttons: Vec<Vec<Button>>,
}

impl Render {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn row(mut self, row: Vec<Button>) -> Self {
        if !row.is_empty() {
            self.buttons.push(row);
        }
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Vec<Button>>) -> Self {
        for row in rows {
            self = self.row(row);
        }
        self
    }

    /// Prefix a notice line above the existing text.
    pub fn with_notice(mut self, notice: &str) -> Self {
        self.text = if self.text.is_empty() {
            notice.to_string()
        } else {
            format!("{notice}\n\n{}", self.text)
        };
        self
    }

    pub fn tokens(&self) -> impl Iterator<Item = &CallbackToken> {
        self.buttons.iter().flatten().map(|button| &button.token)
    }

    pub fn has_verb(&self, verb: Verb) -> bool {
        self.tokens().any(|token| token.verb == verb)
    }
}

/// Escape `&`, `<` and `>` for the HTML markup subset.
pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

pub fn bold(raw: &str) -> String {
    format!("<b>{}</b>", escape(raw))
}

pub fn code(raw: &str) -> String {
    format!("<code>{}</code>", escape(raw))
}

pub fn italic(raw: &str) -> String {
    format!("<i>{}</i>", escape(raw))
}

/// Split buttons into rows of `width`.
pub fn grid(buttons: Vec<Button>, width: usize) -> Vec<Vec<Button>> {
    let width = width.max(1);
    let mut rows = Vec::new();
    let mut current = Vec::with_capacity(width);
    for button in buttons {
        current.push(button);
        if current.len() == width {
            rows.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        rows.push(current);
    }
    rows
}
