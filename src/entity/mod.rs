//! Backend entities as seen by the console.
//!
//! The console only interprets a thin slice of every entity: its id, a display
//! label, a status flag, a usage counter and an optional expiry. Everything else
//! travels untouched in [`Entity::payload`] between the backend and the views.

pub mod schema;

pub use schema::{build_payload, fields_for, find_field, FieldDefault, FieldEntry, FieldError, FieldSpec, FieldType};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Backend entity families managed through the console.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Node,
    Host,
    Inbound,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::User,
        EntityKind::Node,
        EntityKind::Host,
        EntityKind::Inbound,
    ];

    /// Short token used in callback data and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Node => "node",
            EntityKind::Host => "host",
            EntityKind::Inbound => "inbound",
        }
    }

    /// Plural form, used for backend paths and list envelopes (`{"users": [...]}`).
    pub const fn plural(self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Node => "nodes",
            EntityKind::Host => "hosts",
            EntityKind::Inbound => "inbounds",
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            EntityKind::User => "Users",
            EntityKind::Node => "Nodes",
            EntityKind::Host => "Hosts",
            EntityKind::Inbound => "Inbounds",
        }
    }

    pub const fn icon(self) -> &'static str {
        match self {
            EntityKind::User => "👤",
            EntityKind::Node => "🖥",
            EntityKind::Host => "🌐",
            EntityKind::Inbound => "🔌",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "user" | "users" => Some(EntityKind::User),
            "node" | "nodes" => Some(EntityKind::Node),
            "host" | "hosts" => Some(EntityKind::Host),
            "inbound" | "inbounds" => Some(EntityKind::Inbound),
            _ => None,
        }
    }

    /// Inbounds are defined by node configuration and are read-only here.
    pub const fn is_mutable(self) -> bool {
        !matches!(self, EntityKind::Inbound)
    }

    /// Whether the backend accepts one batched request for bulk operations.
    pub const fn supports_batch(self) -> bool {
        matches!(self, EntityKind::User | EntityKind::Host)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstract handle to a backend entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum EntityStatus {
    Active,
    Disabled,
    Limited,
    Expired,
}

impl EntityStatus {
    pub const ALL: [EntityStatus; 4] = [
        EntityStatus::Active,
        EntityStatus::Disabled,
        EntityStatus::Limited,
        EntityStatus::Expired,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "enabled" | "connected" | "online" => Some(EntityStatus::Active),
            "disabled" | "inactive" | "offline" => Some(EntityStatus::Disabled),
            "limited" => Some(EntityStatus::Limited),
            "expired" => Some(EntityStatus::Expired),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Disabled => "disabled",
            EntityStatus::Limited => "limited",
            EntityStatus::Expired => "expired",
        }
    }

    pub const fn glyph(self) -> &'static str {
        match self {
            EntityStatus::Active => "🟢",
            EntityStatus::Disabled => "🔴",
            EntityStatus::Limited => "🟡",
            EntityStatus::Expired => "⚪",
        }
    }

    pub const fn is_enabled(self) -> bool {
        !matches!(self, EntityStatus::Disabled)
    }
}

/// Last-fetched snapshot of a backend entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    pub kind: EntityKind,
    pub id: String,
    pub label: String,
    pub status: EntityStatus,
    pub used_bytes: u64,
    pub expires_at: Option<DateTime<Utc>>,
    pub payload: Value,
}

const ID_KEYS: &[&str] = &["uuid", "id"];
const LABEL_KEYS: &[&str] = &["username", "name", "remark", "tag"];
const USAGE_KEYS: &[&str] = &["usedTrafficBytes", "trafficUsedBytes", "used_traffic"];
const EXPIRY_KEYS: &[&str] = &["expireAt", "expire_at", "expiresAt"];

impl Entity {
    /// Extract the interpreted fields from a raw backend object.
    ///
    /// Returns `None` when the value is not an object or carries no usable id.
    pub fn from_value(kind: EntityKind, value: Value) -> Option<Self> {
        let object = value.as_object()?;

        let id = ID_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(scalar_to_string))?;
        if id.is_empty() {
            return None;
        }

        let label = LABEL_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(scalar_to_string))
            .filter(|label| !label.trim().is_empty())
            .unwrap_or_else(|| id.clone());

        let status = object
            .get("status")
            .and_then(Value::as_str)
            .and_then(EntityStatus::parse)
            .or_else(|| {
                object
                    .get("isDisabled")
                    .and_then(Value::as_bool)
                    .map(|disabled| if disabled { EntityStatus::Disabled } else { EntityStatus::Active })
            })
            .or_else(|| {
                ["isEnabled", "enabled"]
                    .iter()
                    .find_map(|key| object.get(*key).and_then(Value::as_bool))
                    .map(|enabled| if enabled { EntityStatus::Active } else { EntityStatus::Disabled })
            })
            .unwrap_or(EntityStatus::Active);

        // Newer panels nest traffic counters under `userTraffic`.
        let used_bytes = USAGE_KEYS
            .iter()
            .find_map(|key| object.get(*key).and_then(value_to_u64))
            .or_else(|| {
                object
                    .get("userTraffic")
                    .and_then(|traffic| traffic.get("usedTrafficBytes"))
                    .and_then(value_to_u64)
            })
            .unwrap_or(0);

        let expires_at = EXPIRY_KEYS
            .iter()
            .find_map(|key| object.get(*key))
            .and_then(parse_timestamp);

        Some(Self {
            kind,
            id,
            label,
            status,
            used_bytes,
            expires_at,
            payload: value,
        })
    }

    pub fn reference(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id.clone())
    }

    /// Status glyph plus label, truncated to `max_chars` characters with an ellipsis.
    pub fn display_name(&self, max_chars: usize) -> String {
        format!("{} {}", self.status.glyph(), truncate_label(&self.label, max_chars))
    }

    /// Current raw value of a payload field, rendered for prompts.
    pub fn field_value(&self, wire_key: &str) -> Option<String> {
        match self.payload.get(wire_key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// True when the entity expires in `[now, now + days]`.
    pub fn expires_within(&self, now: DateTime<Utc>, days: u32) -> bool {
        match self.expires_at {
            Some(at) => at >= now && at <= now + Duration::days(i64::from(days)),
            None => false,
        }
    }

    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        needle.is_empty()
            || self.label.to_lowercase().contains(&needle)
            || self.id.to_lowercase().contains(&needle)
    }
}

/// Truncate on a char boundary, marking the cut with `…`.
pub fn truncate_label(label: &str, max_chars: usize) -> String {
    if label.chars().count() <= max_chars {
        return label.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut truncated: String = label.chars().take(keep).collect();
    truncated.push('…');
    truncated
}

/// Human-readable byte count (binary units).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .filter(|secs| *secs > 0)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}
