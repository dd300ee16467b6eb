//! Field schemas for the create/edit forms and their validation rules.

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

use super::EntityKind;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// `[A-Za-z0-9_-]`, 3 to 36 characters.
    Identifier,
    Text { max_chars: usize },
    NonNegative,
    /// Entered in GB, sent as bytes.
    TrafficGb,
    /// ISO date, not in the past. Sent as an RFC 3339 end-of-day timestamp.
    Date,
    Choice(&'static [&'static str]),
    Port,
    Address,
    Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDefault {
    Literal(&'static str),
    /// Now plus the configured default expiry offset.
    ExpiryOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Wire key in the backend payload.
    pub key: &'static str,
    pub label: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub editable: bool,
    pub default: Option<FieldDefault>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{label}: {message}")]
pub struct FieldError {
    pub field: String,
    pub label: String,
    pub message: String,
}

/// One slot of the edit buffer. Skipped fields carry no value and are not validated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldEntry {
    pub field: String,
    pub value: Option<Value>,
    pub validated: bool,
}

pub const RESET_STRATEGIES: &[&str] = &["NO_RESET", "DAY", "WEEK", "MONTH"];

const USER_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "username",
        label: "Username",
        field_type: FieldType::Identifier,
        required: true,
        editable: false,
        default: None,
    },
    FieldSpec {
        key: "trafficLimitBytes",
        label: "Traffic limit (GB, 0 = unlimited)",
        field_type: FieldType::TrafficGb,
        required: true,
        editable: true,
        default: Some(FieldDefault::Literal("0")),
    },
    FieldSpec {
        key: "trafficLimitStrategy",
        label: "Traffic reset strategy",
        field_type: FieldType::Choice(RESET_STRATEGIES),
        required: true,
        editable: true,
        default: Some(FieldDefault::Literal("NO_RESET")),
    },
    FieldSpec {
        key: "expireAt",
        label: "Expiry date (YYYY-MM-DD)",
        field_type: FieldType::Date,
        required: true,
        editable: true,
        default: Some(FieldDefault::ExpiryOffset),
    },
    FieldSpec {
        key: "hwidDeviceLimit",
        label: "Device limit",
        field_type: FieldType::NonNegative,
        required: false,
        editable: true,
        default: None,
    },
    FieldSpec {
        key: "telegramId",
        label: "Telegram ID",
        field_type: FieldType::NonNegative,
        required: false,
        editable: true,
        default: None,
    },
    FieldSpec {
        key: "description",
        label: "Description",
        field_type: FieldType::Text { max_chars: 255 },
        required: false,
        editable: true,
        default: None,
    },
];

const NODE_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "name",
        label: "Name",
        field_type: FieldType::Text { max_chars: 30 },
        required: true,
        editable: true,
        default: None,
    },
    FieldSpec {
        key: "address",
        label: "Address",
        field_type: FieldType::Address,
        required: true,
        editable: true,
        default: None,
    },
    FieldSpec {
        key: "port",
        label: "Port",
        field_type: FieldType::Port,
        required: true,
        editable: true,
        default: Some(FieldDefault::Literal("2222")),
    },
    FieldSpec {
        key: "trafficLimitBytes",
        label: "Traffic limit (GB)",
        field_type: FieldType::TrafficGb,
        required: false,
        editable: true,
        default: None,
    },
];

const HOST_FIELDS: &[FieldSpec] = &[
    FieldSpec {
        key: "remark",
        label: "Remark",
        field_type: FieldType::Text { max_chars: 40 },
        required: true,
        editable: true,
        default: None,
    },
    FieldSpec {
        key: "address",
        label: "Address",
        field_type: FieldType::Address,
        required: true,
        editable: true,
        default: None,
    },
    FieldSpec {
        key: "port",
        label: "Port",
        field_type: FieldType::Port,
        required: true,
        editable: true,
        default: None,
    },
    FieldSpec {
        key: "inboundUuid",
        label: "Inbound UUID",
        field_type: FieldType::Uuid,
        required: true,
        editable: true,
        default: None,
    },
    FieldSpec {
        key: "sni",
        label: "SNI",
        field_type: FieldType::Text { max_chars: 253 },
        required: false,
        editable: true,
        default: None,
    },
];

/// Ordered form fields for an entity kind. Read-only kinds have none.
pub fn fields_for(kind: EntityKind) -> &'static [FieldSpec] {
    match kind {
        EntityKind::User => USER_FIELDS,
        EntityKind::Node => NODE_FIELDS,
        EntityKind::Host => HOST_FIELDS,
        EntityKind::Inbound => &[],
    }
}

pub fn find_field(kind: EntityKind, key: &str) -> Option<&'static FieldSpec> {
    fields_for(kind).iter().find(|spec| spec.key == key)
}

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("identifier regex is valid"))
}

fn address_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9.\-:\[\]]+$").expect("address regex is valid"))
}

impl FieldSpec {
    /// Optional fields and fields with a default may be skipped during creation.
    pub fn skippable(&self) -> bool {
        !self.required || self.default.is_some()
    }

    pub fn choices(&self) -> &'static [&'static str] {
        match self.field_type {
            FieldType::Choice(options) => options,
            _ => &[],
        }
    }

    /// Short description of what the field accepts, shown under the prompt.
    pub fn hint(&self) -> String {
        match self.field_type {
            FieldType::Identifier => "3-36 characters: letters, digits, '_' or '-'".into(),
            FieldType::Text { max_chars } => format!("free text, up to {max_chars} characters"),
            FieldType::NonNegative => "a whole number, 0 or more".into(),
            FieldType::TrafficGb => "gigabytes, e.g. 50 or 0.5".into(),
            FieldType::Date => "a date like 2025-12-31".into(),
            FieldType::Choice(options) => format!("one of: {}", options.join(", ")),
            FieldType::Port => "a port between 1 and 65535".into(),
            FieldType::Address => "a hostname or IP address".into(),
            FieldType::Uuid => "a UUID".into(),
        }
    }

    fn error(&self, message: impl Into<String>) -> FieldError {
        FieldError {
            field: self.key.to_string(),
            label: self.label.to_string(),
            message: message.into(),
        }
    }

    /// Validate operator input and convert it to the wire value.
    pub fn validate(&self, raw: &str, today: NaiveDate) -> Result<Value, FieldError> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(self.error("a value is required"));
        }

        match self.field_type {
            FieldType::Identifier => {
                let len = input.chars().count();
                if !(3..=36).contains(&len) {
                    return Err(self.error("must be between 3 and 36 characters"));
                }
                if !identifier_regex().is_match(input) {
                    return Err(self.error("only letters, digits, '_' and '-' are allowed"));
                }
                Ok(Value::String(input.to_string()))
            }
            FieldType::Text { max_chars } => {
                if input.chars().count() > max_chars {
                    return Err(self.error(format!("must be at most {max_chars} characters")));
                }
                Ok(Value::String(input.to_string()))
            }
            FieldType::NonNegative => {
                let value: i64 = input
                    .parse()
                    .map_err(|_| self.error("must be a whole number"))?;
                if value < 0 {
                    return Err(self.error("must not be negative"));
                }
                Ok(Value::from(value))
            }
            FieldType::TrafficGb => {
                let gb: f64 = input
                    .replace(',', ".")
                    .parse()
                    .map_err(|_| self.error("must be a number of gigabytes"))?;
                if !gb.is_finite() {
                    return Err(self.error("must be a number of gigabytes"));
                }
                if gb < 0.0 {
                    return Err(self.error("must not be negative"));
                }
                Ok(Value::from((gb * BYTES_PER_GB).round() as u64))
            }
            FieldType::Date => {
                let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
                    .ok()
                    .or_else(|| {
                        DateTime::parse_from_rfc3339(input)
                            .ok()
                            .map(|dt| dt.with_timezone(&Utc).date_naive())
                    })
                    .ok_or_else(|| self.error("must be an ISO date like 2025-12-31"))?;
                if date < today {
                    return Err(self.error("must not be in the past"));
                }
                Ok(Value::String(end_of_day(date)))
            }
            FieldType::Choice(options) => {
                let normalized = input.to_ascii_uppercase();
                options
                    .iter()
                    .find(|option| option.eq_ignore_ascii_case(&normalized))
                    .map(|option| Value::String((*option).to_string()))
                    .ok_or_else(|| self.error(format!("must be one of {}", options.join(", "))))
            }
            FieldType::Port => {
                let port: u32 = input
                    .parse()
                    .map_err(|_| self.error("must be a port number"))?;
                if !(1..=65_535).contains(&port) {
                    return Err(self.error("must be between 1 and 65535"));
                }
                Ok(Value::from(port))
            }
            FieldType::Address => {
                if input.len() > 253 || !address_regex().is_match(input) {
                    return Err(self.error("must be a hostname or IP address"));
                }
                Ok(Value::String(input.to_string()))
            }
            FieldType::Uuid => uuid::Uuid::parse_str(input)
                .map(|id| Value::String(id.to_string()))
                .map_err(|_| self.error("must be a UUID")),
        }
    }

    fn default_value(&self, now: DateTime<Utc>, expiry_days: u32) -> Option<Value> {
        match self.default? {
            FieldDefault::Literal(literal) => self.validate(literal, now.date_naive()).ok(),
            FieldDefault::ExpiryOffset => {
                let at = now.checked_add_signed(Duration::days(i64::from(expiry_days)))?;
                Some(Value::String(at.to_rfc3339_opts(SecondsFormat::Secs, true)))
            }
        }
    }
}

fn end_of_day(date: NaiveDate) -> String {
    date.and_hms_opt(23, 59, 59)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| date.to_string())
}

/// Assemble the create payload from the collected entries, injecting defaults for
/// unset fields that have one.
pub fn build_payload(
    kind: EntityKind,
    entries: &[FieldEntry],
    now: DateTime<Utc>,
    expiry_days: u32,
) -> Result<Map<String, Value>, FieldError> {
    let mut payload = Map::new();
    for spec in fields_for(kind) {
        let collected = entries
            .iter()
            .find(|entry| entry.field == spec.key)
            .and_then(|entry| entry.value.clone());

        match collected.or_else(|| spec.default_value(now, expiry_days)) {
            Some(value) => {
                payload.insert(spec.key.to_string(), value);
            }
            None if spec.required => return Err(spec.error("a value is required")),
            None => {}
        }
    }
    Ok(payload)
}
