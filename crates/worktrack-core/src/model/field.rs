//! Typed field values for dynamically-shaped work items.
//!
//! A work item's attributes are a mapping from field name to [`FieldValue`].
//! The owning [`WorkItemType`](super::item_type::WorkItemType) declares a
//! [`FieldKind`] per field; raw JSON literals are converted to that kind at
//! the mapping boundary and nowhere else.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};

use super::item::ParseEnumError;

/// The declared kind of a work item field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Bool,
    Timestamp,
    Identifier,
}

impl FieldKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::Timestamp => "timestamp",
            Self::Identifier => "identifier",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Ok(Self::String),
            "integer" | "int" => Ok(Self::Integer),
            "bool" | "boolean" => Ok(Self::Bool),
            "timestamp" | "instant" => Ok(Self::Timestamp),
            "identifier" | "id" | "user" => Ok(Self::Identifier),
            _ => Err(ParseEnumError {
                expected: "field kind",
                got: s.to_string(),
            }),
        }
    }
}

/// A field value tagged with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Identifier(String),
}

impl FieldValue {
    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        match self {
            Self::String(_) => FieldKind::String,
            Self::Integer(_) => FieldKind::Integer,
            Self::Bool(_) => FieldKind::Bool,
            Self::Timestamp(_) => FieldKind::Timestamp,
            Self::Identifier(_) => FieldKind::Identifier,
        }
    }

    /// Convert a JSON literal to a value of `kind`.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the literal cannot be
    /// represented as `kind`.
    pub fn from_json(kind: FieldKind, literal: &Value) -> Result<Self, String> {
        let mismatch = || format!("expected {kind}, got {}", describe(literal));
        match kind {
            FieldKind::String => match literal {
                Value::String(s) => Ok(Self::String(s.clone())),
                _ => Err(mismatch()),
            },
            FieldKind::Integer => match literal {
                Value::Number(n) => n.as_i64().map(Self::Integer).ok_or_else(mismatch),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Self::Integer)
                    .map_err(|_| mismatch()),
                _ => Err(mismatch()),
            },
            FieldKind::Bool => match literal {
                Value::Bool(b) => Ok(Self::Bool(*b)),
                Value::String(s) => match s.trim() {
                    "true" => Ok(Self::Bool(true)),
                    "false" => Ok(Self::Bool(false)),
                    _ => Err(mismatch()),
                },
                _ => Err(mismatch()),
            },
            FieldKind::Timestamp => match literal {
                Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                    .map(|ts| Self::Timestamp(ts.with_timezone(&Utc)))
                    .map_err(|e| format!("{}: {e}", mismatch())),
                Value::Number(n) => n
                    .as_i64()
                    .and_then(|us| Utc.timestamp_micros(us).single())
                    .map(Self::Timestamp)
                    .ok_or_else(mismatch),
                _ => Err(mismatch()),
            },
            FieldKind::Identifier => match literal {
                Value::String(s) if is_identifier(s) => Ok(Self::Identifier(s.clone())),
                Value::Number(n) if n.is_i64() || n.is_u64() => {
                    Ok(Self::Identifier(n.to_string()))
                }
                _ => Err(mismatch()),
            },
        }
    }

    /// Infer a value from a JSON literal with no declared kind.
    ///
    /// Strings stay strings, integral numbers become integers, booleans stay
    /// booleans. Everything else has no field representation.
    #[must_use]
    pub fn infer(literal: &Value) -> Option<Self> {
        match literal {
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n.as_i64().map(Self::Integer),
            Value::Bool(b) => Some(Self::Bool(*b)),
            _ => None,
        }
    }

    /// Re-express this value as `kind`, if it has a faithful representation.
    #[must_use]
    pub fn coerce_to(&self, kind: FieldKind) -> Option<Self> {
        if self.kind() == kind {
            return Some(self.clone());
        }
        Self::from_json(kind, &self.to_json()).ok()
    }

    /// The stored JSON encoding of this value.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) | Self::Identifier(s) => Value::String(s.clone()),
            Self::Integer(n) => Value::from(*n),
            Self::Bool(b) => Value::Bool(*b),
            Self::Timestamp(ts) => Value::String(format_timestamp(ts)),
        }
    }

    /// Text form, used for string comparisons against stored columns.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Identifier(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) | Self::Identifier(s) => f.write_str(s),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Timestamp(ts) => f.write_str(&format_timestamp(ts)),
        }
    }
}

/// Canonical timestamp encoding: RFC 3339, microsecond precision, `Z`.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty() && !s.chars().any(char::is_whitespace)
}

fn describe(literal: &Value) -> String {
    match literal {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("bool {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string \"{s}\""),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}
