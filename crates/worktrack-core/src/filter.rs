//! Filter expressions over work item fields.
//!
//! The textual form is a JSON object mapping field names to literals, which
//! reads as an AND of equalities:
//!
//! ```text
//! {"system.state": "open", "system.assignee": "alice"}
//! ```
//!
//! `"$and"` and `"$or"` keys take a non-empty array of nested filter
//! objects. Empty text and `{}` both match every record.
//!
//! An expression is plain data with a pure [`FilterExpression::matches`]
//! evaluator. Backing stores translate it into their own query language.

use serde_json::{Map, Value};

use crate::error::AccessError;
use crate::model::{FieldCatalog, FieldValue, WorkItem};

const AND_KEY: &str = "$and";
const OR_KEY: &str = "$or";

/// A predicate tree over work item fields.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FilterExpression {
    /// Matches every record.
    #[default]
    All,
    /// The field is present and equal to `value`.
    Equals { field: String, value: FieldValue },
    /// Every child matches.
    And(Vec<FilterExpression>),
    /// At least one child matches.
    Or(Vec<FilterExpression>),
}

impl FilterExpression {
    /// Parse filter text without any knowledge of declared field kinds.
    ///
    /// # Errors
    ///
    /// [`AccessError::MalformedFilter`] when the text is not a filter object.
    pub fn parse(text: &str) -> Result<Self, AccessError> {
        Self::parse_with(text, &FieldCatalog::default())
    }

    /// Parse filter text, converting literals of known fields to their
    /// declared kind.
    ///
    /// # Errors
    ///
    /// [`AccessError::MalformedFilter`] when the text is not a filter object,
    /// [`AccessError::FieldConversion`] when a literal cannot convert to the
    /// declared kind of its field.
    pub fn parse_with(text: &str, catalog: &FieldCatalog) -> Result<Self, AccessError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self::All);
        }
        let value: Value = serde_json::from_str(trimmed)
            .map_err(|e| AccessError::MalformedFilter(format!("invalid JSON: {e}")))?;
        match value {
            Value::Object(map) => parse_object(&map, catalog),
            other => Err(AccessError::MalformedFilter(format!(
                "expected a JSON object, got {}",
                json_type(&other)
            ))),
        }
    }

    /// Build an AND of equalities from already-typed pairs.
    #[must_use]
    pub fn equalities(pairs: impl IntoIterator<Item = (String, FieldValue)>) -> Self {
        let leaves: Vec<_> = pairs
            .into_iter()
            .map(|(field, value)| Self::Equals { field, value })
            .collect();
        simplify_and(leaves)
    }

    /// Evaluate against a record.
    ///
    /// A leaf whose field is absent from the record is false.
    #[must_use]
    pub fn matches(&self, item: &WorkItem) -> bool {
        match self {
            Self::All => true,
            Self::Equals { field, value } => item.field(field).is_some_and(|stored| {
                value
                    .coerce_to(stored.kind())
                    .is_some_and(|expected| &expected == stored)
            }),
            Self::And(children) => children.iter().all(|c| c.matches(item)),
            Self::Or(children) => children.iter().any(|c| c.matches(item)),
        }
    }

    #[must_use]
    pub const fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Re-serialize to the textual JSON form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::All => Value::Object(Map::new()),
            Self::Equals { field, value } => {
                let mut map = Map::new();
                map.insert(field.clone(), value.to_json());
                Value::Object(map)
            }
            Self::And(children) => {
                let mut flat = Map::new();
                let mut nested = Vec::new();
                for child in children {
                    match child {
                        Self::Equals { field, value } if !flat.contains_key(field) => {
                            flat.insert(field.clone(), value.to_json());
                        }
                        other => nested.push(other.to_json()),
                    }
                }
                if !nested.is_empty() {
                    flat.insert(AND_KEY.to_string(), Value::Array(nested));
                }
                Value::Object(flat)
            }
            Self::Or(children) => {
                let mut map = Map::new();
                map.insert(
                    OR_KEY.to_string(),
                    Value::Array(children.iter().map(Self::to_json).collect()),
                );
                Value::Object(map)
            }
        }
    }
}

impl std::fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn parse_object(map: &Map<String, Value>, catalog: &FieldCatalog) -> Result<FilterExpression, AccessError> {
    let mut children = Vec::with_capacity(map.len());
    for (key, literal) in map {
        match key.as_str() {
            AND_KEY => children.push(simplify_and(parse_group(key, literal, catalog)?)),
            OR_KEY => {
                let mut group = parse_group(key, literal, catalog)?;
                children.push(if group.len() == 1 {
                    group.remove(0)
                } else {
                    FilterExpression::Or(group)
                });
            }
            field => children.push(parse_leaf(field, literal, catalog)?),
        }
    }
    Ok(simplify_and(children))
}

fn parse_group(
    key: &str,
    literal: &Value,
    catalog: &FieldCatalog,
) -> Result<Vec<FilterExpression>, AccessError> {
    let Value::Array(items) = literal else {
        return Err(AccessError::MalformedFilter(format!(
            "'{key}' takes an array of filter objects, got {}",
            json_type(literal)
        )));
    };
    if items.is_empty() {
        return Err(AccessError::MalformedFilter(format!(
            "'{key}' needs at least one filter object"
        )));
    }
    items
        .iter()
        .map(|item| match item {
            Value::Object(map) => parse_object(map, catalog),
            other => Err(AccessError::MalformedFilter(format!(
                "'{key}' entries must be objects, got {}",
                json_type(other)
            ))),
        })
        .collect()
}

fn parse_leaf(field: &str, literal: &Value, catalog: &FieldCatalog) -> Result<FilterExpression, AccessError> {
    if field.is_empty() {
        return Err(AccessError::MalformedFilter("empty field name".to_string()));
    }
    let value = match catalog.kind_of(field) {
        Some(kind) if is_scalar(literal) => {
            FieldValue::from_json(kind, literal).map_err(|reason| AccessError::field(field, reason))?
        }
        _ => FieldValue::infer(literal).ok_or_else(|| {
            AccessError::MalformedFilter(format!(
                "value for '{field}' must be a string, integer or bool, got {}",
                json_type(literal)
            ))
        })?,
    };
    Ok(FilterExpression::Equals {
        field: field.to_string(),
        value,
    })
}

fn simplify_and(mut children: Vec<FilterExpression>) -> FilterExpression {
    children.retain(|c| !c.is_all());
    match children.len() {
        0 => FilterExpression::All,
        1 => children.remove(0),
        _ => FilterExpression::And(children),
    }
}

const fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
