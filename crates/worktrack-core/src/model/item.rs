use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::{fmt, str::FromStr};

use super::field::FieldValue;

/// Version assigned to every newly created work item.
pub const INITIAL_VERSION: u64 = 0;

/// Opaque, stable identifier of a work item.
///
/// Backing stores assign decimal row ids; text that is not a valid row id
/// simply never resolves to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn from_row(row: i64) -> Self {
        Self(row.to_string())
    }

    /// The numeric row id, if this id names one.
    #[must_use]
    pub fn row(&self) -> Option<i64> {
        self.0.parse::<i64>().ok().filter(|row| *row > 0)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ItemId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.trim()))
    }
}

/// A versioned work item with a dynamic, schema-checked field set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub id: ItemId,
    pub type_name: String,
    pub version: u64,
    pub fields: BTreeMap<String, FieldValue>,
}

impl WorkItem {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Fields in their stored JSON encoding.
    #[must_use]
    pub fn fields_json(&self) -> Map<String, Value> {
        self.fields
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

/// A caller's request to change a work item.
///
/// `version` is the version the caller last read; `fields` is a partial
/// payload merged over the stored fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkItemUpdate {
    pub id: ItemId,
    pub version: u64,
    pub fields: Map<String, Value>,
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_ids_must_be_positive_decimals() {
        assert_eq!(ItemId::from_row(42).row(), Some(42));
        assert_eq!(ItemId::new("0").row(), None);
        assert_eq!(ItemId::new("-3").row(), None);
        assert_eq!(ItemId::new("abc").row(), None);
    }

    #[test]
    fn fields_json_uses_stored_encoding() {
        let mut fields = BTreeMap::new();
        fields.insert("n".to_string(), FieldValue::Integer(3));
        fields.insert("who".to_string(), FieldValue::Identifier("bob".into()));
        let item = WorkItem {
            id: ItemId::from_row(1),
            type_name: "t".into(),
            version: INITIAL_VERSION,
            fields,
        };
        let json = item.fields_json();
        assert_eq!(json.get("n"), Some(&Value::from(3)));
        assert_eq!(json.get("who"), Some(&Value::from("bob")));
    }
}
