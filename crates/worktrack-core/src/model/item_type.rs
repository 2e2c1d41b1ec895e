//! Work item type schemas.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::field::{FieldKind, FieldValue};
use crate::error::AccessError;

pub const SYSTEM_TITLE: &str = "system.title";
pub const SYSTEM_STATE: &str = "system.state";
pub const SYSTEM_DESCRIPTION: &str = "system.description";
pub const SYSTEM_CREATOR: &str = "system.creator";
pub const SYSTEM_ASSIGNEE: &str = "system.assignee";
pub const SYSTEM_ITERATION: &str = "system.iteration";
pub const SYSTEM_REMOTE_ITEM_ID: &str = "system.remote_item_id";

pub const SYSTEM_USERSTORY: &str = "system.userstory";
pub const SYSTEM_BUG: &str = "system.bug";
pub const SYSTEM_FEATURE: &str = "system.feature";

pub const STATE_NEW: &str = "new";
pub const STATE_OPEN: &str = "open";
pub const STATE_IN_PROGRESS: &str = "in progress";
pub const STATE_RESOLVED: &str = "resolved";
pub const STATE_CLOSED: &str = "closed";

/// One declared field of a work item type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, kind: FieldKind, required: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            required,
        }
    }
}

/// A named schema for work items. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItemType {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
}

impl WorkItemType {
    pub fn new(name: impl Into<String>, fields: Vec<FieldDefinition>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Look up a declared field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check the schema itself: a name, at least one field, unique field
    /// names.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::BadParameter`] describing the first problem.
    pub fn validate_schema(&self) -> Result<(), AccessError> {
        if self.name.trim().is_empty() {
            return Err(AccessError::bad_parameter("name", "type name must not be empty"));
        }
        if self.fields.is_empty() {
            return Err(AccessError::bad_parameter(
                "fields",
                format!("type '{}' declares no fields", self.name),
            ));
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(AccessError::bad_parameter("fields", "field name must not be empty"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(AccessError::bad_parameter(
                    "fields",
                    format!("duplicate field '{}'", field.name),
                ));
            }
        }
        Ok(())
    }

    /// Convert one raw literal for a declared field.
    ///
    /// # Errors
    ///
    /// [`AccessError::FieldConversion`] when the field is not declared by
    /// this type or the literal does not fit its kind.
    pub fn convert_value(&self, name: &str, literal: &Value) -> Result<FieldValue, AccessError> {
        let def = self.field(name).ok_or_else(|| {
            AccessError::field(name, format!("not a field of type '{}'", self.name))
        })?;
        FieldValue::from_json(def.kind, literal).map_err(|reason| AccessError::field(name, reason))
    }

    /// Convert a full payload for a new record and check required fields.
    ///
    /// `null` literals are treated as absent.
    ///
    /// # Errors
    ///
    /// [`AccessError::FieldConversion`] for unknown fields or bad literals,
    /// [`AccessError::BadParameter`] for a missing required field.
    pub fn convert_fields(
        &self,
        payload: &Map<String, Value>,
    ) -> Result<BTreeMap<String, FieldValue>, AccessError> {
        let mut fields = BTreeMap::new();
        for (name, literal) in payload {
            if literal.is_null() {
                if self.field(name).is_none() {
                    return Err(AccessError::field(
                        name.as_str(),
                        format!("not a field of type '{}'", self.name),
                    ));
                }
                continue;
            }
            fields.insert(name.clone(), self.convert_value(name, literal)?);
        }
        self.check_required(&fields)?;
        Ok(fields)
    }

    /// Verify every required field is present.
    ///
    /// # Errors
    ///
    /// [`AccessError::BadParameter`] naming the first missing field.
    pub fn check_required(&self, fields: &BTreeMap<String, FieldValue>) -> Result<(), AccessError> {
        match self
            .fields
            .iter()
            .find(|def| def.required && !fields.contains_key(&def.name))
        {
            Some(missing) => Err(AccessError::bad_parameter(
                missing.name.as_str(),
                format!("required by type '{}'", self.name),
            )),
            None => Ok(()),
        }
    }
}

/// Field name to declared kind, across every known type.
///
/// A field declared with different kinds by different types maps to no
/// kind, so literals for it are left unconverted.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    kinds: HashMap<String, Option<FieldKind>>,
}

impl FieldCatalog {
    pub fn from_types<'a>(types: impl IntoIterator<Item = &'a WorkItemType>) -> Self {
        let mut kinds: HashMap<String, Option<FieldKind>> = HashMap::new();
        for wit in types {
            for def in &wit.fields {
                kinds
                    .entry(def.name.clone())
                    .and_modify(|k| {
                        if *k != Some(def.kind) {
                            *k = None;
                        }
                    })
                    .or_insert(Some(def.kind));
            }
        }
        Self { kinds }
    }

    /// The unambiguous kind of `field`, if any type declares it.
    #[must_use]
    pub fn kind_of(&self, field: &str) -> Option<FieldKind> {
        self.kinds.get(field).copied().flatten()
    }
}

/// Built-in types seeded into every new store.
#[must_use]
pub fn system_types() -> Vec<WorkItemType> {
    [SYSTEM_USERSTORY, SYSTEM_BUG, SYSTEM_FEATURE]
        .into_iter()
        .map(|name| WorkItemType::new(name, system_fields()))
        .collect()
}

fn system_fields() -> Vec<FieldDefinition> {
    vec![
        FieldDefinition::new(SYSTEM_TITLE, FieldKind::String, true),
        FieldDefinition::new(SYSTEM_STATE, FieldKind::String, true),
        FieldDefinition::new(SYSTEM_DESCRIPTION, FieldKind::String, false),
        FieldDefinition::new(SYSTEM_CREATOR, FieldKind::Identifier, true),
        FieldDefinition::new(SYSTEM_ASSIGNEE, FieldKind::Identifier, false),
        FieldDefinition::new(SYSTEM_ITERATION, FieldKind::Identifier, false),
        FieldDefinition::new(SYSTEM_REMOTE_ITEM_ID, FieldKind::String, false),
    ]
}
