//! Backing-store seam.
//!
//! A [`Store`] is the view of storage inside one transaction. Repositories
//! only ever see `&dyn Store`; a [`TransactionProvider`] decides how that
//! view is opened, committed and rolled back.
//!
//! Two providers ship with the crate:
//! - [`sqlite::Database`]: a single SQLite connection behind a mutex, with
//!   filters pushed down to `json_extract` predicates
//! - [`memory::MemoryStore`]: a snapshot-and-write-back map store that
//!   evaluates filters with [`FilterExpression::matches`]

pub mod memory;
pub mod migrations;
pub mod schema;
pub mod sqlite;

use anyhow::Result;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::cancel::CancellationToken;
use crate::error::AccessError;
use crate::filter::FilterExpression;
use crate::model::{FieldValue, Iteration, IterationCounts, IterationId, WorkItem, WorkItemType};

pub use memory::MemoryStore;
pub use sqlite::Database;

/// Storage operations available inside a transaction.
///
/// Row ids are the numeric form of [`crate::model::ItemId`] and
/// [`IterationId`]; callers resolve text ids before reaching the store.
pub trait Store {
    fn get_type(&self, name: &str) -> Result<Option<WorkItemType>>;
    fn list_types(&self) -> Result<Vec<WorkItemType>>;
    /// Insert a new type. Returns `false` when the name is already taken.
    fn insert_type(&self, wit: &WorkItemType) -> Result<bool>;
    /// Insert or overwrite each type by name.
    fn replace_types(&self, types: &[WorkItemType]) -> Result<()>;

    fn get_item(&self, row: i64) -> Result<Option<WorkItem>>;
    fn count_items(&self, filter: &FilterExpression) -> Result<u64>;
    /// Matching items ordered by id ascending.
    fn fetch_items(&self, filter: &FilterExpression, offset: u64, limit: u64) -> Result<Vec<WorkItem>>;
    fn insert_item(
        &self,
        type_name: &str,
        version: u64,
        fields: &BTreeMap<String, FieldValue>,
    ) -> Result<WorkItem>;
    /// Write `item` only if the stored version still equals
    /// `expected_version`. Returns whether a row was updated.
    fn update_item(&self, item: &WorkItem, expected_version: u64) -> Result<bool>;
    fn delete_item(&self, row: i64) -> Result<bool>;

    fn get_iteration(&self, row: i64) -> Result<Option<Iteration>>;
    fn insert_iteration(&self, iteration: &Iteration) -> Result<Iteration>;
    fn update_iteration(&self, iteration: &Iteration) -> Result<bool>;
    /// Iterations of a space ordered by id ascending.
    fn list_iterations(&self, space_id: &str) -> Result<Vec<Iteration>>;
    /// Work item totals for every iteration of a space.
    fn iteration_counts(&self, space_id: &str) -> Result<HashMap<IterationId, IterationCounts>>;
}

/// Runs a unit of work against a [`Store`] and owns commit/rollback.
pub trait TransactionProvider {
    /// Run `f` in one transaction.
    ///
    /// Commits iff `f` returns `Ok` and `cancel` has not been triggered;
    /// otherwise every write made by `f` is rolled back.
    ///
    /// # Errors
    ///
    /// Propagates the error of `f`, [`AccessError::Cancelled`] when the
    /// token fired, or [`AccessError::Internal`] when the store fails to
    /// begin or commit.
    fn transactional<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T, AccessError>
    where
        F: FnOnce(&dyn Store) -> Result<T, AccessError>;
}

/// Rebuild typed fields from their stored JSON encoding.
///
/// Declared fields decode to their kind. A value the current schema no
/// longer accepts keeps its natural kind rather than being dropped.
pub(crate) fn decode_fields(
    wit: Option<&WorkItemType>,
    stored: &Map<String, Value>,
) -> BTreeMap<String, FieldValue> {
    stored
        .iter()
        .filter_map(|(name, literal)| {
            let declared = wit
                .and_then(|t| t.field(name))
                .and_then(|def| FieldValue::from_json(def.kind, literal).ok());
            let value = declared.or_else(|| FieldValue::infer(literal));
            if value.is_none() {
                tracing::warn!(field = %name, "dropping undecodable stored field");
            }
            value.map(|v| (name.clone(), v))
        })
        .collect()
}
