//! In-process store for tests and embedding.
//!
//! A transaction clones the committed state, works on the clone and swaps
//! it back in on commit. The state mutex is held for the whole transaction,
//! so transactions are serialized just like the SQLite provider's.

use anyhow::Result;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use super::{Store, TransactionProvider};
use crate::cancel::CancellationToken;
use crate::error::AccessError;
use crate::filter::FilterExpression;
use crate::model::item_type::{SYSTEM_ITERATION, SYSTEM_STATE, STATE_CLOSED, system_types};
use crate::model::{
    FieldValue, ItemId, Iteration, IterationCounts, IterationId, WorkItem, WorkItemType,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    types: BTreeMap<String, WorkItemType>,
    items: BTreeMap<i64, WorkItem>,
    iterations: BTreeMap<i64, Iteration>,
    last_item_row: i64,
    last_iteration_row: i64,
}

/// Map-backed [`TransactionProvider`], seeded with the system types.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let types = system_types()
            .into_iter()
            .map(|wit| (wit.name.clone(), wit))
            .collect();
        Self {
            state: Mutex::new(MemoryState {
                types,
                ..MemoryState::default()
            }),
        }
    }
}

impl TransactionProvider for MemoryStore {
    fn transactional<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T, AccessError>
    where
        F: FnOnce(&dyn Store) -> Result<T, AccessError>,
    {
        cancel.check()?;
        let mut committed = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = MemoryTx {
            state: RefCell::new(committed.clone()),
        };

        match f(&tx) {
            Ok(value) if !cancel.is_cancelled() => {
                *committed = tx.state.into_inner();
                Ok(value)
            }
            Ok(_) => {
                tracing::warn!("transaction cancelled before commit, rolled back");
                Err(AccessError::Cancelled)
            }
            Err(err) => {
                tracing::debug!(error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }
}

struct MemoryTx {
    state: RefCell<MemoryState>,
}

impl MemoryTx {
    fn matching(&self, filter: &FilterExpression) -> Vec<WorkItem> {
        self.state
            .borrow()
            .items
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect()
    }
}

impl Store for MemoryTx {
    fn get_type(&self, name: &str) -> Result<Option<WorkItemType>> {
        Ok(self.state.borrow().types.get(name).cloned())
    }

    fn list_types(&self) -> Result<Vec<WorkItemType>> {
        Ok(self.state.borrow().types.values().cloned().collect())
    }

    fn insert_type(&self, wit: &WorkItemType) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        if state.types.contains_key(&wit.name) {
            return Ok(false);
        }
        state.types.insert(wit.name.clone(), wit.clone());
        Ok(true)
    }

    fn replace_types(&self, types: &[WorkItemType]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        for wit in types {
            state.types.insert(wit.name.clone(), wit.clone());
        }
        Ok(())
    }

    fn get_item(&self, row: i64) -> Result<Option<WorkItem>> {
        Ok(self.state.borrow().items.get(&row).cloned())
    }

    fn count_items(&self, filter: &FilterExpression) -> Result<u64> {
        Ok(u64::try_from(self.matching(filter).len()).unwrap_or(u64::MAX))
    }

    fn fetch_items(&self, filter: &FilterExpression, offset: u64, limit: u64) -> Result<Vec<WorkItem>> {
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(self.matching(filter).into_iter().skip(skip).take(take).collect())
    }

    fn insert_item(
        &self,
        type_name: &str,
        version: u64,
        fields: &BTreeMap<String, FieldValue>,
    ) -> Result<WorkItem> {
        let mut state = self.state.borrow_mut();
        state.last_item_row += 1;
        let row = state.last_item_row;
        let item = WorkItem {
            id: ItemId::from_row(row),
            type_name: type_name.to_string(),
            version,
            fields: fields.clone(),
        };
        state.items.insert(row, item.clone());
        Ok(item)
    }

    fn update_item(&self, item: &WorkItem, expected_version: u64) -> Result<bool> {
        let Some(row) = item.id.row() else {
            return Ok(false);
        };
        let mut state = self.state.borrow_mut();
        match state.items.get_mut(&row) {
            Some(stored) if stored.version == expected_version => {
                stored.version = item.version;
                stored.fields = item.fields.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_item(&self, row: i64) -> Result<bool> {
        Ok(self.state.borrow_mut().items.remove(&row).is_some())
    }

    fn get_iteration(&self, row: i64) -> Result<Option<Iteration>> {
        Ok(self.state.borrow().iterations.get(&row).cloned())
    }

    fn insert_iteration(&self, iteration: &Iteration) -> Result<Iteration> {
        let mut state = self.state.borrow_mut();
        state.last_iteration_row += 1;
        let row = state.last_iteration_row;
        let stored = Iteration {
            id: IterationId::from_row(row),
            ..iteration.clone()
        };
        state.iterations.insert(row, stored.clone());
        Ok(stored)
    }

    fn update_iteration(&self, iteration: &Iteration) -> Result<bool> {
        let Some(row) = iteration.id.row() else {
            return Ok(false);
        };
        let mut state = self.state.borrow_mut();
        match state.iterations.get_mut(&row) {
            Some(stored) => {
                stored.name.clone_from(&iteration.name);
                stored.description.clone_from(&iteration.description);
                stored.start_at = iteration.start_at;
                stored.end_at = iteration.end_at;
                stored.state = iteration.state;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_iterations(&self, space_id: &str) -> Result<Vec<Iteration>> {
        Ok(self
            .state
            .borrow()
            .iterations
            .values()
            .filter(|it| it.space_id == space_id)
            .cloned()
            .collect())
    }

    fn iteration_counts(&self, space_id: &str) -> Result<HashMap<IterationId, IterationCounts>> {
        let state = self.state.borrow();
        let mut counts: HashMap<IterationId, IterationCounts> = state
            .iterations
            .values()
            .filter(|it| it.space_id == space_id)
            .map(|it| (it.id.clone(), IterationCounts::default()))
            .collect();
        for item in state.items.values() {
            let Some(FieldValue::Identifier(target)) = item.field(SYSTEM_ITERATION) else {
                continue;
            };
            if let Some(entry) = counts.get_mut(&IterationId::new(target.as_str())) {
                entry.total += 1;
                if item.field(SYSTEM_STATE).and_then(FieldValue::as_text) == Some(STATE_CLOSED) {
                    entry.closed += 1;
                }
            }
        }
        Ok(counts)
    }
}
