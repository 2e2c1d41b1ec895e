//! Iteration repository.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::cancel::CancellationToken;
use crate::error::AccessError;
use crate::model::{Iteration, IterationCounts, IterationId, IterationState};
use crate::store::Store;

/// Iteration operations bound to one transaction.
pub struct IterationRepository<'a> {
    store: &'a dyn Store,
    cancel: &'a CancellationToken,
}

impl<'a> IterationRepository<'a> {
    pub(crate) const fn new(store: &'a dyn Store, cancel: &'a CancellationToken) -> Self {
        Self { store, cancel }
    }

    /// Create a top-level or child iteration.
    ///
    /// A child always lands in its parent's space.
    ///
    /// # Errors
    ///
    /// [`AccessError::BadParameter`] for an empty name or space, an end
    /// before the start, or a second started iteration in the space;
    /// [`AccessError::NotFound`] for a missing parent.
    pub fn create(&self, mut iteration: Iteration) -> Result<Iteration, AccessError> {
        self.cancel.check()?;
        if let Some(parent_id) = iteration.parent_id.clone() {
            let parent = self.load(&parent_id)?;
            iteration.space_id = parent.space_id;
        }
        validate(&iteration)?;
        if iteration.state == IterationState::Start {
            self.can_start(&iteration)?;
        }
        let created = self.store.insert_iteration(&iteration)?;
        tracing::info!(id = %created.id, space = %created.space_id, name = %created.name, "created iteration");
        Ok(created)
    }

    /// Create an iteration under `parent_id`.
    ///
    /// # Errors
    ///
    /// See [`Self::create`].
    pub fn create_child(
        &self,
        parent_id: &IterationId,
        name: &str,
        start_at: Option<DateTime<Utc>>,
        end_at: Option<DateTime<Utc>>,
    ) -> Result<Iteration, AccessError> {
        self.create(Iteration {
            parent_id: Some(parent_id.clone()),
            name: name.to_string(),
            start_at,
            end_at,
            ..Iteration::default()
        })
    }

    /// # Errors
    ///
    /// [`AccessError::NotFound`] when no iteration has this id.
    pub fn load(&self, id: &IterationId) -> Result<Iteration, AccessError> {
        self.cancel.check()?;
        let row = id
            .row()
            .ok_or_else(|| AccessError::iteration_not_found(id.as_str()))?;
        self.store
            .get_iteration(row)?
            .ok_or_else(|| AccessError::iteration_not_found(id.as_str()))
    }

    /// Iterations of a space, ordered by id.
    ///
    /// # Errors
    ///
    /// [`AccessError::Internal`] on store failures.
    pub fn list_for_space(&self, space_id: &str) -> Result<Vec<Iteration>, AccessError> {
        self.cancel.check()?;
        Ok(self.store.list_iterations(space_id)?)
    }

    /// Persist name, description, dates and state. Space and parent are
    /// fixed at creation.
    ///
    /// # Errors
    ///
    /// [`AccessError::NotFound`] for an unknown id,
    /// [`AccessError::BadParameter`] for invalid attributes or a state
    /// change to `start` while another iteration of the space is started.
    pub fn save(&self, iteration: &Iteration) -> Result<Iteration, AccessError> {
        let stored = self.load(&iteration.id)?;
        let next = Iteration {
            id: stored.id,
            space_id: stored.space_id,
            parent_id: stored.parent_id,
            ..iteration.clone()
        };
        validate(&next)?;
        if next.state == IterationState::Start && stored.state != IterationState::Start {
            self.can_start(&next)?;
        }
        self.cancel.check()?;
        if !self.store.update_iteration(&next)? {
            return Err(AccessError::iteration_not_found(next.id.as_str()));
        }
        tracing::info!(id = %next.id, state = %next.state, "saved iteration");
        Ok(next)
    }

    /// Check that `iteration` may move to `start`: no other iteration of
    /// its space may already be started.
    ///
    /// # Errors
    ///
    /// [`AccessError::BadParameter`] naming the started iteration.
    pub fn can_start(&self, iteration: &Iteration) -> Result<(), AccessError> {
        self.cancel.check()?;
        let started = self
            .store
            .list_iterations(&iteration.space_id)?
            .into_iter()
            .find(|other| other.id != iteration.id && other.state == IterationState::Start);
        match started {
            Some(other) => Err(AccessError::bad_parameter(
                "state",
                format!(
                    "iteration '{}' ({}) is already started in space '{}'",
                    other.name, other.id, iteration.space_id
                ),
            )),
            None => Ok(()),
        }
    }

    /// Work item totals per iteration of a space. Every iteration of the
    /// space has an entry, zero when nothing references it.
    ///
    /// # Errors
    ///
    /// [`AccessError::Internal`] on store failures.
    pub fn item_counts(&self, space_id: &str) -> Result<HashMap<IterationId, IterationCounts>, AccessError> {
        self.cancel.check()?;
        Ok(self.store.iteration_counts(space_id)?)
    }
}

fn validate(iteration: &Iteration) -> Result<(), AccessError> {
    if iteration.name.trim().is_empty() {
        return Err(AccessError::bad_parameter("name", "iteration name must not be empty"));
    }
    if iteration.space_id.trim().is_empty() {
        return Err(AccessError::bad_parameter("space_id", "iteration needs a space"));
    }
    if let (Some(start), Some(end)) = (iteration.start_at, iteration.end_at) {
        if end < start {
            return Err(AccessError::bad_parameter("end_at", "iteration ends before it starts"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TransactionProvider};

    fn run<T>(
        store: &MemoryStore,
        f: impl FnOnce(&IterationRepository<'_>) -> Result<T, AccessError>,
    ) -> Result<T, AccessError> {
        let cancel = CancellationToken::new();
        store.transactional(&cancel, |s| f(&IterationRepository::new(s, &cancel)))
    }

    fn sprint(space: &str, name: &str) -> Iteration {
        Iteration {
            space_id: space.into(),
            name: name.into(),
            ..Iteration::default()
        }
    }

    #[test]
    fn child_inherits_parent_space() {
        let store = MemoryStore::new();
        let child = run(&store, |repo| {
            let parent = repo.create(sprint("space-a", "Q1"))?;
            repo.create_child(&parent.id, "Sprint 1", None, None)
        })
        .expect("create child");
        assert_eq!(child.space_id, "space-a");
        assert!(child.parent_id.is_some());
    }

    #[test]
    fn missing_parent_is_not_found() {
        let store = MemoryStore::new();
        let err = run(&store, |repo| {
            repo.create_child(&IterationId::new("99"), "orphan", None, None)
        })
        .unwrap_err();
        assert!(matches!(err, AccessError::NotFound { .. }));
    }

    #[test]
    fn empty_name_is_rejected() {
        let store = MemoryStore::new();
        let err = run(&store, |repo| repo.create(sprint("space-a", "  "))).unwrap_err();
        assert!(matches!(err, AccessError::BadParameter { ref parameter, .. } if parameter == "name"));
    }

    #[test]
    fn only_one_started_iteration_per_space() {
        let store = MemoryStore::new();
        let err = run(&store, |repo| {
            let mut a = repo.create(sprint("space-a", "A"))?;
            let mut b = repo.create(sprint("space-a", "B"))?;
            let mut other = repo.create(sprint("space-b", "C"))?;
            a.state = IterationState::Start;
            repo.save(&a)?;
            other.state = IterationState::Start;
            repo.save(&other)?;
            b.state = IterationState::Start;
            repo.save(&b)
        })
        .unwrap_err();
        assert!(matches!(err, AccessError::BadParameter { ref parameter, .. } if parameter == "state"));
    }
}
