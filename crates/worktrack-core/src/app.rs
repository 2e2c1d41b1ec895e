//! Transactional application facade.
//!
//! [`Service`] is the long-lived entry point: it owns the transaction
//! provider, the shared [`TypeCache`] and the configuration. Each call to
//! [`Service::transactional`] hands the closure an [`Application`] bound to
//! one open transaction, from which the repositories are reached.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;

use crate::cancel::CancellationToken;
use crate::config::ServiceConfig;
use crate::error::AccessError;
use crate::iteration::IterationRepository;
use crate::model::WorkItemType;
use crate::repository::WorkItemRepository;
use crate::store::{Store, TransactionProvider};
use crate::type_cache::TypeCache;

/// Type cache changes made by one transaction, held back until it commits.
///
/// Schemas read or published inside the transaction are staged here and
/// only reach the shared [`TypeCache`] after a commit. A committed
/// migration clears the shared cache instead.
#[derive(Debug, Default)]
pub struct CacheEffects {
    staged: RefCell<HashMap<String, Arc<WorkItemType>>>,
    migrated: Cell<bool>,
}

impl CacheEffects {
    pub(crate) fn stage(&self, wit: WorkItemType) -> Arc<WorkItemType> {
        let wit = Arc::new(wit);
        self.staged
            .borrow_mut()
            .insert(wit.name.clone(), Arc::clone(&wit));
        wit
    }

    pub(crate) fn staged(&self, name: &str) -> Option<Arc<WorkItemType>> {
        self.staged.borrow().get(name).cloned()
    }

    /// Staged schemas predate the migration, so they are dropped.
    pub(crate) fn mark_migrated(&self) {
        self.migrated.set(true);
        self.staged.borrow_mut().clear();
    }

    #[must_use]
    pub fn migrated(&self) -> bool {
        self.migrated.get()
    }

    fn into_staged(self) -> Vec<Arc<WorkItemType>> {
        self.staged.into_inner().into_values().collect()
    }
}

/// Repositories bound to one open transaction.
pub struct Application<'a> {
    store: &'a dyn Store,
    cache: &'a TypeCache,
    config: &'a ServiceConfig,
    cancel: &'a CancellationToken,
    effects: &'a CacheEffects,
}

impl<'a> Application<'a> {
    /// Bind repositories to `store`. Callers normally go through
    /// [`Service::transactional`] instead.
    pub const fn new(
        store: &'a dyn Store,
        cache: &'a TypeCache,
        config: &'a ServiceConfig,
        cancel: &'a CancellationToken,
        effects: &'a CacheEffects,
    ) -> Self {
        Self {
            store,
            cache,
            config,
            cancel,
            effects,
        }
    }

    #[must_use]
    pub const fn work_items(&self) -> WorkItemRepository<'a> {
        WorkItemRepository::new(
            self.store,
            self.cache,
            &self.config.paging,
            self.cancel,
            self.effects,
        )
    }

    #[must_use]
    pub const fn iterations(&self) -> IterationRepository<'a> {
        IterationRepository::new(self.store, self.cancel)
    }

    #[must_use]
    pub const fn config(&self) -> &'a ServiceConfig {
        self.config
    }
}

/// Long-lived access layer over a [`TransactionProvider`].
#[derive(Debug)]
pub struct Service<P> {
    provider: P,
    cache: Arc<TypeCache>,
    config: ServiceConfig,
}

impl<P: TransactionProvider> Service<P> {
    pub const fn new(provider: P, cache: Arc<TypeCache>, config: ServiceConfig) -> Self {
        Self {
            provider,
            cache,
            config,
        }
    }

    /// Run `f` as one unit of work.
    ///
    /// The transaction commits only if `f` succeeds and `cancel` was not
    /// triggered. Types it loaded or published are added to the shared
    /// cache after the commit; a committed type migration clears the cache
    /// instead. A rollback leaves the cache untouched.
    ///
    /// # Errors
    ///
    /// Whatever `f` or the provider returns.
    pub fn transactional<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T, AccessError>
    where
        F: FnOnce(&Application<'_>) -> Result<T, AccessError>,
    {
        let generation = self.cache.generation();
        let effects = CacheEffects::default();
        let result = self.provider.transactional(cancel, |store| {
            f(&Application::new(store, &self.cache, &self.config, cancel, &effects))
        });

        let migrated = effects.migrated();
        let staged = effects.into_staged();
        match &result {
            Ok(_) if migrated => self.cache.clear(),
            Ok(_) if !staged.is_empty() => {
                let written = self.cache.fill(generation, staged);
                tracing::debug!(written, "cached committed work item types");
            }
            Err(err) if !staged.is_empty() => {
                tracing::debug!(error = %err, discarded = staged.len(), "rolled back, discarding staged types");
            }
            _ => {}
        }
        result
    }

    #[must_use]
    pub const fn cache(&self) -> &Arc<TypeCache> {
        &self.cache
    }

    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }
}
