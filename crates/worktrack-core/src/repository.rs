//! Work item repository: create, load, list, save and delete on top of a
//! transactional [`Store`].

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::app::CacheEffects;
use crate::cancel::CancellationToken;
use crate::config::PagingConfig;
use crate::error::AccessError;
use crate::filter::FilterExpression;
use crate::identity::Identity;
use crate::model::item_type::SYSTEM_CREATOR;
use crate::model::{FieldCatalog, INITIAL_VERSION, ItemId, WorkItem, WorkItemType, WorkItemUpdate};
use crate::page::{PageRequest, PageWindow};
use crate::store::Store;
use crate::type_cache::TypeCache;

/// One page of a filtered list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItemPage {
    pub items: Vec<WorkItem>,
    /// Number of records matching the filter, across all pages.
    pub total: u64,
    pub request: PageRequest,
    pub window: PageWindow,
}

/// Work item operations bound to one transaction.
pub struct WorkItemRepository<'a> {
    store: &'a dyn Store,
    cache: &'a TypeCache,
    paging: &'a PagingConfig,
    cancel: &'a CancellationToken,
    effects: &'a CacheEffects,
}

impl<'a> WorkItemRepository<'a> {
    pub(crate) const fn new(
        store: &'a dyn Store,
        cache: &'a TypeCache,
        paging: &'a PagingConfig,
        cancel: &'a CancellationToken,
        effects: &'a CacheEffects,
    ) -> Self {
        Self {
            store,
            cache,
            paging,
            cancel,
            effects,
        }
    }

    /// Resolve a type through this transaction's staged schemas, then the
    /// shared cache, then the store.
    ///
    /// A store hit is staged and reaches the shared cache on commit. After a
    /// migration in the same transaction the shared cache is skipped.
    ///
    /// # Errors
    ///
    /// [`AccessError::BadParameter`] when no such type exists.
    pub fn load_type(&self, name: &str) -> Result<Arc<WorkItemType>, AccessError> {
        if let Some(staged) = self.effects.staged(name) {
            return Ok(staged);
        }
        let shared = if self.effects.migrated() {
            None
        } else {
            self.cache.get(name)
        };
        if let Some(hit) = shared {
            tracing::debug!(type_name = name, "type cache hit");
            return Ok(hit);
        }
        tracing::debug!(type_name = name, "type cache miss");
        let wit = self
            .store
            .get_type(name)?
            .ok_or_else(|| AccessError::bad_parameter("type", format!("unknown work item type '{name}'")))?;
        Ok(self.effects.stage(wit))
    }

    /// Create a work item at version 0.
    ///
    /// When the type declares `system.creator`, it is set to `creator`
    /// whatever the payload says.
    ///
    /// # Errors
    ///
    /// [`AccessError::BadParameter`] for an unknown type or a missing
    /// required field, [`AccessError::FieldConversion`] for undeclared
    /// fields or literals of the wrong kind.
    pub fn create(
        &self,
        type_name: &str,
        fields: &Map<String, Value>,
        creator: &Identity,
    ) -> Result<WorkItem, AccessError> {
        self.cancel.check()?;
        let wit = self.load_type(type_name)?;

        let mut payload = fields.clone();
        if wit.field(SYSTEM_CREATOR).is_some() {
            payload.insert(SYSTEM_CREATOR.to_string(), Value::String(creator.to_string()));
        }
        let converted = wit.convert_fields(&payload)?;

        let item = self.store.insert_item(&wit.name, INITIAL_VERSION, &converted)?;
        tracing::info!(id = %item.id, type_name = %wit.name, creator = %creator, "created work item");
        Ok(item)
    }

    /// # Errors
    ///
    /// [`AccessError::NotFound`] when no item has this id.
    pub fn load(&self, id: &ItemId) -> Result<WorkItem, AccessError> {
        self.cancel.check()?;
        self.fetch(row_of(id)?, id)
    }

    fn fetch(&self, row: i64, id: &ItemId) -> Result<WorkItem, AccessError> {
        self.store
            .get_item(row)?
            .ok_or_else(|| AccessError::item_not_found(id.as_str()))
    }

    /// Apply a partial update if the caller's version is current.
    ///
    /// Fields in `update` are merged over the stored ones; a `null` value
    /// removes an optional field. On success the stored version is
    /// incremented by one.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotFound`] when the item does not exist
    /// - [`AccessError::VersionConflict`] when `update.version` is stale,
    ///   including when a concurrent writer wins the race to the store
    /// - [`AccessError::FieldConversion`] for undeclared fields or bad
    ///   literals
    /// - [`AccessError::BadParameter`] when a required field would be
    ///   removed
    pub fn save(&self, update: &WorkItemUpdate, modifier: &Identity) -> Result<WorkItem, AccessError> {
        self.cancel.check()?;
        let row = row_of(&update.id)?;
        let stored = self.fetch(row, &update.id)?;
        if update.version != stored.version {
            return Err(AccessError::VersionConflict {
                id: stored.id.to_string(),
                expected: update.version,
                actual: stored.version,
            });
        }

        let wit = self.load_type(&stored.type_name)?;
        let mut fields = stored.fields.clone();
        for (name, literal) in &update.fields {
            if literal.is_null() {
                let def = wit.field(name).ok_or_else(|| {
                    AccessError::field(name.as_str(), format!("not a field of type '{}'", wit.name))
                })?;
                if def.required {
                    return Err(AccessError::bad_parameter(
                        name.as_str(),
                        format!("required by type '{}' and cannot be removed", wit.name),
                    ));
                }
                fields.remove(name);
            } else {
                fields.insert(name.clone(), wit.convert_value(name, literal)?);
            }
        }
        wit.check_required(&fields)?;

        let next = WorkItem {
            version: stored.version + 1,
            fields,
            ..stored
        };
        self.cancel.check()?;
        if !self.store.update_item(&next, update.version)? {
            let actual = self.fetch(row, &update.id)?.version;
            tracing::warn!(id = %update.id, expected = update.version, actual, "lost version race");
            return Err(AccessError::VersionConflict {
                id: update.id.to_string(),
                expected: update.version,
                actual,
            });
        }
        tracing::info!(id = %next.id, version = next.version, modifier = %modifier, "saved work item");
        Ok(next)
    }

    /// Remove a work item permanently.
    ///
    /// # Errors
    ///
    /// [`AccessError::NotFound`] when no item has this id.
    pub fn delete(&self, id: &ItemId, modifier: &Identity) -> Result<(), AccessError> {
        self.cancel.check()?;
        if !self.store.delete_item(row_of(id)?)? {
            return Err(AccessError::item_not_found(id.as_str()));
        }
        tracing::info!(%id, modifier = %modifier, "deleted work item");
        Ok(())
    }

    /// List items matching `filter_text`, one window at a time.
    ///
    /// Offset and limit arrive as raw wire values and are normalized with
    /// the configured paging defaults.
    ///
    /// # Errors
    ///
    /// [`AccessError::MalformedFilter`] or [`AccessError::FieldConversion`]
    /// when the filter does not parse.
    pub fn list(
        &self,
        filter_text: &str,
        offset: Option<&str>,
        limit: Option<i64>,
    ) -> Result<WorkItemPage, AccessError> {
        self.cancel.check()?;
        let types = self.store.list_types()?;
        let catalog = FieldCatalog::from_types(&types);
        let filter = FilterExpression::parse_with(filter_text, &catalog)?;
        self.list_filtered(&filter, PageRequest::normalize(offset, limit, self.paging))
    }

    /// List items matching an already parsed filter.
    ///
    /// # Errors
    ///
    /// [`AccessError::Internal`] on store failures.
    pub fn list_filtered(
        &self,
        filter: &FilterExpression,
        request: PageRequest,
    ) -> Result<WorkItemPage, AccessError> {
        self.cancel.check()?;
        let total = self.store.count_items(filter)?;
        let items = self.store.fetch_items(filter, request.offset, request.limit)?;
        tracing::debug!(%filter, total, returned = items.len(), "listed work items");
        Ok(WorkItemPage {
            items,
            total,
            request,
            window: PageWindow::compute(request, total),
        })
    }

    /// Every known type. The cache is refreshed with them on commit.
    ///
    /// # Errors
    ///
    /// [`AccessError::Internal`] on store failures.
    pub fn types(&self) -> Result<Vec<Arc<WorkItemType>>, AccessError> {
        self.cancel.check()?;
        let types = self.store.list_types()?;
        Ok(types.into_iter().map(|wit| self.effects.stage(wit)).collect())
    }

    /// Publish a new type.
    ///
    /// # Errors
    ///
    /// [`AccessError::BadParameter`] when the schema is invalid or the name
    /// is already taken.
    pub fn publish_type(&self, wit: WorkItemType) -> Result<Arc<WorkItemType>, AccessError> {
        self.cancel.check()?;
        wit.validate_schema()?;
        if !self.store.insert_type(&wit)? {
            return Err(AccessError::bad_parameter(
                "name",
                format!("work item type '{}' already exists", wit.name),
            ));
        }
        tracing::info!(type_name = %wit.name, fields = wit.fields.len(), "published work item type");
        Ok(self.effects.stage(wit))
    }

    /// Replace type schemas in bulk. The type cache is cleared once the
    /// surrounding transaction commits.
    ///
    /// # Errors
    ///
    /// [`AccessError::BadParameter`] when any schema is invalid.
    pub fn migrate_types(&self, types: &[WorkItemType]) -> Result<(), AccessError> {
        self.cancel.check()?;
        for wit in types {
            wit.validate_schema()?;
        }
        self.store.replace_types(types)?;
        self.effects.mark_migrated();
        tracing::info!(count = types.len(), "migrated work item types");
        Ok(())
    }
}

/// Ids that are not decimal row numbers name no stored item.
fn row_of(id: &ItemId) -> Result<i64, AccessError> {
    id.row().ok_or_else(|| AccessError::item_not_found(id.as_str()))
}
