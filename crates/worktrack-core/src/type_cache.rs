//! Read-mostly cache of work item type schemas.
//!
//! Entries never expire on their own. After a schema migration the owner
//! must call [`TypeCache::clear`] so later lookups reload from the store;
//! until then a stale schema may be served, which is accepted.
//!
//! The service adds entries through [`TypeCache::fill`], after the
//! transaction that read them has committed. Every `clear` bumps a
//! generation counter, and a fill carrying an older generation is dropped,
//! so schemas read before a migration never land after its clear.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::model::WorkItemType;

#[derive(Debug, Default)]
struct Entries {
    types: HashMap<String, Arc<WorkItemType>>,
    generation: u64,
}

/// Concurrent map from type name to schema.
///
/// Values are whole `Arc`s swapped in under the write lock, so a reader
/// sees either the old schema or the new one, never a mix.
#[derive(Debug, Default)]
pub struct TypeCache {
    entries: RwLock<Entries>,
}

impl TypeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached schema for `name`, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<WorkItemType>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let hit = entries.types.get(name).cloned();
        tracing::trace!(type_name = name, hit = hit.is_some(), "type cache lookup");
        hit
    }

    /// Insert or replace the schema stored under its name.
    pub fn put(&self, wit: WorkItemType) -> Arc<WorkItemType> {
        let wit = Arc::new(wit);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.types.insert(wit.name.clone(), Arc::clone(&wit));
        wit
    }

    /// Number of clears so far. Read it before opening the transaction whose
    /// schemas will later be passed to [`TypeCache::fill`].
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Insert or replace committed schemas, unless the cache was cleared
    /// after `generation` was read. Returns how many entries were written.
    pub fn fill(&self, generation: u64, types: impl IntoIterator<Item = Arc<WorkItemType>>) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.generation != generation {
            tracing::debug!(
                read_at = generation,
                current = entries.generation,
                "type cache cleared since read, skipping fill"
            );
            return 0;
        }
        let mut written = 0;
        for wit in types {
            entries.types.insert(wit.name.clone(), wit);
            written += 1;
        }
        written
    }

    /// Drop every entry and start a new generation.
    pub fn clear(&self) {
        let dropped = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            entries.generation += 1;
            std::mem::take(&mut entries.types).len()
        };
        tracing::info!(dropped, "clearing work item type cache");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .types
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDefinition, FieldKind};
    use std::thread;

    fn wit(name: &str, field: &str) -> WorkItemType {
        WorkItemType::new(name, vec![FieldDefinition::new(field, FieldKind::String, false)])
    }

    #[test]
    fn get_after_put_returns_schema() {
        let cache = TypeCache::new();
        assert!(cache.get("story").is_none());
        cache.put(wit("story", "title"));
        let hit = cache.get("story").expect("cached");
        assert_eq!(hit.name, "story");
        assert_eq!(hit.fields[0].name, "title");
    }

    #[test]
    fn put_overwrites_existing_entry() {
        let cache = TypeCache::new();
        cache.put(wit("story", "title"));
        cache.put(wit("story", "summary"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("story").expect("cached").fields[0].name, "summary");
    }

    #[test]
    fn clear_drops_everything() {
        let cache = TypeCache::new();
        cache.put(wit("a", "x"));
        cache.put(wit("b", "y"));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn fill_read_before_a_clear_is_dropped() {
        let cache = TypeCache::new();
        let before = cache.generation();
        cache.clear();
        assert_eq!(cache.fill(before, [Arc::new(wit("story", "stale"))]), 0);
        assert!(cache.get("story").is_none());

        let fresh = [Arc::new(wit("story", "fresh")), Arc::new(wit("task", "title"))];
        assert_eq!(cache.fill(cache.generation(), fresh), 2);
        assert_eq!(cache.get("story").expect("cached").fields[0].name, "fresh");
    }

    #[test]
    fn readers_see_whole_entries_under_concurrent_writes() {
        let cache = Arc::new(TypeCache::new());
        cache.put(wit("story", "v0"));

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..200 {
                        let field = format!("v{w}-{i}");
                        cache.put(WorkItemType::new(
                            "story",
                            vec![
                                FieldDefinition::new(field.clone(), FieldKind::String, false),
                                FieldDefinition::new(field, FieldKind::Integer, false),
                            ],
                        ));
                        if i % 50 == 0 {
                            cache.clear();
                        }
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..500 {
                        if let Some(hit) = cache.get("story") {
                            if hit.fields.len() == 2 {
                                assert_eq!(hit.fields[0].name, hit.fields[1].name);
                            } else {
                                assert_eq!(hit.fields.len(), 1);
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().expect("thread panicked");
        }
    }
}
