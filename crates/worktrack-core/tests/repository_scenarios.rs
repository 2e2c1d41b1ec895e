//! End-to-end repository scenarios, run against both shipped providers.

use serde_json::{Map, Value, json};
use std::sync::Arc;
use worktrack_core::model::item_type::{
    SYSTEM_ASSIGNEE, SYSTEM_BUG, SYSTEM_CREATOR, SYSTEM_DESCRIPTION, SYSTEM_ITERATION,
    SYSTEM_STATE, SYSTEM_TITLE, SYSTEM_USERSTORY,
};
use worktrack_core::model::{
    FieldDefinition, FieldKind, FieldValue, ItemId, Iteration, IterationState, WorkItem,
    WorkItemType, WorkItemUpdate,
};
use worktrack_core::store::{Database, MemoryStore, TransactionProvider};
use worktrack_core::view::{ListDocument, iteration_view, with_iteration_counts};
use worktrack_core::{
    AccessError, CancellationToken, Identity, PageLink, Service, ServiceConfig, TypeCache,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sqlite_service() -> Service<Database> {
    Service::new(
        Database::open_in_memory().expect("open in-memory db"),
        Arc::new(TypeCache::new()),
        ServiceConfig::default(),
    )
}

fn memory_service() -> Service<MemoryStore> {
    Service::new(
        MemoryStore::new(),
        Arc::new(TypeCache::new()),
        ServiceConfig::default(),
    )
}

fn alice() -> Identity {
    Identity::new("alice").expect("identity")
}

fn payload(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object payload")
}

fn create_bug<P: TransactionProvider>(svc: &Service<P>, title: &str, state: &str) -> WorkItem {
    svc.transactional(&CancellationToken::new(), |app| {
        app.work_items().create(
            SYSTEM_BUG,
            &payload(json!({SYSTEM_TITLE: title, SYSTEM_STATE: state})),
            &alice(),
        )
    })
    .expect("create bug")
}

fn ids(items: &[WorkItem]) -> Vec<String> {
    items.iter().map(|i| i.id.to_string()).collect()
}

/// Run `$body` once per provider, binding the service to `$svc`.
macro_rules! for_each_provider {
    ($svc:ident => $body:block) => {{
        {
            let $svc = sqlite_service();
            $body
        }
        {
            let $svc = memory_service();
            $body
        }
    }};
}

// ---------------------------------------------------------------------------
// Create / load / delete
// ---------------------------------------------------------------------------

#[test]
fn create_then_load_returns_same_record() {
    for_each_provider!(svc => {
        let created = create_bug(&svc, "Crash on save", "new");
        assert_eq!(created.version, 0);
        assert_eq!(created.field(SYSTEM_CREATOR), Some(&FieldValue::Identifier("alice".into())));

        let loaded = svc
            .transactional(&CancellationToken::new(), |app| app.work_items().load(&created.id))
            .expect("load");
        assert_eq!(loaded, created);
    });
}

#[test]
fn create_rejects_missing_required_and_undeclared_fields() {
    for_each_provider!(svc => {
        let missing = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().create(SYSTEM_BUG, &payload(json!({SYSTEM_TITLE: "t"})), &alice())
            })
            .unwrap_err();
        assert!(matches!(missing, AccessError::BadParameter { ref parameter, .. } if parameter == SYSTEM_STATE));

        let undeclared = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().create(
                    SYSTEM_BUG,
                    &payload(json!({SYSTEM_TITLE: "t", SYSTEM_STATE: "new", "priority": 1})),
                    &alice(),
                )
            })
            .unwrap_err();
        assert!(matches!(undeclared, AccessError::FieldConversion { ref field, .. } if field == "priority"));
    });
}

#[test]
fn unknown_and_malformed_ids_are_not_found() {
    for_each_provider!(svc => {
        for raw in ["9999", "abc", "0", "-1", ""] {
            let err = svc
                .transactional(&CancellationToken::new(), |app| {
                    app.work_items().load(&ItemId::new(raw))
                })
                .unwrap_err();
            assert!(matches!(err, AccessError::NotFound { .. }), "{raw}: {err:?}");
        }
    });
}

#[test]
fn delete_is_a_hard_removal() {
    for_each_provider!(svc => {
        let item = create_bug(&svc, "gone soon", "open");
        let cancel = CancellationToken::new();
        svc.transactional(&cancel, |app| app.work_items().delete(&item.id, &alice()))
            .expect("delete");

        let err = svc
            .transactional(&cancel, |app| app.work_items().load(&item.id))
            .unwrap_err();
        assert!(matches!(err, AccessError::NotFound { .. }));
        let err = svc
            .transactional(&cancel, |app| app.work_items().delete(&item.id, &alice()))
            .unwrap_err();
        assert!(matches!(err, AccessError::NotFound { .. }));
    });
}

// ---------------------------------------------------------------------------
// Optimistic concurrency
// ---------------------------------------------------------------------------

#[test]
fn save_increments_version_and_merges_fields() {
    for_each_provider!(svc => {
        let item = create_bug(&svc, "flaky test", "new");
        let saved = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().save(
                    &WorkItemUpdate {
                        id: item.id.clone(),
                        version: 0,
                        fields: payload(json!({SYSTEM_STATE: "open", SYSTEM_ASSIGNEE: "bob"})),
                    },
                    &alice(),
                )
            })
            .expect("save");
        assert_eq!(saved.version, 1);
        assert_eq!(saved.field(SYSTEM_TITLE), Some(&FieldValue::String("flaky test".into())));
        assert_eq!(saved.field(SYSTEM_STATE), Some(&FieldValue::String("open".into())));

        let reloaded = svc
            .transactional(&CancellationToken::new(), |app| app.work_items().load(&item.id))
            .expect("reload");
        assert_eq!(reloaded, saved);
    });
}

#[test]
fn stale_version_is_a_conflict_and_changes_nothing() {
    for_each_provider!(svc => {
        let item = create_bug(&svc, "race", "new");
        let cancel = CancellationToken::new();
        let update = |state: &str, version: u64| WorkItemUpdate {
            id: item.id.clone(),
            version,
            fields: payload(json!({SYSTEM_STATE: state})),
        };

        svc.transactional(&cancel, |app| app.work_items().save(&update("open", 0), &alice()))
            .expect("first writer wins");
        let err = svc
            .transactional(&cancel, |app| app.work_items().save(&update("closed", 0), &alice()))
            .unwrap_err();
        assert!(matches!(
            err,
            AccessError::VersionConflict { expected: 0, actual: 1, .. }
        ));

        let stored = svc
            .transactional(&cancel, |app| app.work_items().load(&item.id))
            .expect("load");
        assert_eq!(stored.version, 1);
        assert_eq!(stored.field(SYSTEM_STATE), Some(&FieldValue::String("open".into())));
    });
}

#[test]
fn null_removes_optional_field() {
    for_each_provider!(svc => {
        let item = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().create(
                    SYSTEM_USERSTORY,
                    &payload(json!({
                        SYSTEM_TITLE: "story",
                        SYSTEM_STATE: "new",
                        SYSTEM_DESCRIPTION: "details",
                    })),
                    &alice(),
                )
            })
            .expect("create");
        let saved = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().save(
                    &WorkItemUpdate {
                        id: item.id.clone(),
                        version: item.version,
                        fields: payload(json!({SYSTEM_DESCRIPTION: null})),
                    },
                    &alice(),
                )
            })
            .expect("save");
        assert!(saved.field(SYSTEM_DESCRIPTION).is_none());
        assert_eq!(saved.version, 1);
    });
}

#[test]
fn concurrent_writers_on_one_version_produce_one_winner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let svc = Arc::new(Service::new(
        Database::open(&dir.path().join("db.sqlite3"), std::time::Duration::from_secs(5))
            .expect("open"),
        Arc::new(TypeCache::new()),
        ServiceConfig::default(),
    ));
    let item = create_bug(&*svc, "contended", "new");

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let svc = Arc::clone(&svc);
            let id = item.id.clone();
            std::thread::spawn(move || {
                svc.transactional(&CancellationToken::new(), |app| {
                    app.work_items().save(
                        &WorkItemUpdate {
                            id,
                            version: 0,
                            fields: payload(json!({SYSTEM_TITLE: format!("writer {n}")})),
                        },
                        &alice(),
                    )
                })
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("writer thread"))
        .collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(AccessError::VersionConflict { .. })))
        .count();
    assert_eq!(winners, 1);
    assert_eq!(conflicts, 7);
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

#[test]
fn list_pages_follow_the_grid() {
    for_each_provider!(svc => {
        let created: Vec<_> = (0..13)
            .map(|n| create_bug(&svc, &format!("bug {n}"), "open"))
            .collect();
        let page = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().list("", Some("2"), Some(5))
            })
            .expect("list");
        assert_eq!(page.total, 13);
        assert_eq!(ids(&page.items), ids(&created[2..7]));
        assert_eq!(page.window.first, PageLink::new(0, 5));
        assert_eq!(page.window.prev, Some(PageLink::new(0, 5)));
        assert_eq!(page.window.next, Some(PageLink::new(7, 5)));
        assert_eq!(page.window.last, Some(PageLink::new(10, 5)));
    });
}

#[test]
fn list_normalizes_bad_paging_input() {
    for_each_provider!(svc => {
        for n in 0..3 {
            create_bug(&svc, &format!("bug {n}"), "new");
        }
        let page = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().list("{}", Some("ALPHA"), Some(-1))
            })
            .expect("list");
        assert_eq!(page.request.offset, 0);
        assert_eq!(page.request.limit, 20);
        assert_eq!(page.items.len(), 3);

        let beyond = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().list("", Some("40"), Some(10))
            })
            .expect("list past end");
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.window.prev, Some(PageLink::new(30, 10)));
        assert_eq!(beyond.window.last, Some(PageLink::new(0, 10)));
    });
}

#[test]
fn list_filters_by_field_values() {
    for_each_provider!(svc => {
        create_bug(&svc, "a", "open");
        let closed = create_bug(&svc, "b", "closed");
        create_bug(&svc, "c", "open");

        let page = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().list(r#"{"system.state":"closed"}"#, None, None)
            })
            .expect("list");
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, closed.id);

        let either = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().list(
                    r#"{"$or":[{"system.title":"a"},{"system.title":"c"}]}"#,
                    None,
                    None,
                )
            })
            .expect("list or");
        assert_eq!(either.total, 2);
    });
}

#[test]
fn unknown_value_gives_an_empty_first_page() {
    for_each_provider!(svc => {
        create_bug(&svc, "a", "open");
        create_bug(&svc, "b", "closed");

        let page = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().list(r#"{"system.state":"nonexistent"}"#, None, None)
            })
            .expect("list");
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.window.first, PageLink::new(0, 20));
        assert_eq!(page.window.prev, None);
        assert_eq!(page.window.next, None);
        assert_eq!(page.window.last, None);
    });
}

#[test]
fn conflicting_field_kinds_match_by_stored_kind() {
    for_each_provider!(svc => {
        let cancel = CancellationToken::new();
        for (name, owner, due) in [
            ("a", FieldKind::Identifier, FieldKind::Timestamp),
            ("b", FieldKind::Integer, FieldKind::String),
            ("c", FieldKind::String, FieldKind::String),
        ] {
            let wit = WorkItemType::new(
                name,
                vec![
                    FieldDefinition::new("owner", owner, false),
                    FieldDefinition::new("due", due, false),
                ],
            );
            svc.transactional(&cancel, |app| app.work_items().publish_type(wit.clone()))
                .expect("publish");
        }
        for name in ["a", "c"] {
            svc.transactional(&cancel, |app| {
                app.work_items().create(
                    name,
                    &payload(json!({"owner": "12", "due": "2024-01-01T00:00:00Z"})),
                    &alice(),
                )
            })
            .expect("create");
        }

        let total = |filter: &str| {
            svc.transactional(&cancel, |app| app.work_items().list(filter, None, None))
                .expect("list")
                .total
        };
        // Only the identifier accepts an integer literal.
        assert_eq!(total(r#"{"owner":12}"#), 1);
        assert_eq!(total(r#"{"owner":"12"}"#), 2);
        assert_eq!(total(r#"{"due":"2024-01-01T00:00:00Z"}"#), 2);
        assert_eq!(total(r#"{"due":"2024-01-01T02:00:00+02:00"}"#), 1);
        assert_eq!(total(r#"{"due":1704067200000000}"#), 1);
    });
}

#[test]
fn malformed_filter_is_distinct_from_conversion_error() {
    for_each_provider!(svc => {
        let malformed = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().list("{not json", None, None)
            })
            .unwrap_err();
        assert!(matches!(malformed, AccessError::MalformedFilter(_)));

        let conversion = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().list(r#"{"system.assignee":"two words"}"#, None, None)
            })
            .unwrap_err();
        assert!(matches!(conversion, AccessError::FieldConversion { .. }));
    });
}

#[test]
fn list_document_links_are_absolute() {
    let svc = memory_service();
    for n in 0..4 {
        create_bug(&svc, &format!("bug {n}"), "new");
    }
    let doc = svc
        .transactional(&CancellationToken::new(), |app| {
            let page = app.work_items().list("", Some("0"), Some(2))?;
            Ok(ListDocument::from_page(&page, &app.config().api, &[]))
        })
        .expect("list");
    assert_eq!(doc.meta.total_count, 4);
    assert_eq!(
        doc.links.next.as_deref(),
        Some("http://localhost:8080/api/workitems?offset=2&limit=2")
    );
    assert_eq!(
        doc.links.last.as_deref(),
        Some("http://localhost:8080/api/workitems?offset=2&limit=2")
    );
}

// ---------------------------------------------------------------------------
// Types and cache coherence
// ---------------------------------------------------------------------------

#[test]
fn published_type_is_usable_and_cached() {
    for_each_provider!(svc => {
        let task = WorkItemType::new(
            "custom.task",
            vec![
                FieldDefinition::new("title", FieldKind::String, true),
                FieldDefinition::new("points", FieldKind::Integer, false),
            ],
        );
        svc.transactional(&CancellationToken::new(), |app| app.work_items().publish_type(task.clone()))
            .expect("publish");
        assert!(svc.cache().get("custom.task").is_some());

        let item = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().create("custom.task", &payload(json!({"title": "x", "points": "8"})), &alice())
            })
            .expect("create custom");
        assert_eq!(item.field("points"), Some(&FieldValue::Integer(8)));
        // No system.creator declared, so none is stamped.
        assert!(item.field(SYSTEM_CREATOR).is_none());

        let page = svc
            .transactional(&CancellationToken::new(), |app| {
                app.work_items().list(r#"{"points":"8"}"#, None, None)
            })
            .expect("list by converted literal");
        assert_eq!(page.total, 1);
    });
}

#[test]
fn migration_clears_cache_after_commit() {
    for_each_provider!(svc => {
        let cancel = CancellationToken::new();
        svc.transactional(&cancel, |app| app.work_items().types().map(|t| t.len()))
            .expect("types");
        assert!(!svc.cache().is_empty());

        let mut bug = svc.cache().get(SYSTEM_BUG).expect("cached").as_ref().clone();
        bug.fields.push(FieldDefinition::new("severity", FieldKind::Integer, false));
        svc.transactional(&cancel, |app| app.work_items().migrate_types(&[bug.clone()]))
            .expect("migrate");
        assert!(svc.cache().is_empty());

        let reloaded = svc
            .transactional(&cancel, |app| app.work_items().load_type(SYSTEM_BUG))
            .expect("reload type");
        assert!(reloaded.field("severity").is_some());
    });
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[test]
fn cancellation_rolls_back_every_write() {
    for_each_provider!(svc => {
        let cancel = CancellationToken::new();
        let err = svc
            .transactional(&cancel, |app| {
                app.work_items().create(
                    SYSTEM_BUG,
                    &payload(json!({SYSTEM_TITLE: "t", SYSTEM_STATE: "new"})),
                    &alice(),
                )?;
                cancel.cancel();
                app.work_items().create(
                    SYSTEM_BUG,
                    &payload(json!({SYSTEM_TITLE: "u", SYSTEM_STATE: "new"})),
                    &alice(),
                )
            })
            .unwrap_err();
        assert!(matches!(err, AccessError::Cancelled));
        // Types loaded by the rolled-back transaction never reach the cache.
        assert!(svc.cache().is_empty());

        let page = svc
            .transactional(&CancellationToken::new(), |app| app.work_items().list("", None, None))
            .expect("list");
        assert_eq!(page.total, 0);
    });
}

#[test]
fn pre_cancelled_token_never_runs() {
    for_each_provider!(svc => {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = svc
            .transactional(&cancel, |_| -> Result<(), AccessError> {
                panic!("closure must not run")
            })
            .unwrap_err();
        assert!(matches!(err, AccessError::Cancelled));
    });
}

// ---------------------------------------------------------------------------
// Iterations
// ---------------------------------------------------------------------------

#[test]
fn iteration_counts_track_total_and_closed() {
    for_each_provider!(svc => {
        let cancel = CancellationToken::new();
        let (sprint, empty) = svc
            .transactional(&cancel, |app| {
                let root = app.iterations().create(Iteration {
                    space_id: "space-a".into(),
                    name: "Q1".into(),
                    ..Iteration::default()
                })?;
                let sprint = app.iterations().create_child(&root.id, "Sprint 1", None, None)?;
                Ok((sprint, root))
            })
            .expect("iterations");

        for state in ["open", "closed", "closed"] {
            svc.transactional(&cancel, |app| {
                app.work_items().create(
                    SYSTEM_BUG,
                    &payload(json!({
                        SYSTEM_TITLE: "in sprint",
                        SYSTEM_STATE: state,
                        SYSTEM_ITERATION: sprint.id.as_str(),
                    })),
                    &alice(),
                )
            })
            .expect("create in sprint");
        }

        let views = svc
            .transactional(&cancel, |app| {
                let counts = app.iterations().item_counts("space-a")?;
                let iterations = app.iterations().list_for_space("space-a")?;
                let transforms = [with_iteration_counts(&counts)];
                Ok(iterations
                    .iter()
                    .map(|it| iteration_view(it, &app.config().api, &transforms))
                    .collect::<Vec<_>>())
            })
            .expect("views");

        assert_eq!(views.len(), 2);
        let by_id = |id: &str| {
            views
                .iter()
                .find(|v| v.id == id)
                .map(|v| v.relationships["workitems"].meta.clone())
                .expect("view present")
        };
        let sprint_meta = by_id(sprint.id.as_str());
        assert_eq!(sprint_meta["total"], Value::from(3));
        assert_eq!(sprint_meta["closed"], Value::from(2));
        assert_eq!(by_id(empty.id.as_str())["total"], Value::from(0));
    });
}

#[test]
fn starting_a_second_iteration_in_a_space_fails() {
    for_each_provider!(svc => {
        let cancel = CancellationToken::new();
        let err = svc
            .transactional(&cancel, |app| {
                let repo = app.iterations();
                let mut first = repo.create(Iteration {
                    space_id: "s".into(),
                    name: "one".into(),
                    ..Iteration::default()
                })?;
                first.state = IterationState::Start;
                repo.save(&first)?;
                repo.create(Iteration {
                    space_id: "s".into(),
                    name: "two".into(),
                    state: IterationState::Start,
                    ..Iteration::default()
                })
            })
            .unwrap_err();
        assert!(matches!(err, AccessError::BadParameter { .. }));
    });
}
