//! SQLite schema for the work item store.
//!
//! - `work_item_types` holds each published schema as JSON
//! - `work_items` keeps dynamic fields in one JSON column, queried through
//!   `json_extract`
//! - `iterations` is a self-referencing tree scoped by `space_id`

/// Migration v1: core tables.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS work_item_types (
    name TEXT PRIMARY KEY CHECK (length(trim(name)) > 0),
    fields_json TEXT NOT NULL CHECK (json_valid(fields_json)),
    created_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS work_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type_name TEXT NOT NULL REFERENCES work_item_types(name),
    version INTEGER NOT NULL DEFAULT 0 CHECK (version >= 0),
    fields TEXT NOT NULL CHECK (json_valid(fields)),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS iterations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    space_id TEXT NOT NULL,
    parent_id INTEGER REFERENCES iterations(id) ON DELETE SET NULL,
    name TEXT NOT NULL CHECK (length(trim(name)) > 0),
    description TEXT,
    start_at TEXT,
    end_at TEXT,
    state TEXT NOT NULL DEFAULT 'new' CHECK (state IN ('new', 'start', 'close')),
    created_at_us INTEGER NOT NULL,
    updated_at_us INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_work_items_type ON work_items(type_name);
CREATE INDEX IF NOT EXISTS idx_iterations_space ON iterations(space_id, id);
";

/// Migration v2: expression indexes for the hot filter paths.
pub const MIGRATION_V2_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_work_items_state
    ON work_items(json_extract(fields, '$."system.state"'));
CREATE INDEX IF NOT EXISTS idx_work_items_iteration
    ON work_items(json_extract(fields, '$."system.iteration"'));
"#;

/// Indexes every fully migrated database must have.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_work_items_type",
    "idx_iterations_space",
    "idx_work_items_state",
    "idx_work_items_iteration",
];
