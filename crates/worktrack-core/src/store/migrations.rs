//! Schema upgrades for the work item database.
//!
//! - v1 creates `work_item_types`, `work_items` (fields as one JSON
//!   column) and the `iterations` tree
//! - v2 adds expression indexes on `system.state` and `system.iteration`,
//!   the two fields list filters and iteration counts hit most
//!
//! The applied version lives in `PRAGMA user_version`, so a database
//! opened by an older binary is upgraded in place on the next open.

use super::schema;
use rusqlite::{Connection, types::Type};

/// Newest schema this build creates and reads.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "work item, type and iteration tables",
        sql: schema::MIGRATION_V1_SQL,
    },
    Migration {
        version: 2,
        name: "state and iteration filter indexes",
        sql: schema::MIGRATION_V2_SQL,
    },
];

/// Schema version recorded in the database; `0` for a fresh file.
///
/// # Errors
///
/// Fails when the pragma cannot be read or holds a negative or oversized
/// value.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Bring the work item tables up to [`LATEST_SCHEMA_VERSION`].
///
/// Each step commits together with its `user_version` bump, so a failed
/// upgrade leaves the database at the last completed version. Returns the
/// version reached.
///
/// # Errors
///
/// Fails when a step's SQL or the version bump fails.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for step in MIGRATIONS.iter().filter(move |m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", i64::from(step.version))?;
        tx.commit()?;
        tracing::info!(version = step.version, migration = step.name, "upgraded work item schema");
        current = step.version;
    }

    Ok(current)
}
