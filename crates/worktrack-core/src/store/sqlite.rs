//! SQLite-backed store.
//!
//! Runtime defaults follow the usual embedded setup:
//! - `journal_mode = WAL` so readers in other processes are not blocked
//! - `busy_timeout` from [`crate::config::DatabaseConfig`] (5 s default)
//! - `foreign_keys = ON` so items cannot reference unknown types
//!
//! Filters are pushed down as `json_extract` predicates over the `fields`
//! column; the whole expression becomes one bound `WHERE` clause.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{ToSql, Type};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{Store, TransactionProvider, decode_fields, migrations};
use crate::cancel::CancellationToken;
use crate::error::AccessError;
use crate::filter::FilterExpression;
use crate::model::field::format_timestamp;
use crate::model::item_type::system_types;
use crate::model::{
    FieldDefinition, FieldKind, FieldValue, ItemId, Iteration, IterationCounts, IterationId,
    IterationState, WorkItem, WorkItemType,
};

/// Busy timeout used when none is configured.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const ITEM_COLUMNS: &str = "id, type_name, version, fields";
const ITERATION_COLUMNS: &str =
    "id, space_id, parent_id, name, description, start_at, end_at, state";

/// A migrated SQLite database, one transaction at a time.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the database file, apply pragmas, migrate and seed
    /// the system types.
    ///
    /// # Errors
    ///
    /// Returns an error if opening, configuring or migrating fails.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create database directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open work item database {}", path.display()))?;
        Self::init(conn, busy_timeout)
    }

    /// A private in-memory database, used by tests and benches.
    ///
    /// # Errors
    ///
    /// Returns an error if migrating fails.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        Self::init(conn, DEFAULT_BUSY_TIMEOUT)
    }

    fn init(mut conn: Connection, busy_timeout: Duration) -> Result<Self> {
        configure_connection(&conn, busy_timeout).context("configure sqlite pragmas")?;
        let version = migrations::migrate(&mut conn).context("apply schema migrations")?;
        let seeded = seed_system_types(&conn).context("seed system work item types")?;
        tracing::debug!(schema_version = version, seeded, "work item database ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl TransactionProvider for Database {
    fn transactional<T, F>(&self, cancel: &CancellationToken, f: F) -> Result<T, AccessError>
    where
        F: FnOnce(&dyn Store) -> Result<T, AccessError>,
    {
        cancel.check()?;
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin transaction")?;

        let outcome = f(&SqliteStore::new(&tx));

        match outcome {
            Ok(value) if !cancel.is_cancelled() => {
                tx.commit().context("commit transaction")?;
                Ok(value)
            }
            Ok(_) => {
                tx.rollback().context("roll back cancelled transaction")?;
                tracing::warn!("transaction cancelled before commit, rolled back");
                Err(AccessError::Cancelled)
            }
            Err(err) => {
                tx.rollback().context("roll back failed transaction")?;
                tracing::debug!(error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

fn seed_system_types(conn: &Connection) -> Result<usize> {
    let mut seeded = 0;
    for wit in system_types() {
        let fields_json = serde_json::to_string(&wit.fields)?;
        seeded += conn.execute(
            "INSERT OR IGNORE INTO work_item_types (name, fields_json, created_at_us)
             VALUES (?1, ?2, ?3)",
            params![wit.name, fields_json, now_us()],
        )?;
    }
    Ok(seeded)
}

/// [`Store`] over one open connection or transaction.
pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    #[must_use]
    pub const fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn decode_items(&self, rows: Vec<RawItem>) -> Result<Vec<WorkItem>> {
        let mut schemas: HashMap<String, Option<WorkItemType>> = HashMap::new();
        rows.into_iter()
            .map(|raw| {
                if !schemas.contains_key(&raw.type_name) {
                    let wit = self.get_type(&raw.type_name)?;
                    schemas.insert(raw.type_name.clone(), wit);
                }
                let wit = schemas.get(&raw.type_name).and_then(Option::as_ref);
                raw.into_item(wit)
            })
            .collect()
    }
}

impl Store for SqliteStore<'_> {
    fn get_type(&self, name: &str) -> Result<Option<WorkItemType>> {
        let fields_json: Option<String> = self
            .conn
            .query_row(
                "SELECT fields_json FROM work_item_types WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("get work item type '{name}'"))?;
        fields_json
            .map(|json| decode_type(name.to_string(), &json))
            .transpose()
    }

    fn list_types(&self) -> Result<Vec<WorkItemType>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, fields_json FROM work_item_types ORDER BY name")
            .context("prepare list_types")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .context("execute list_types")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read work item type rows")?;
        rows.into_iter()
            .map(|(name, json)| decode_type(name, &json))
            .collect()
    }

    fn insert_type(&self, wit: &WorkItemType) -> Result<bool> {
        let fields_json = serde_json::to_string(&wit.fields)?;
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO work_item_types (name, fields_json, created_at_us)
                 VALUES (?1, ?2, ?3)",
                params![wit.name, fields_json, now_us()],
            )
            .with_context(|| format!("insert work item type '{}'", wit.name))?;
        Ok(inserted > 0)
    }

    fn replace_types(&self, types: &[WorkItemType]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare(
                "INSERT INTO work_item_types (name, fields_json, created_at_us)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET fields_json = excluded.fields_json",
            )
            .context("prepare replace_types")?;
        for wit in types {
            let fields_json = serde_json::to_string(&wit.fields)?;
            stmt.execute(params![wit.name, fields_json, now_us()])
                .with_context(|| format!("replace work item type '{}'", wit.name))?;
        }
        Ok(())
    }

    fn get_item(&self, row: i64) -> Result<Option<WorkItem>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM work_items WHERE id = ?1"),
                params![row],
                RawItem::from_row,
            )
            .optional()
            .with_context(|| format!("get work item {row}"))?;
        match raw {
            Some(raw) => Ok(self.decode_items(vec![raw])?.pop()),
            None => Ok(None),
        }
    }

    fn count_items(&self, filter: &FilterExpression) -> Result<u64> {
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        let clause = filter_sql(filter, &mut params);
        let sql = format!("SELECT COUNT(*) FROM work_items WHERE {clause}");
        tracing::debug!(%sql, "count work items");

        let params_ref: Vec<&dyn ToSql> = params.iter().map(AsRef::as_ref).collect();
        let count: i64 = self
            .conn
            .prepare(&sql)
            .context("prepare count_items")?
            .query_row(params_from_iter(params_ref), |row| row.get(0))
            .context("execute count_items")?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    fn fetch_items(&self, filter: &FilterExpression, offset: u64, limit: u64) -> Result<Vec<WorkItem>> {
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        let clause = filter_sql(filter, &mut params);
        params.push(Box::new(i64::try_from(limit).unwrap_or(i64::MAX)));
        let limit_param = params.len();
        params.push(Box::new(i64::try_from(offset).unwrap_or(i64::MAX)));
        let offset_param = params.len();
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM work_items WHERE {clause} \
             ORDER BY id ASC LIMIT ?{limit_param} OFFSET ?{offset_param}"
        );
        tracing::debug!(%sql, offset, limit, "fetch work items");

        let params_ref: Vec<&dyn ToSql> = params.iter().map(AsRef::as_ref).collect();
        let mut stmt = self.conn.prepare(&sql).context("prepare fetch_items")?;
        let rows = stmt
            .query_map(params_from_iter(params_ref), RawItem::from_row)
            .context("execute fetch_items")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read work item rows")?;
        self.decode_items(rows)
    }

    fn insert_item(
        &self,
        type_name: &str,
        version: u64,
        fields: &BTreeMap<String, FieldValue>,
    ) -> Result<WorkItem> {
        let json = encode_fields(fields)?;
        let now = now_us();
        self.conn
            .execute(
                "INSERT INTO work_items (type_name, version, fields, created_at_us, updated_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![type_name, to_sql_version(version)?, json, now],
            )
            .with_context(|| format!("insert work item of type '{type_name}'"))?;
        Ok(WorkItem {
            id: ItemId::from_row(self.conn.last_insert_rowid()),
            type_name: type_name.to_string(),
            version,
            fields: fields.clone(),
        })
    }

    fn update_item(&self, item: &WorkItem, expected_version: u64) -> Result<bool> {
        let Some(row) = item.id.row() else {
            return Ok(false);
        };
        let json = encode_fields(&item.fields)?;
        let updated = self
            .conn
            .execute(
                "UPDATE work_items SET version = ?1, fields = ?2, updated_at_us = ?3
                 WHERE id = ?4 AND version = ?5",
                params![
                    to_sql_version(item.version)?,
                    json,
                    now_us(),
                    row,
                    to_sql_version(expected_version)?
                ],
            )
            .with_context(|| format!("update work item {row}"))?;
        Ok(updated > 0)
    }

    fn delete_item(&self, row: i64) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM work_items WHERE id = ?1", params![row])
            .with_context(|| format!("delete work item {row}"))?;
        Ok(deleted > 0)
    }

    fn get_iteration(&self, row: i64) -> Result<Option<Iteration>> {
        self.conn
            .query_row(
                &format!("SELECT {ITERATION_COLUMNS} FROM iterations WHERE id = ?1"),
                params![row],
                iteration_from_row,
            )
            .optional()
            .with_context(|| format!("get iteration {row}"))
    }

    fn insert_iteration(&self, iteration: &Iteration) -> Result<Iteration> {
        let now = now_us();
        self.conn
            .execute(
                "INSERT INTO iterations
                 (space_id, parent_id, name, description, start_at, end_at, state,
                  created_at_us, updated_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    iteration.space_id,
                    iteration.parent_id.as_ref().and_then(IterationId::row),
                    iteration.name,
                    iteration.description,
                    iteration.start_at.as_ref().map(format_timestamp),
                    iteration.end_at.as_ref().map(format_timestamp),
                    iteration.state.as_str(),
                    now,
                ],
            )
            .with_context(|| format!("insert iteration '{}'", iteration.name))?;
        Ok(Iteration {
            id: IterationId::from_row(self.conn.last_insert_rowid()),
            ..iteration.clone()
        })
    }

    fn update_iteration(&self, iteration: &Iteration) -> Result<bool> {
        let Some(row) = iteration.id.row() else {
            return Ok(false);
        };
        let updated = self
            .conn
            .execute(
                "UPDATE iterations SET name = ?1, description = ?2, start_at = ?3,
                 end_at = ?4, state = ?5, updated_at_us = ?6
                 WHERE id = ?7",
                params![
                    iteration.name,
                    iteration.description,
                    iteration.start_at.as_ref().map(format_timestamp),
                    iteration.end_at.as_ref().map(format_timestamp),
                    iteration.state.as_str(),
                    now_us(),
                    row,
                ],
            )
            .with_context(|| format!("update iteration {row}"))?;
        Ok(updated > 0)
    }

    fn list_iterations(&self, space_id: &str) -> Result<Vec<Iteration>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ITERATION_COLUMNS} FROM iterations WHERE space_id = ?1 ORDER BY id ASC"
            ))
            .context("prepare list_iterations")?;
        let rows = stmt
            .query_map(params![space_id], iteration_from_row)
            .context("execute list_iterations")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read iteration rows")?;
        Ok(rows)
    }

    fn iteration_counts(&self, space_id: &str) -> Result<HashMap<IterationId, IterationCounts>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"SELECT i.id,
                          COUNT(w.id),
                          COALESCE(SUM(CASE
                              WHEN json_extract(w.fields, '$."system.state"') = 'closed' THEN 1
                              ELSE 0 END), 0)
                   FROM iterations i
                   LEFT JOIN work_items w
                     ON json_extract(w.fields, '$."system.iteration"') = CAST(i.id AS TEXT)
                   WHERE i.space_id = ?1
                   GROUP BY i.id"#,
            )
            .context("prepare iteration_counts")?;
        let rows = stmt
            .query_map(params![space_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .context("execute iteration_counts")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("read iteration count rows")?;
        Ok(rows
            .into_iter()
            .map(|(id, total, closed)| {
                (
                    IterationId::from_row(id),
                    IterationCounts {
                        total: u64::try_from(total).unwrap_or(0),
                        closed: u64::try_from(closed).unwrap_or(0),
                    },
                )
            })
            .collect())
    }
}

struct RawItem {
    id: i64,
    type_name: String,
    version: i64,
    fields: String,
}

impl RawItem {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            type_name: row.get(1)?,
            version: row.get(2)?,
            fields: row.get(3)?,
        })
    }

    fn into_item(self, wit: Option<&WorkItemType>) -> Result<WorkItem> {
        let stored: Map<String, Value> = serde_json::from_str(&self.fields)
            .with_context(|| format!("decode fields of work item {}", self.id))?;
        Ok(WorkItem {
            id: ItemId::from_row(self.id),
            version: u64::try_from(self.version)
                .with_context(|| format!("negative version on work item {}", self.id))?,
            fields: decode_fields(wit, &stored),
            type_name: self.type_name,
        })
    }
}

fn iteration_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Iteration> {
    let state: String = row.get(7)?;
    Ok(Iteration {
        id: IterationId::from_row(row.get(0)?),
        space_id: row.get(1)?,
        parent_id: row.get::<_, Option<i64>>(2)?.map(IterationId::from_row),
        name: row.get(3)?,
        description: row.get(4)?,
        start_at: parse_timestamp(5, row.get(5)?)?,
        end_at: parse_timestamp(6, row.get(6)?)?,
        state: state.parse::<IterationState>().map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(error))
        })?,
    })
}

fn parse_timestamp(column: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|text| {
        DateTime::parse_from_rfc3339(&text)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(error))
            })
    })
    .transpose()
}

fn decode_type(name: String, fields_json: &str) -> Result<WorkItemType> {
    let fields: Vec<FieldDefinition> = serde_json::from_str(fields_json)
        .with_context(|| format!("decode fields of work item type '{name}'"))?;
    Ok(WorkItemType { name, fields })
}

fn encode_fields(fields: &BTreeMap<String, FieldValue>) -> Result<String> {
    let map: Map<String, Value> = fields
        .iter()
        .map(|(name, value)| (name.clone(), value.to_json()))
        .collect();
    serde_json::to_string(&map).context("encode work item fields")
}

fn to_sql_version(version: u64) -> Result<i64> {
    i64::try_from(version).with_context(|| format!("version {version} out of range"))
}

fn now_us() -> i64 {
    Utc::now().timestamp_micros()
}

/// Translate a filter into a bound SQL predicate over `work_items.fields`.
///
/// Each equality compares in the stored JSON kind. A textual literal that
/// also reads as an integer or bool matches those encodings too, the same
/// way [`FilterExpression::matches`] coerces it.
fn filter_sql(filter: &FilterExpression, params: &mut Vec<Box<dyn ToSql>>) -> String {
    match filter {
        FilterExpression::All => "1 = 1".to_string(),
        FilterExpression::Equals { field, value } => equals_sql(field, value, params),
        FilterExpression::And(children) => join_sql(children, " AND ", params),
        FilterExpression::Or(children) => join_sql(children, " OR ", params),
    }
}

fn join_sql(children: &[FilterExpression], op: &str, params: &mut Vec<Box<dyn ToSql>>) -> String {
    let parts: Vec<String> = children.iter().map(|c| filter_sql(c, params)).collect();
    format!("({})", parts.join(op))
}

/// One equality leaf, matching what [`FilterExpression::matches`] accepts.
///
/// Integers and booleans are told apart by `json_type`. Text can hold a
/// string, an identifier or a timestamp, so conversions that only hold for
/// one of those are guarded by the kind the item's type declares.
fn equals_sql(field: &str, value: &FieldValue, params: &mut Vec<Box<dyn ToSql>>) -> String {
    let path = bind(params, format!("$.\"{field}\""));
    let text_arm = |params: &mut Vec<Box<dyn ToSql>>, text: String| {
        let p = bind(params, text);
        format!("(json_type(fields, {path}) = 'text' AND json_extract(fields, {path}) = {p})")
    };
    let declared_text_arm = |params: &mut Vec<Box<dyn ToSql>>, text: String, kind: FieldKind| {
        let arm = text_arm(params, text);
        let name = bind(params, field.to_string());
        format!(
            "({arm} AND EXISTS (SELECT 1 FROM work_item_types t, json_each(t.fields_json) d \
             WHERE t.name = work_items.type_name \
             AND json_extract(d.value, '$.name') = {name} \
             AND json_extract(d.value, '$.kind') = '{kind}'))"
        )
    };
    let integer_arm = |params: &mut Vec<Box<dyn ToSql>>, n: i64| {
        let p = bind(params, n);
        format!("(json_type(fields, {path}) = 'integer' AND json_extract(fields, {path}) = {p})")
    };
    let bool_arm = |b: bool| format!("json_type(fields, {path}) = '{b}'");

    let mut arms = Vec::new();
    match value {
        FieldValue::String(s) | FieldValue::Identifier(s) => {
            arms.push(text_arm(params, s.clone()));
            if let Ok(ts) = DateTime::parse_from_rfc3339(s.trim()) {
                let canonical = format_timestamp(&ts.with_timezone(&Utc));
                if canonical != *s {
                    arms.push(declared_text_arm(params, canonical, FieldKind::Timestamp));
                }
            }
            if let Ok(n) = s.trim().parse::<i64>() {
                arms.push(integer_arm(params, n));
            }
            if let Ok(b) = s.trim().parse::<bool>() {
                arms.push(bool_arm(b));
            }
        }
        FieldValue::Integer(n) => {
            arms.push(integer_arm(params, *n));
            arms.push(declared_text_arm(params, n.to_string(), FieldKind::Identifier));
            if let Some(ts) = Utc.timestamp_micros(*n).single() {
                arms.push(declared_text_arm(params, format_timestamp(&ts), FieldKind::Timestamp));
            }
        }
        FieldValue::Bool(b) => arms.push(bool_arm(*b)),
        FieldValue::Timestamp(ts) => arms.push(text_arm(params, format_timestamp(ts))),
    }
    format!("({})", arms.join(" OR "))
}

fn bind<T: ToSql + 'static>(params: &mut Vec<Box<dyn ToSql>>, value: T) -> String {
    params.push(Box::new(value));
    format!("?{}", params.len())
}
