pub mod completions;
pub mod create;
pub mod delete;
pub mod iteration;
pub mod list;
pub mod show;
pub mod types;
pub mod update;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use worktrack_core::store::Database;
use worktrack_core::{AccessError, Service};

use crate::output::{CliError, OutputMode, render_error};

/// The service every command runs against.
pub type WorkService = Service<Database>;

/// Render an access-layer failure, then hand it back for the exit status.
pub fn report<T>(output: OutputMode, result: Result<T, AccessError>) -> anyhow::Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            if err.is_client_error() {
                tracing::debug!(code = %err.code(), error = %err, "request rejected");
            } else {
                tracing::error!(code = %err.code(), error = %err, "request failed");
            }
            render_error(output, &CliError::from(&err))?;
            Err(err.into())
        }
    }
}

/// Build a field payload from `--fields` JSON and repeated `--field key=value`.
///
/// Pairs are applied after the JSON object, so they win on conflicts. A
/// pair's value is sent as text; the literal `null` removes the field.
pub fn collect_fields(pairs: &[String], json: Option<&str>) -> Result<Map<String, Value>, AccessError> {
    let mut fields = match json {
        None => Map::new(),
        Some(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(bad_fields("expected a JSON object")),
            Err(e) => return Err(bad_fields(&e.to_string())),
        },
    };

    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| bad_field_pair(pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(bad_field_pair(pair));
        }
        let value = if value == "null" {
            Value::Null
        } else {
            Value::String(value.to_string())
        };
        fields.insert(key.to_string(), value);
    }
    Ok(fields)
}

fn bad_fields(reason: &str) -> AccessError {
    AccessError::BadParameter {
        parameter: "fields".to_string(),
        reason: reason.to_string(),
    }
}

fn bad_field_pair(pair: &str) -> AccessError {
    AccessError::BadParameter {
        parameter: "field".to_string(),
        reason: format!("expected key=value, got '{pair}'"),
    }
}

/// Clap value parser for RFC 3339 timestamps.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}
