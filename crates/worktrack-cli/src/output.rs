//! Shared output layer for human/JSON parity across all CLI commands.
//!
//! Every command handler receives an [`OutputMode`]. JSON output is the
//! resource view or list document exactly as the access layer builds it;
//! human output is a compact rendering of the same data.

use serde::Serialize;
use serde_json::Value;
use std::io::{self, Write};
use worktrack_core::{AccessError, ErrorCode};
use worktrack_core::view::{ListDocument, ResourceView};

/// Shared width for human separators.
pub const RULE_WIDTH: usize = 72;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

pub fn rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = RULE_WIDTH)
}

/// Render a left-aligned key/value line in human output.
pub fn kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<20} {}", format!("{key}:"), value.as_ref())
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Structured error for CLI output, mirrored on stderr.
#[derive(Debug, Clone, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Stable `E####` code.
    pub error_code: String,
}

impl From<&AccessError> for CliError {
    fn from(err: &AccessError) -> Self {
        Self {
            message: err.to_string(),
            suggestion: err.hint().map(str::to_string),
            error_code: err.code().code().to_string(),
        }
    }
}

impl CliError {
    /// A configuration file that could not be loaded.
    pub fn config(err: &anyhow::Error) -> Self {
        let code = ErrorCode::ConfigParseError;
        Self {
            message: format!("{}: {err:#}", code.message()),
            suggestion: code.hint().map(str::to_string),
            error_code: code.code().to_string(),
        }
    }
}

/// Render an error to stderr.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, &serde_json::json!({ "error": error }))?;
            writeln!(out)?;
        }
        OutputMode::Human => {
            writeln!(out, "error[{}]: {}", error.error_code, error.message)?;
            if let Some(ref suggestion) = error.suggestion {
                writeln!(out, "  suggestion: {suggestion}")?;
            }
        }
    }
    Ok(())
}

/// Write one resource view in human form.
pub fn write_view(w: &mut dyn Write, view: &ResourceView) -> io::Result<()> {
    writeln!(w, "{} {}", view.kind, view.id)?;
    rule(w)?;
    for (key, value) in &view.attributes {
        kv(w, key, scalar(value))?;
    }
    for (name, rel) in &view.relationships {
        if let Some(data) = &rel.data {
            kv(w, name, format!("{} {}", data.kind, data.id))?;
        }
        if !rel.meta.is_empty() {
            let meta = rel
                .meta
                .iter()
                .map(|(k, v)| format!("{k}={}", scalar(v)))
                .collect::<Vec<_>>()
                .join(" ");
            kv(w, name, meta)?;
        }
    }
    Ok(())
}

/// Render a single resource view to stdout.
pub fn render_view(mode: OutputMode, view: &ResourceView) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, view)?;
            writeln!(out)?;
        }
        OutputMode::Human => write_view(&mut out, view)?,
    }
    Ok(())
}

/// Render several views (not paged) to stdout.
pub fn render_views(mode: OutputMode, views: &[ResourceView]) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, &serde_json::json!({ "data": views }))?;
            writeln!(out)?;
        }
        OutputMode::Human => {
            if views.is_empty() {
                writeln!(out, "(none)")?;
            }
            for view in views {
                write_view(&mut out, view)?;
                writeln!(out)?;
            }
        }
    }
    Ok(())
}

/// Write a page of work items as a table with its navigation links.
pub fn write_list(w: &mut dyn Write, doc: &ListDocument) -> io::Result<()> {
    writeln!(w, "{:<8} {:<8} {:<14} {:<18} TITLE", "ID", "VERSION", "STATE", "TYPE")?;
    rule(w)?;
    for view in &doc.data {
        let attr = |key: &str| view.attributes.get(key).map(scalar).unwrap_or_default();
        let type_name = view
            .relationships
            .get("baseType")
            .and_then(|r| r.data.as_ref())
            .map(|d| d.id.as_str())
            .unwrap_or_default();
        writeln!(
            w,
            "{:<8} {:<8} {:<14} {:<18} {}",
            view.id,
            attr("version"),
            attr("system.state"),
            type_name,
            attr("system.title"),
        )?;
    }
    writeln!(w, "\n{} total", doc.meta.total_count)?;
    for (name, link) in [
        ("prev", &doc.links.prev),
        ("next", &doc.links.next),
        ("last", &doc.links.last),
    ] {
        if let Some(link) = link {
            kv(w, name, link)?;
        }
    }
    Ok(())
}

pub fn render_list(mode: OutputMode, doc: &ListDocument) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, doc)?;
            writeln!(out)?;
        }
        OutputMode::Human => write_list(&mut out, doc)?,
    }
    Ok(())
}

/// Render a serializable value with an explicit human renderer.
pub fn render_mode<T: Serialize>(
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Human => human_fn(value, &mut out)?,
    }
    Ok(())
}
