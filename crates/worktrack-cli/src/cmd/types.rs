//! `wt types`: inspect and publish work item types.

use anyhow::Context as _;
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use worktrack_core::CancellationToken;
use worktrack_core::model::WorkItemType;

use super::{WorkService, report};
use crate::identity::require_identity;
use crate::output::{OutputMode, render_mode, rule};

#[derive(Args, Debug)]
pub struct TypesArgs {
    #[command(subcommand)]
    pub command: Option<TypesCommand>,
}

#[derive(Subcommand, Debug)]
pub enum TypesCommand {
    /// List every published type and its fields (the default).
    List,
    /// Publish a new type from a JSON schema file.
    Publish {
        /// File holding one type: `{"name": .., "fields": [..]}`.
        file: PathBuf,
    },
    /// Upsert a set of types from a JSON array file and reset the type cache.
    Migrate {
        /// File holding an array of types.
        file: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct TypeList {
    data: Vec<WorkItemType>,
}

fn write_types(list: &TypeList, w: &mut dyn Write) -> io::Result<()> {
    for wit in &list.data {
        writeln!(w, "{}", wit.name)?;
        rule(w)?;
        for field in &wit.fields {
            let required = if field.required { "required" } else { "" };
            writeln!(w, "  {:<28} {:<12} {required}", field.name, field.kind)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read type schema {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse type schema {}", path.display()))
}

/// Execute `wt types [list|publish|migrate]`.
///
/// # Errors
///
/// Fails for unreadable schema files, invalid schemas, a missing identity
/// on publish/migrate, or a store failure.
pub fn run_types(
    args: &TypesArgs,
    identity_flag: Option<&str>,
    output: OutputMode,
    service: &WorkService,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let types = match args.command.as_ref().unwrap_or(&TypesCommand::List) {
        TypesCommand::List => report(
            output,
            service.transactional(&cancel, |app| app.work_items().types()),
        )?,
        TypesCommand::Publish { file } => {
            let who = report(output, require_identity(identity_flag))?;
            let wit: WorkItemType = read_json(file)?;
            let published = report(
                output,
                service.transactional(&cancel, |app| app.work_items().publish_type(wit)),
            )?;
            tracing::info!(type_name = %published.name, by = %who, "published type via cli");
            vec![published]
        }
        TypesCommand::Migrate { file } => {
            let who = report(output, require_identity(identity_flag))?;
            let wits: Vec<WorkItemType> = read_json(file)?;
            let migrated = report(
                output,
                service.transactional(&cancel, |app| {
                    app.work_items().migrate_types(&wits)?;
                    app.work_items().types()
                }),
            )?;
            tracing::info!(count = wits.len(), by = %who, "migrated types via cli");
            migrated
        }
    };

    let list = TypeList {
        data: types.iter().map(|t| t.as_ref().clone()).collect(),
    };
    render_mode(output, &list, write_types)
}
