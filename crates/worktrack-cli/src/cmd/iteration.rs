//! `wt iteration`: manage iterations of a space.
//!
//! Views carry per-iteration work item totals in the `workitems`
//! relationship meta.

use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use worktrack_core::model::{Iteration, IterationId, IterationState};
use worktrack_core::view::{ResourceView, iteration_view, with_iteration_counts};
use worktrack_core::{AccessError, Application, CancellationToken};

use super::{WorkService, parse_timestamp, report};
use crate::identity::require_identity;
use crate::output::{OutputMode, render_view, render_views};

enum Rendered {
    One(ResourceView),
    Many(Vec<ResourceView>),
}

#[derive(Args, Debug)]
pub struct IterationArgs {
    #[command(subcommand)]
    pub command: IterationCommand,
}

#[derive(Args, Debug)]
pub struct Schedule {
    #[arg(long)]
    pub description: Option<String>,

    /// Start time, RFC 3339.
    #[arg(long, value_parser = parse_timestamp)]
    pub start_at: Option<DateTime<Utc>>,

    /// End time, RFC 3339. Must not precede the start.
    #[arg(long, value_parser = parse_timestamp)]
    pub end_at: Option<DateTime<Utc>>,
}

#[derive(Subcommand, Debug)]
pub enum IterationCommand {
    /// Create a top-level iteration in a space.
    Create {
        #[arg(long)]
        space: String,
        #[arg(long)]
        name: String,
        #[command(flatten)]
        schedule: Schedule,
    },
    /// Create an iteration under a parent; it joins the parent's space.
    Child {
        parent: String,
        #[arg(long)]
        name: String,
        #[command(flatten)]
        schedule: Schedule,
    },
    /// Show one iteration with its work item totals.
    Show { id: String },
    /// List the iterations of a space.
    List {
        #[arg(long)]
        space: String,
    },
    /// Change name, description or dates.
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        schedule: Schedule,
    },
    /// Move an iteration to `start`. Only one per space may be started.
    Start { id: String },
    /// Move an iteration to `close`.
    Close { id: String },
}

impl IterationCommand {
    const fn mutates(&self) -> bool {
        !matches!(self, Self::Show { .. } | Self::List { .. })
    }
}

fn counted_view(app: &Application<'_>, iteration: &Iteration) -> Result<ResourceView, AccessError> {
    let counts = app.iterations().item_counts(&iteration.space_id)?;
    Ok(iteration_view(
        iteration,
        &app.config().api,
        &[with_iteration_counts(&counts)],
    ))
}

fn transition(app: &Application<'_>, id: &str, state: IterationState) -> Result<Iteration, AccessError> {
    let repo = app.iterations();
    let mut iteration = repo.load(&IterationId::new(id))?;
    iteration.state = state;
    repo.save(&iteration)
}

fn run_one(app: &Application<'_>, command: &IterationCommand) -> Result<Rendered, AccessError> {
    let repo = app.iterations();
    let iteration = match command {
        IterationCommand::Create {
            space,
            name,
            schedule,
        } => repo.create(Iteration {
            space_id: space.clone(),
            name: name.clone(),
            description: schedule.description.clone(),
            start_at: schedule.start_at,
            end_at: schedule.end_at,
            ..Iteration::default()
        })?,
        IterationCommand::Child {
            parent,
            name,
            schedule,
        } => repo.create(Iteration {
            parent_id: Some(IterationId::new(parent.as_str())),
            name: name.clone(),
            description: schedule.description.clone(),
            start_at: schedule.start_at,
            end_at: schedule.end_at,
            ..Iteration::default()
        })?,
        IterationCommand::Show { id } => repo.load(&IterationId::new(id.as_str()))?,
        IterationCommand::List { space } => {
            let counts = repo.item_counts(space)?;
            let transforms = [with_iteration_counts(&counts)];
            let views = repo
                .list_for_space(space)?
                .iter()
                .map(|it| iteration_view(it, &app.config().api, &transforms))
                .collect();
            return Ok(Rendered::Many(views));
        }
        IterationCommand::Update { id, name, schedule } => {
            let mut iteration = repo.load(&IterationId::new(id.as_str()))?;
            if let Some(name) = name {
                iteration.name.clone_from(name);
            }
            if schedule.description.is_some() {
                iteration.description.clone_from(&schedule.description);
            }
            if schedule.start_at.is_some() {
                iteration.start_at = schedule.start_at;
            }
            if schedule.end_at.is_some() {
                iteration.end_at = schedule.end_at;
            }
            repo.save(&iteration)?
        }
        IterationCommand::Start { id } => transition(app, id, IterationState::Start)?,
        IterationCommand::Close { id } => transition(app, id, IterationState::Close)?,
    };
    counted_view(app, &iteration).map(Rendered::One)
}

/// Execute `wt iteration <command>`.
///
/// # Errors
///
/// Fails without an identity on mutating subcommands, for unknown ids,
/// invalid attributes, a second started iteration, or a store failure.
pub fn run_iteration(
    args: &IterationArgs,
    identity_flag: Option<&str>,
    output: OutputMode,
    service: &WorkService,
) -> anyhow::Result<()> {
    if args.command.mutates() {
        let who = report(output, require_identity(identity_flag))?;
        tracing::debug!(by = %who, "iteration change requested");
    }

    let cancel = CancellationToken::new();
    match report(
        output,
        service.transactional(&cancel, |app| run_one(app, &args.command)),
    )? {
        Rendered::One(view) => render_view(output, &view),
        Rendered::Many(views) => render_views(output, &views),
    }
}
