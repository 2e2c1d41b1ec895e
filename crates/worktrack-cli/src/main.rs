#![forbid(unsafe_code)]

mod cmd;
mod identity;
mod output;

use anyhow::Context as _;
use clap::{CommandFactory, Parser, Subcommand};
use output::OutputMode;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use worktrack_core::config::load_config;
use worktrack_core::store::Database;
use worktrack_core::{Service, TypeCache};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "wt: typed work items, iterations and filtered listing",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Act as this identity (skips env resolution).
    #[arg(long = "as", value_name = "IDENTITY", global = true)]
    identity: Option<String>,

    /// Project root holding `.worktrack/`. Defaults to the current directory.
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }

    fn identity_flag(&self) -> Option<&str> {
        self.identity.as_deref()
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Work items",
        about = "Create a work item",
        after_help = "EXAMPLES:\n    # Create a bug\n    wt create --type system.bug --title \"Crash on save\"\n\n    # Extra fields\n    wt create --title \"Login\" --field system.assignee=alice"
    )]
    Create(cmd::create::CreateArgs),

    #[command(next_help_heading = "Work items", about = "Show one work item")]
    Show(cmd::show::ShowArgs),

    #[command(
        next_help_heading = "Work items",
        about = "List work items with a filter and paging",
        after_help = "EXAMPLES:\n    # Open items, second page of 10\n    wt list --filter '{\"system.state\":\"open\"}' --offset 10 --limit 10\n\n    # Either state\n    wt list --filter '{\"$or\":[{\"system.state\":\"new\"},{\"system.state\":\"open\"}]}'"
    )]
    List(cmd::list::ListArgs),

    #[command(
        next_help_heading = "Work items",
        about = "Update a work item at a known version",
        after_help = "EXAMPLES:\n    # Close item 3, last seen at version 2\n    wt update 3 --version 2 --state closed\n\n    # Remove a field\n    wt update 3 --version 3 --unset system.assignee"
    )]
    Update(cmd::update::UpdateArgs),

    #[command(next_help_heading = "Work items", about = "Delete a work item")]
    Delete(cmd::delete::DeleteArgs),

    #[command(
        next_help_heading = "Schema",
        about = "List, publish or migrate work item types"
    )]
    Types(cmd::types::TypesArgs),

    #[command(
        next_help_heading = "Planning",
        about = "Manage iterations",
        after_help = "EXAMPLES:\n    wt iteration create --space core --name \"Sprint 1\" --start-at 2026-03-02T00:00:00Z --end-at 2026-03-16T00:00:00Z\n    wt iteration start 1\n    wt iteration list --space core"
    )]
    Iteration(cmd::iteration::IterationArgs),

    #[command(
        next_help_heading = "Setup",
        about = "Generate shell completions",
        after_help = "EXAMPLES:\n    wt completions bash > ~/.local/share/bash-completion/completions/wt"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("WORKTRACK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "worktrack=debug,info"
        } else {
            "worktrack=info,warn"
        })
    });

    let format = env::var("WORKTRACK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn open_service(
    project_root: &std::path::Path,
    output: OutputMode,
) -> anyhow::Result<cmd::WorkService> {
    let config = match load_config(project_root) {
        Ok(config) => config,
        Err(err) => {
            output::render_error(output, &output::CliError::config(&err))?;
            return Err(err);
        }
    };
    let path = config.database_path(project_root);
    let db = Database::open(&path, Duration::from_millis(config.database.busy_timeout_ms))
        .with_context(|| format!("open work item database {}", path.display()))?;
    info!(path = %path.display(), "opened database");
    Ok(Service::new(db, Arc::new(TypeCache::new()), config))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = cli.output_mode();
    let identity = cli.identity_flag();

    if let Commands::Completions(ref args) = cli.command {
        let mut command = Cli::command();
        return cmd::completions::run_completions(args, &mut command);
    }

    let project_root = cli.project.clone().map_or_else(env::current_dir, Ok)?;
    let service = open_service(&project_root, output)?;

    match cli.command {
        Commands::Create(ref args) => cmd::create::run_create(args, identity, output, &service),
        Commands::Show(ref args) => cmd::show::run_show(args, output, &service),
        Commands::List(ref args) => cmd::list::run_list(args, output, &service),
        Commands::Update(ref args) => cmd::update::run_update(args, identity, output, &service),
        Commands::Delete(ref args) => cmd::delete::run_delete(args, identity, output, &service),
        Commands::Types(ref args) => cmd::types::run_types(args, identity, output, &service),
        Commands::Iteration(ref args) => {
            cmd::iteration::run_iteration(args, identity, output, &service)
        }
        Commands::Completions(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmd::iteration::IterationCommand;
    use cmd::types::TypesCommand;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn json_and_identity_flags_are_global() {
        let cli = Cli::parse_from(["wt", "list", "--json", "--as", "alice"]);
        assert_eq!(cli.output_mode(), OutputMode::Json);
        assert_eq!(cli.identity_flag(), Some("alice"));
    }

    #[test]
    fn create_defaults_type_and_state() {
        let cli = Cli::parse_from(["wt", "create", "--title", "Crash", "-f", "points=3"]);
        let Commands::Create(args) = cli.command else {
            panic!("expected create");
        };
        assert_eq!(args.type_name, "system.userstory");
        assert_eq!(args.state, "new");
        assert_eq!(args.fields, vec!["points=3".to_string()]);
    }

    #[test]
    fn list_accepts_raw_paging_values() {
        let cli = Cli::parse_from(["wt", "list", "--offset", "abc", "--limit", "-5"]);
        let Commands::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.offset.as_deref(), Some("abc"));
        assert_eq!(args.limit, Some(-5));
        assert_eq!(args.filter, "");
    }

    #[test]
    fn update_requires_a_version() {
        assert!(Cli::try_parse_from(["wt", "update", "3", "--state", "closed"]).is_err());
        let cli = Cli::parse_from(["wt", "update", "3", "--version", "2", "--unset", "points"]);
        let Commands::Update(args) = cli.command else {
            panic!("expected update");
        };
        assert_eq!(args.id.as_str(), "3");
        assert_eq!(args.expected_version, 2);
        assert_eq!(args.unset, vec!["points".to_string()]);
    }

    #[test]
    fn types_defaults_to_list() {
        let cli = Cli::parse_from(["wt", "types"]);
        let Commands::Types(args) = cli.command else {
            panic!("expected types");
        };
        assert!(args.command.is_none());

        let cli = Cli::parse_from(["wt", "types", "publish", "task.json"]);
        let Commands::Types(args) = cli.command else {
            panic!("expected types");
        };
        assert!(matches!(args.command, Some(TypesCommand::Publish { .. })));
    }

    #[test]
    fn iteration_dates_are_validated_at_parse_time() {
        assert!(
            Cli::try_parse_from([
                "wt", "iteration", "create", "--space", "core", "--name", "S1", "--start-at",
                "tomorrow",
            ])
            .is_err()
        );

        let cli = Cli::parse_from([
            "wt",
            "iteration",
            "create",
            "--space",
            "core",
            "--name",
            "S1",
            "--start-at",
            "2026-03-02T00:00:00Z",
        ]);
        let Commands::Iteration(args) = cli.command else {
            panic!("expected iteration");
        };
        let IterationCommand::Create { schedule, .. } = args.command else {
            panic!("expected iteration create");
        };
        assert!(schedule.start_at.is_some());
        assert!(schedule.end_at.is_none());
    }

    #[test]
    fn completions_parse_shell() {
        let cli = Cli::parse_from(["wt", "completions", "zsh"]);
        assert!(matches!(cli.command, Commands::Completions(_)));
    }
}
