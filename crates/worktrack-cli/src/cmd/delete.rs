use clap::Args;
use serde::Serialize;
use worktrack_core::CancellationToken;
use worktrack_core::model::ItemId;

use super::{WorkService, report};
use crate::identity::require_identity;
use crate::output::{OutputMode, render_mode};

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Work item id.
    pub id: ItemId,
}

#[derive(Debug, Serialize)]
struct Deleted<'a> {
    id: &'a str,
    deleted: bool,
}

/// Execute `wt delete <id>`.
///
/// # Errors
///
/// Fails without an identity or when no item has the id.
pub fn run_delete(
    args: &DeleteArgs,
    identity_flag: Option<&str>,
    output: OutputMode,
    service: &WorkService,
) -> anyhow::Result<()> {
    let modifier = report(output, require_identity(identity_flag))?;
    let cancel = CancellationToken::new();
    report(
        output,
        service.transactional(&cancel, |app| app.work_items().delete(&args.id, &modifier)),
    )?;

    render_mode(
        output,
        &Deleted {
            id: args.id.as_str(),
            deleted: true,
        },
        |d, w| writeln!(w, "deleted work item {}", d.id),
    )
}
