//! `wt show`: display one work item.

use clap::Args;
use worktrack_core::CancellationToken;
use worktrack_core::model::ItemId;
use worktrack_core::view::work_item_view;

use super::{WorkService, report};
use crate::output::{OutputMode, render_view};

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Work item id.
    pub id: ItemId,
}

/// Execute `wt show <id>`.
///
/// # Errors
///
/// Fails when no item has the id or the store fails.
pub fn run_show(args: &ShowArgs, output: OutputMode, service: &WorkService) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let item = report(
        output,
        service.transactional(&cancel, |app| app.work_items().load(&args.id)),
    )?;
    render_view(output, &work_item_view(&item, &service.config().api, &[]))
}
