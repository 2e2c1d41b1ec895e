//! `wt list`: filtered, paged listing of work items.

use clap::Args;
use worktrack_core::CancellationToken;
use worktrack_core::view::ListDocument;

use super::{WorkService, report};
use crate::output::{OutputMode, render_list};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Filter as a JSON object of field/value pairs; `$or` takes an array.
    #[arg(long, short = 'F', default_value = "")]
    pub filter: String,

    /// Offset of the first item. Unparseable values mean 0.
    #[arg(long)]
    pub offset: Option<String>,

    /// Page size, clamped to the configured maximum.
    #[arg(long, short = 'n', allow_negative_numbers = true)]
    pub limit: Option<i64>,
}

/// Execute `wt list`.
///
/// # Errors
///
/// Fails for a malformed filter, a filter literal that does not convert,
/// or a store failure.
pub fn run_list(args: &ListArgs, output: OutputMode, service: &WorkService) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let page = report(
        output,
        service.transactional(&cancel, |app| {
            app.work_items()
                .list(&args.filter, args.offset.as_deref(), args.limit)
        }),
    )?;

    tracing::debug!(total = page.total, shown = page.items.len(), "listed work items");
    render_list(
        output,
        &ListDocument::from_page(&page, &service.config().api, &[]),
    )
}
