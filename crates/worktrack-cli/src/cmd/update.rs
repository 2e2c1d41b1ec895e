//! `wt update`: versioned partial update of a work item.
//!
//! The caller passes the version it last saw. A stale version fails with a
//! conflict and nothing is written; reload with `wt show` and retry.

use clap::Args;
use serde_json::Value;
use worktrack_core::CancellationToken;
use worktrack_core::model::item_type::{SYSTEM_STATE, SYSTEM_TITLE};
use worktrack_core::model::{ItemId, WorkItemUpdate};
use worktrack_core::view::work_item_view;

use super::{WorkService, collect_fields, report};
use crate::identity::require_identity;
use crate::output::{OutputMode, render_view};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Work item id.
    pub id: ItemId,

    /// Version the change is based on.
    #[arg(long = "version", short = 'V')]
    pub expected_version: u64,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub state: Option<String>,

    /// Field to set as key=value. Repeatable.
    #[arg(long = "field", short = 'f', value_name = "KEY=VALUE")]
    pub fields: Vec<String>,

    /// Field to remove. Repeatable.
    #[arg(long, value_name = "KEY")]
    pub unset: Vec<String>,

    /// Field changes as a JSON object; null removes.
    #[arg(long = "fields", value_name = "JSON")]
    pub fields_json: Option<String>,
}

/// Execute `wt update`.
///
/// # Errors
///
/// Fails without an identity, on a version conflict, for an unknown id, or
/// for field values that do not match the item's type.
pub fn run_update(
    args: &UpdateArgs,
    identity_flag: Option<&str>,
    output: OutputMode,
    service: &WorkService,
) -> anyhow::Result<()> {
    let modifier = report(output, require_identity(identity_flag))?;
    let mut fields = report(output, collect_fields(&args.fields, args.fields_json.as_deref()))?;
    if let Some(title) = &args.title {
        fields.insert(SYSTEM_TITLE.to_string(), Value::String(title.clone()));
    }
    if let Some(state) = &args.state {
        fields.insert(SYSTEM_STATE.to_string(), Value::String(state.clone()));
    }
    for key in &args.unset {
        fields.insert(key.clone(), Value::Null);
    }

    let update = WorkItemUpdate {
        id: args.id.clone(),
        version: args.expected_version,
        fields,
    };
    let cancel = CancellationToken::new();
    let item = report(
        output,
        service.transactional(&cancel, |app| app.work_items().save(&update, &modifier)),
    )?;

    render_view(output, &work_item_view(&item, &service.config().api, &[]))
}
