//! `wt create`: create a work item of a published type.

use clap::Args;
use serde_json::Value;
use worktrack_core::CancellationToken;
use worktrack_core::model::item_type::{
    SYSTEM_DESCRIPTION, SYSTEM_STATE, SYSTEM_TITLE, SYSTEM_USERSTORY, STATE_NEW,
};
use worktrack_core::view::work_item_view;

use super::{WorkService, collect_fields, report};
use crate::identity::require_identity;
use crate::output::{OutputMode, render_view};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Work item type name.
    #[arg(long = "type", short = 't', default_value = SYSTEM_USERSTORY)]
    pub type_name: String,

    /// Sets `system.title`.
    #[arg(long)]
    pub title: Option<String>,

    /// Sets `system.state`.
    #[arg(long, default_value = STATE_NEW)]
    pub state: String,

    /// Sets `system.description`.
    #[arg(long)]
    pub description: Option<String>,

    /// Extra field as key=value. Repeatable.
    #[arg(long = "field", short = 'f', value_name = "KEY=VALUE")]
    pub fields: Vec<String>,

    /// Field payload as a JSON object.
    #[arg(long = "fields", value_name = "JSON")]
    pub fields_json: Option<String>,
}

/// Execute `wt create`.
///
/// # Errors
///
/// Fails without an identity, for an unknown type, for fields that do not
/// match the type, or when the store fails.
pub fn run_create(
    args: &CreateArgs,
    identity_flag: Option<&str>,
    output: OutputMode,
    service: &WorkService,
) -> anyhow::Result<()> {
    let creator = report(output, require_identity(identity_flag))?;
    let mut fields = report(output, collect_fields(&args.fields, args.fields_json.as_deref()))?;

    fields
        .entry(SYSTEM_STATE)
        .or_insert_with(|| Value::String(args.state.clone()));
    if let Some(title) = &args.title {
        fields.insert(SYSTEM_TITLE.to_string(), Value::String(title.clone()));
    }
    if let Some(description) = &args.description {
        fields.insert(SYSTEM_DESCRIPTION.to_string(), Value::String(description.clone()));
    }

    let cancel = CancellationToken::new();
    let item = report(
        output,
        service.transactional(&cancel, |app| {
            app.work_items().create(&args.type_name, &fields, &creator)
        }),
    )?;

    render_view(output, &work_item_view(&item, &service.config().api, &[]))
}
