//! `tally archive`: hide an item from the board without deleting it.

use anyhow::Result;
use clap::Args;
use tally_core::model::ItemPatch;

use super::{DispatchView, resolve_item};
use crate::output::render_success;
use crate::session::Session;

#[derive(Args, Debug)]
pub struct ArchiveArgs {
    /// Item id or title.
    pub item: String,

    /// Bring an archived item back.
    #[arg(long)]
    pub undo: bool,
}

/// # Errors
///
/// Unknown item or a storage error.
pub fn run_archive(args: &ArchiveArgs, session: &Session) -> Result<()> {
    let item = resolve_item(session, &args.item)?;
    let archived = !args.undo;
    let patch = ItemPatch {
        archived: (item.archived != archived).then_some(archived),
        ..ItemPatch::default()
    };
    let receipt = session.tracker.update_item(&item.id, patch)?;
    let dispatch = DispatchView::from(&receipt.dispatch);
    let verb = if archived { "Archived" } else { "Restored" };
    render_success(
        session.output,
        &format!("{verb} {}{}", receipt.value.title, dispatch.suffix()),
        &serde_json::json!({ "item": receipt.value, "dispatch": dispatch }),
    )
}
