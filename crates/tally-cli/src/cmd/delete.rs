//! `tally delete`: remove an item, as a tombstone by default.
//!
//! An item the server never confirmed is dropped locally together with its
//! queued changes.

use anyhow::Result;
use clap::Args;

use super::{DispatchView, resolve_item};
use crate::output::render_success;
use crate::session::Session;

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Item id or title.
    pub item: String,

    /// Remove the item for good instead of leaving a tombstone.
    #[arg(long)]
    pub hard: bool,
}

/// # Errors
///
/// Unknown item or a storage error.
pub fn run_delete(args: &DeleteArgs, session: &Session) -> Result<()> {
    let item = resolve_item(session, &args.item)?;
    let receipt = session.tracker.delete_item(&item.id, !args.hard)?;
    let dispatch = DispatchView::from(&receipt.dispatch);
    render_success(
        session.output,
        &format!("Deleted {} ({}){}", item.title, item.id, dispatch.suffix()),
        &serde_json::json!({
            "item_id": item.id,
            "soft": !args.hard,
            "dispatch": dispatch,
        }),
    )
}
