//! `tally list`: the day's board.

use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tally_core::model::{DayKey, Symbol, TrackedItem};

use super::{day_or_today, describe_schedule, describe_tracking};
use crate::output::{pretty_section, render_mode};
use crate::session::Session;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Day to show (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub day: Option<String>,

    /// Include archived items.
    #[arg(long)]
    pub all: bool,
}

/// One row of the listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub goal: String,
    pub schedule: String,
    pub symbol: Symbol,
    pub due: bool,
    pub archived: bool,
    /// Local changes not yet confirmed by the server.
    pub pending: bool,
}

#[derive(Debug, Serialize)]
pub struct ListOutput {
    pub day: DayKey,
    pub items: Vec<ListRow>,
}

fn row(item: &TrackedItem, day: DayKey, pending: bool) -> ListRow {
    ListRow {
        id: item.id.clone(),
        title: item.title.clone(),
        goal: describe_tracking(&item.tracking),
        schedule: describe_schedule(&item.schedule),
        symbol: item.symbol_on(day),
        due: item.is_due(day),
        archived: item.archived,
        pending,
    }
}

fn rows(session: &Session, day: DayKey, all: bool) -> Vec<ListRow> {
    let outbox = session.tracker.outbox();
    let mut items: Vec<TrackedItem> = if all {
        session
            .tracker
            .store()
            .snapshot()
            .into_values()
            .filter(|item| !item.is_deleted())
            .collect()
    } else {
        session.tracker.active_items()
    };
    items.sort_by_key(|item| (item.archived, item.title.to_lowercase()));
    items
        .iter()
        .map(|item| row(item, day, outbox.has_pending_for(&item.id)))
        .collect()
}

fn render_text(out: &ListOutput, w: &mut dyn Write) -> io::Result<()> {
    for row in &out.items {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}",
            row.id,
            row.symbol,
            if row.due { "due" } else { "-" },
            row.title,
            row.goal
        )?;
    }
    Ok(())
}

fn render_pretty(out: &ListOutput, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Tally for {}", out.day))?;
    if out.items.is_empty() {
        writeln!(w, "Nothing tracked yet. Try `tally add \"Read\"`.")?;
        return Ok(());
    }
    for row in &out.items {
        let mut flags = Vec::new();
        if row.archived {
            flags.push("archived");
        }
        if row.pending {
            flags.push("unsynced");
        }
        if !row.due && !row.archived {
            flags.push("not due");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", flags.join(", "))
        };
        writeln!(
            w,
            "{} {:<28} {:<10} {}{flags}",
            row.symbol.glyph(),
            row.title,
            row.goal,
            row.schedule
        )?;
    }
    Ok(())
}

/// # Errors
///
/// A malformed `--day` or an output failure.
pub fn run_list(args: &ListArgs, session: &Session) -> Result<()> {
    let day = day_or_today(args.day.as_deref())?;
    let out = ListOutput {
        day,
        items: rows(session, day, args.all),
    };
    render_mode(session.output, &out, render_text, render_pretty)
}
