//! `tally outbox`: local changes waiting for the server.

use std::io::{self, Write};

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tally_core::model::OutboxEntry;

use crate::output::{age, pretty_section, render_mode};
use crate::session::Session;

#[derive(Args, Debug)]
pub struct OutboxArgs {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboxRow {
    pub seq: u64,
    pub op: &'static str,
    pub target: String,
    pub queued_at: DateTime<Utc>,
}

impl From<&OutboxEntry> for OutboxRow {
    fn from(entry: &OutboxEntry) -> Self {
        Self {
            seq: entry.seq,
            op: entry.mutation.label(),
            target: entry.mutation.target_id().to_string(),
            queued_at: entry.queued_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OutboxOutput {
    pub now: DateTime<Utc>,
    pub pending: Vec<OutboxRow>,
}

fn render_text(out: &OutboxOutput, w: &mut dyn Write) -> io::Result<()> {
    for row in &out.pending {
        writeln!(w, "{}\t{}\t{}\t{}", row.seq, row.op, row.target, row.queued_at.to_rfc3339())?;
    }
    Ok(())
}

fn render_pretty(out: &OutboxOutput, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Outbox ({} pending)", out.pending.len()))?;
    if out.pending.is_empty() {
        writeln!(w, "Everything is synced.")?;
    }
    for row in &out.pending {
        writeln!(
            w,
            "#{:<4} {:<20} {:<24} {}",
            row.seq,
            row.op,
            row.target,
            age(out.now - row.queued_at)
        )?;
    }
    Ok(())
}

/// # Errors
///
/// Output failures only.
pub fn run_outbox(_args: &OutboxArgs, session: &Session) -> Result<()> {
    let out = OutboxOutput {
        now: Utc::now(),
        pending: session.tracker.outbox().peek().iter().map(OutboxRow::from).collect(),
    };
    render_mode(session.output, &out, render_text, render_pretty)
}
