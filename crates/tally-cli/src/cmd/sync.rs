//! `tally sync`: deliver queued changes and merge the server copy.

use std::io::{self, Write};

use anyhow::Result;
use clap::Args;
use tally_core::sync::{SyncReport, TriggerOutcome};

use crate::output::{pretty_kv, pretty_section, render_mode};
use crate::session::Session;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Respect the minimum sync interval instead of syncing right away.
    #[arg(long)]
    pub throttled: bool,
}

fn render_text(report: &SyncReport, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "delivered={} retained={} dropped={} adopted={} merged={}",
        report.delivered, report.retained, report.dropped, report.merge.adopted, report.merge.merged
    )
}

fn render_pretty(report: &SyncReport, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Sync complete")?;
    pretty_kv(w, "delivered", report.delivered.to_string())?;
    if report.retained > 0 {
        pretty_kv(w, "still queued", report.retained.to_string())?;
    }
    if report.deferred > 0 {
        pretty_kv(w, "deferred", report.deferred.to_string())?;
    }
    for remap in &report.remaps {
        pretty_kv(w, "confirmed", format!("{} -> {}", remap.from, remap.to))?;
    }
    for rejected in &report.rejected {
        pretty_kv(w, "refused", rejected)?;
    }
    pretty_kv(
        w,
        "items",
        format!(
            "{} new, {} merged, {} local only, {} removed",
            report.merge.adopted, report.merge.merged, report.merge.kept_local, report.merge.dropped
        ),
    )?;
    pretty_kv(
        w,
        "days",
        format!("{} kept local, {} from server", report.merge.days_local, report.merge.days_remote),
    )
}

/// # Errors
///
/// The cycle's failure: not signed in, offline, an unreachable remote, a
/// malformed server copy, or a storage error. Local data is left as it was.
pub fn run_sync(args: &SyncArgs, session: &Session) -> Result<()> {
    let outcome = if args.throttled {
        session.controller.trigger_sync()?
    } else {
        session.controller.force_sync()?
    };
    match outcome {
        TriggerOutcome::Ran(report) | TriggerOutcome::Joined(report) => {
            render_mode(session.output, &report, render_text, render_pretty)
        }
        TriggerOutcome::Nested => render_mode(
            session.output,
            &serde_json::json!({ "nested": true }),
            |_, w| writeln!(w, "sync already running"),
            |_, w| writeln!(w, "A sync is already running."),
        ),
        TriggerOutcome::Throttled { retry_after } => {
            let secs = retry_after.num_seconds().max(1);
            render_mode(
                session.output,
                &serde_json::json!({ "throttled": true, "retry_after_secs": secs }),
                |_, w| writeln!(w, "throttled; retry in {secs}s"),
                |_, w| writeln!(w, "Synced recently; next sync allowed in {secs}s."),
            )
        }
    }
}
