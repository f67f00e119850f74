//! `tally status`: identity, connectivity, and sync health.

use std::io::{self, Write};

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use crate::output::{age, pretty_kv, pretty_section, render_mode};
use crate::session::Session;

#[derive(Args, Debug)]
pub struct StatusArgs {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusOutput {
    pub workspace: String,
    pub actor: String,
    pub signed_in: bool,
    pub remote: Option<String>,
    pub can_sync: bool,
    pub items: usize,
    pub pending: usize,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub now: DateTime<Utc>,
}

impl StatusOutput {
    fn when(&self, at: Option<DateTime<Utc>>) -> String {
        at.map_or_else(|| "never".to_string(), |at| age(self.now - at))
    }

    /// One-word health summary.
    #[must_use]
    pub fn health(&self) -> &'static str {
        if !self.signed_in {
            "signed out"
        } else if self.remote.is_none() {
            "local only"
        } else if !self.can_sync {
            "offline"
        } else if self.last_error.is_some() {
            "failing"
        } else if self.pending > 0 {
            "pending"
        } else {
            "synced"
        }
    }
}

fn render_text(out: &StatusOutput, w: &mut dyn Write) -> io::Result<()> {
    writeln!(
        w,
        "{}\tpending={}\tlast_success={}",
        out.health(),
        out.pending,
        out.last_success.map_or_else(|| "never".to_string(), |at| at.to_rfc3339())
    )
}

fn render_pretty(out: &StatusOutput, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, "Tally status")?;
    pretty_kv(w, "health", out.health())?;
    pretty_kv(w, "workspace", &out.workspace)?;
    pretty_kv(
        w,
        "actor",
        if out.signed_in { out.actor.as_str() } else { "(not set)" },
    )?;
    pretty_kv(w, "remote", out.remote.as_deref().unwrap_or("(none)"))?;
    pretty_kv(w, "items", out.items.to_string())?;
    pretty_kv(w, "unsynced", out.pending.to_string())?;
    pretty_kv(w, "last attempt", out.when(out.last_attempt))?;
    pretty_kv(w, "last success", out.when(out.last_success))?;
    if let Some(err) = &out.last_error {
        pretty_kv(w, "last error", err)?;
    }
    Ok(())
}

/// # Errors
///
/// A corrupt `sync.json` or an output failure.
pub fn run_status(_args: &StatusArgs, session: &Session) -> Result<()> {
    let marker = session.load_marker()?;
    let out = StatusOutput {
        workspace: session.root.display().to_string(),
        actor: session.tracker.actor().to_string(),
        signed_in: session.is_signed_in(),
        remote: session.remote_dir().map(|dir| dir.display().to_string()),
        can_sync: session.can_sync(),
        items: session.tracker.store().snapshot().values().filter(|i| !i.is_deleted()).count(),
        pending: session.tracker.outbox().len(),
        last_attempt: marker.last_attempt,
        last_success: marker.last_success,
        last_error: marker.last_error,
        now: Utc::now(),
    };
    render_mode(session.output, &out, render_text, render_pretty)
}
