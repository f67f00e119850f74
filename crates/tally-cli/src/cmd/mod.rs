//! Subcommand implementations.
//!
//! Each module exposes an `Args` struct for clap and a `run_*` function that
//! takes an opened [`Session`].

pub mod add;
pub mod archive;
pub mod completions;
pub mod delete;
pub mod edit;
pub mod init;
pub mod list;
pub mod log;
pub mod outbox;
pub mod show;
pub mod status;
pub mod sync;
pub mod timer;

use serde::Serialize;
use tally_core::TallyError;
use tally_core::model::{DayKey, Schedule, TrackedItem, Tracking};
use tally_core::tracker::{Dispatch, QueueReason};

use crate::session::Session;

/// Today in local time, or the `--day` the user passed.
///
/// # Errors
///
/// A malformed `--day`.
pub fn day_or_today(raw: Option<&str>) -> Result<DayKey, TallyError> {
    match raw {
        Some(raw) => Ok(DayKey::parse(raw)?),
        None => Ok(DayKey::from_date(chrono::Local::now().date_naive())),
    }
}

/// Resolve an id or title to a live item.
///
/// # Errors
///
/// [`TallyError::NotFound`] when nothing matches.
pub fn resolve_item(session: &Session, key: &str) -> Result<TrackedItem, TallyError> {
    session
        .tracker
        .find(key)
        .filter(|item| !item.is_deleted())
        .ok_or_else(|| TallyError::NotFound(key.to_string()))
}

#[must_use]
pub fn describe_tracking(tracking: &Tracking) -> String {
    match tracking {
        Tracking::Binary => "binary".to_string(),
        Tracking::Quantitative { unit, target } => format!("{target} {unit}"),
        Tracking::TimeBased { target_seconds } => format!("{}m", target_seconds / 60),
    }
}

#[must_use]
pub fn describe_schedule(schedule: &Schedule) -> String {
    match schedule {
        Schedule::Daily => "daily".to_string(),
        Schedule::Weekdays { days } => days
            .iter()
            .map(|d| d.to_string().to_lowercase())
            .collect::<Vec<_>>()
            .join(","),
        Schedule::TimesPerWeek { times } => format!("{times}x/week"),
    }
}

/// Where a command's network half ended up, for output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchView {
    Delivered,
    Queued { seq: u64, reason: String },
    Rejected { error: String },
    Unchanged,
}

impl From<&Dispatch> for DispatchView {
    fn from(dispatch: &Dispatch) -> Self {
        match dispatch {
            Dispatch::Delivered => Self::Delivered,
            Dispatch::Queued { seq, reason } => Self::Queued {
                seq: *seq,
                reason: match reason {
                    QueueReason::NotReady => "offline".to_string(),
                    QueueReason::Behind => "behind earlier changes".to_string(),
                    QueueReason::Retryable(err) => err.to_string(),
                },
            },
            Dispatch::Rejected(err) => Self::Rejected {
                error: err.to_string(),
            },
            Dispatch::Unchanged => Self::Unchanged,
        }
    }
}

impl DispatchView {
    /// Suffix appended to success lines.
    #[must_use]
    pub fn suffix(&self) -> String {
        match self {
            Self::Delivered => " (synced)".to_string(),
            Self::Queued { seq, reason } => format!(" (queued #{seq}: {reason})"),
            Self::Rejected { error } => format!(" (server refused: {error})"),
            Self::Unchanged => String::new(),
        }
    }
}
