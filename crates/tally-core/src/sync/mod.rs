//! Sync status state machine and per-cycle reporting.

pub mod controller;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ErrorCode;
use crate::outbox::{DrainReport, IdRemap};
use crate::reconcile::MergeStats;

pub use controller::{SyncController, SyncSettings, TriggerOutcome};

/// Sync progress as shown to the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    Success,
    Error(String),
}

impl SyncState {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Success => "success",
            Self::Error(_) => "error",
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Validate a transition against the cycle:
    /// `Idle -> Syncing -> {Success, Error} -> Idle`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSyncTransition`] for anything outside that cycle.
    pub fn can_transition_to(&self, target: &Self) -> Result<(), InvalidSyncTransition> {
        let allowed = matches!(
            (self, target),
            (Self::Idle, Self::Syncing)
                | (Self::Syncing, Self::Success | Self::Error(_))
                | (Self::Success | Self::Error(_), Self::Idle)
        );
        if allowed {
            Ok(())
        } else {
            Err(InvalidSyncTransition {
                from: self.label(),
                to: target.label(),
            })
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(msg) => write!(f, "error ({msg})"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidSyncTransition {
    pub from: &'static str,
    pub to: &'static str,
}

impl InvalidSyncTransition {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::InvalidSyncTransition
    }
}

impl fmt::Display for InvalidSyncTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: sync cannot move from {} to {}", self.code(), self.from, self.to)
    }
}

impl std::error::Error for InvalidSyncTransition {}

/// Delivered to every subscriber on each state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncEvent {
    pub from: SyncState,
    pub to: SyncState,
    pub at: DateTime<Utc>,
}

/// Summary of one completed sync cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub delivered: usize,
    pub retained: usize,
    pub dropped: usize,
    pub deferred: usize,
    /// Messages of mutations the server rejected for good.
    pub rejected: Vec<String>,
    pub remaps: Vec<IdRemap>,
    pub merge: MergeStats,
}

impl SyncReport {
    pub(crate) fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        drain: &DrainReport,
        merge: MergeStats,
    ) -> Self {
        Self {
            started_at,
            finished_at,
            delivered: drain.succeeded.len(),
            retained: drain.retained(),
            dropped: drain.dropped(),
            deferred: drain.deferred.len(),
            rejected: drain
                .failed
                .iter()
                .filter(|f| !f.retained)
                .map(|f| format!("{} {}: {}", f.entry.mutation.label(), f.entry.mutation.target_id(), f.error))
                .collect(),
            remaps: drain.remaps.clone(),
            merge,
        }
    }

    /// Nothing was sent and nothing changed locally.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.delivered == 0
            && self.dropped == 0
            && self.merge.adopted == 0
            && self.merge.dropped == 0
            && self.merge.days_local == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_transitions_are_allowed() {
        assert!(SyncState::Idle.can_transition_to(&SyncState::Syncing).is_ok());
        assert!(SyncState::Syncing.can_transition_to(&SyncState::Success).is_ok());
        assert!(
            SyncState::Syncing
                .can_transition_to(&SyncState::Error("x".into()))
                .is_ok()
        );
        assert!(SyncState::Success.can_transition_to(&SyncState::Idle).is_ok());
        assert!(SyncState::Error("x".into()).can_transition_to(&SyncState::Idle).is_ok());
    }

    #[test]
    fn shortcuts_are_rejected() {
        let err = SyncState::Idle.can_transition_to(&SyncState::Success).unwrap_err();
        assert_eq!(err, InvalidSyncTransition { from: "idle", to: "success" });
        assert!(SyncState::Success.can_transition_to(&SyncState::Syncing).is_err());
        assert!(SyncState::Syncing.can_transition_to(&SyncState::Idle).is_err());
        assert!(SyncState::Idle.can_transition_to(&SyncState::Idle).is_err());
    }

    #[test]
    fn state_serializes_with_error_message() {
        let json = serde_json::to_value(SyncState::Error("unauthenticated".into())).unwrap();
        assert_eq!(json["state"], "error");
        assert_eq!(json["error"], "unauthenticated");
        let idle = serde_json::to_value(SyncState::Idle).unwrap();
        assert_eq!(idle["state"], "idle");
    }
}
