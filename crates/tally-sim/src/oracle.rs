use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tally_core::gateway::memory::RemoteState;
use tally_core::model::id::is_temp_id;
use tally_core::model::{DayKey, Snapshot};
use tally_core::sync::SyncState;

use crate::device::{Device, WrittenDay};

// ── Core result types ─────────────────────────────────────────────────────────

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleResult {
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Accumulate another result's failures into this one.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

/// A single failed check, with enough context to replay and inspect it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    /// A device's store differs from the server after quiescing.
    Divergence {
        device: usize,
        missing: Vec<String>,
        extra: Vec<String>,
        differing: Vec<String>,
    },
    /// The server holds an older record (or none) for a day a device wrote
    /// and never saw rejected.
    LostWrite {
        device: usize,
        item_id: String,
        day: DayKey,
        written_at: DateTime<Utc>,
        held_at: Option<DateTime<Utc>>,
    },
    /// Mutations still queued after fault-free sync rounds.
    OutboxNotEmpty { device: usize, pending: usize },
    /// The last sync cycle did not end in `Success`.
    NotSettled { device: usize, state: String },
    /// A fault-free quiesce sync returned an error.
    QuiesceFailed { device: usize, error: String },
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Divergence {
                device,
                missing,
                extra,
                differing,
            } => write!(
                f,
                "device {device} diverged: missing={missing:?} extra={extra:?} differing={differing:?}"
            ),
            Self::LostWrite {
                device,
                item_id,
                day,
                written_at,
                held_at,
            } => write!(
                f,
                "device {device} write to {item_id}/{day} at {written_at} lost (server holds {held_at:?})"
            ),
            Self::OutboxNotEmpty { device, pending } => {
                write!(f, "device {device} still has {pending} queued mutation(s)")
            }
            Self::NotSettled { device, state } => {
                write!(f, "device {device} ended in sync state {state}")
            }
            Self::QuiesceFailed { device, error } => {
                write!(f, "device {device} failed a fault-free sync: {error}")
            }
        }
    }
}

// ── Checks ───────────────────────────────────────────────────────────────────

/// Compare one device's store with the server's live items.
#[must_use]
pub fn diff_snapshot(device: usize, server: &Snapshot, local: &Snapshot) -> Option<InvariantViolation> {
    let server_ids: BTreeSet<&String> = server.keys().collect();
    let local_ids: BTreeSet<&String> = local.keys().collect();
    let missing: Vec<String> = server_ids.difference(&local_ids).map(|id| (*id).clone()).collect();
    let extra: Vec<String> = local_ids.difference(&server_ids).map(|id| (*id).clone()).collect();
    let differing: Vec<String> = server
        .iter()
        .filter(|(id, item)| local.get(*id).is_some_and(|mine| mine != *item))
        .map(|(id, _)| id.clone())
        .collect();

    if missing.is_empty() && extra.is_empty() && differing.is_empty() {
        None
    } else {
        Some(InvariantViolation::Divergence {
            device,
            missing,
            extra,
            differing,
        })
    }
}

/// Every device holds exactly the server's live items.
#[must_use]
pub fn check_convergence(server: &Snapshot, devices: &[Device]) -> OracleResult {
    OracleResult::from_violations(
        devices
            .iter()
            .filter_map(|d| diff_snapshot(d.index(), server, &d.tracker().store().snapshot()))
            .collect(),
    )
}

/// No accepted local write was overwritten by an older one.
///
/// Writes to items the server no longer lists are skipped: their records
/// were legitimately dropped with the item.
#[must_use]
pub fn check_no_lost_writes(state: &RemoteState, ledger: &[WrittenDay]) -> OracleResult {
    let violations = ledger
        .iter()
        .filter_map(|write| {
            let id = if is_temp_id(&write.item_id) {
                state.assigned_id(&write.item_id)?
            } else {
                write.item_id.as_str()
            };
            let item = state.get(id).filter(|item| !item.is_deleted())?;
            let held_at = item.records.get(&write.day).map(|r| r.updated_at);
            if held_at.is_some_and(|held| held >= write.updated_at) {
                return None;
            }
            Some(InvariantViolation::LostWrite {
                device: write.device,
                item_id: id.to_string(),
                day: write.day,
                written_at: write.updated_at,
                held_at,
            })
        })
        .collect();
    OracleResult::from_violations(violations)
}

/// Outboxes are empty and the last cycle succeeded everywhere.
#[must_use]
pub fn check_settled(devices: &[Device]) -> OracleResult {
    let mut violations = Vec::new();
    for device in devices {
        let pending = device.tracker().outbox().len();
        if pending > 0 {
            violations.push(InvariantViolation::OutboxNotEmpty {
                device: device.index(),
                pending,
            });
        }
        let state = device.controller().get_sync_state();
        if state != SyncState::Success {
            violations.push(InvariantViolation::NotSettled {
                device: device.index(),
                state: state.to_string(),
            });
        }
    }
    OracleResult::from_violations(violations)
}

/// Run every check against a quiesced simulation.
#[must_use]
pub fn check_all(state: &RemoteState, devices: &[Device]) -> OracleResult {
    let server = tally_core::model::snapshot_from(state.list());
    let ledger: Vec<WrittenDay> = devices.iter().flat_map(|d| d.ledger().iter().cloned()).collect();
    check_settled(devices)
        .merge(check_convergence(&server, devices))
        .merge(check_no_lost_writes(state, &ledger))
}
