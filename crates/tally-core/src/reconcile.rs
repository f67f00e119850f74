//! Reconciliation of a fetched remote snapshot with the local one.
//!
//! The merge is pure: it reads two snapshots and builds a third.
//!
//! Per remote item:
//! - absent locally: adopted as-is;
//! - present locally: the remote copy is the base (server wins every
//!   non-record field) and records are merged day by day. The record with the
//!   strictly later `updated_at` wins whole; ties go to the remote. Days held
//!   by only one side are copied unchanged.
//!
//! Items only held locally are kept by [`merge`]. [`merge_with_pending`]
//! keeps them only while they are unconfirmed (a temp id, or a create still
//! queued), so an item the server has since deleted is not resurrected.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument, warn};

use crate::error::TallyError;
use crate::model::id::is_temp_id;
use crate::model::{DailyRecord, DayKey, Snapshot, TrackedItem};

/// Counters describing what a merge did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MergeStats {
    /// Remote items with no local counterpart.
    pub adopted: usize,
    /// Items present on both sides.
    pub merged: usize,
    /// Local-only items carried over.
    pub kept_local: usize,
    /// Local-only items dropped because the server no longer has them.
    pub dropped: usize,
    /// Days where the local record won.
    pub days_local: usize,
    /// Days where the remote record won or was the only copy.
    pub days_remote: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub snapshot: Snapshot,
    pub stats: MergeStats,
}

/// Pick the winning record for one day.
///
/// Returns `true` in the second position when the local record won.
#[must_use]
pub fn pick_record<'a>(local: &'a DailyRecord, remote: &'a DailyRecord) -> (&'a DailyRecord, bool) {
    if local.updated_at > remote.updated_at {
        (local, true)
    } else {
        (remote, false)
    }
}

fn merge_records(
    local: &BTreeMap<DayKey, DailyRecord>,
    remote: &BTreeMap<DayKey, DailyRecord>,
    stats: &mut MergeStats,
) -> BTreeMap<DayKey, DailyRecord> {
    let mut out = remote.clone();
    stats.days_remote += remote.len();
    for (day, local_record) in local {
        match remote.get(day) {
            None => {
                out.insert(*day, local_record.clone());
                stats.days_local += 1;
            }
            Some(remote_record) => {
                let (_, local_won) = pick_record(local_record, remote_record);
                if local_won {
                    out.insert(*day, local_record.clone());
                    stats.days_local += 1;
                    stats.days_remote -= 1;
                }
            }
        }
    }
    out
}

fn merge_item(local: &TrackedItem, remote: &TrackedItem, stats: &mut MergeStats) -> TrackedItem {
    let mut merged = remote.clone();
    merged.records = merge_records(&local.records, &remote.records, stats);
    merged
}

/// Merge keeping every local-only item.
#[must_use]
pub fn merge(local: &Snapshot, remote: &Snapshot) -> MergeOutcome {
    merge_inner(local, remote, None)
}

/// Merge keeping local-only items only while they are unconfirmed.
#[must_use]
#[instrument(skip_all, fields(local = local.len(), remote = remote.len()))]
pub fn merge_with_pending(
    local: &Snapshot,
    remote: &Snapshot,
    pending_creates: &BTreeSet<String>,
) -> MergeOutcome {
    merge_inner(local, remote, Some(pending_creates))
}

fn merge_inner(
    local: &Snapshot,
    remote: &Snapshot,
    pending_creates: Option<&BTreeSet<String>>,
) -> MergeOutcome {
    let mut stats = MergeStats::default();
    let mut snapshot = Snapshot::new();

    for (id, remote_item) in remote {
        let item = match local.get(id) {
            None => {
                stats.adopted += 1;
                stats.days_remote += remote_item.records.len();
                remote_item.clone()
            }
            Some(local_item) => {
                stats.merged += 1;
                merge_item(local_item, remote_item, &mut stats)
            }
        };
        snapshot.insert(id.clone(), item);
    }

    for (id, local_item) in local {
        if remote.contains_key(id) {
            continue;
        }
        let keep =
            pending_creates.is_none_or(|pending| is_temp_id(id) || pending.contains(id));
        if keep {
            stats.kept_local += 1;
            snapshot.insert(id.clone(), local_item.clone());
        } else {
            debug!(item_id = %id, "dropping local item absent from remote");
            stats.dropped += 1;
        }
    }

    debug!(?stats, "merge complete");
    MergeOutcome { snapshot, stats }
}

/// Boundary check for a `listItems` response.
///
/// Symbols are recomputed from each record's progress, so a stored symbol is
/// never trusted verbatim. A record whose progress does not match its item's
/// kind, a duplicate id, or an empty id rejects the whole snapshot.
///
/// # Errors
///
/// Returns [`TallyError::MalformedPayload`] describing the first problem.
pub fn validate_remote(items: Vec<TrackedItem>) -> Result<Snapshot, TallyError> {
    let mut snapshot = Snapshot::new();
    for mut item in items {
        if item.id.is_empty() {
            return Err(TallyError::MalformedPayload("item with empty id".into()));
        }
        for (day, record) in &mut item.records {
            if record.progress.kind() != item.tracking.kind() {
                return Err(TallyError::MalformedPayload(format!(
                    "item {} day {day}: {} progress on a {} item",
                    item.id,
                    record.progress.kind(),
                    item.tracking.kind()
                )));
            }
            let derived = crate::status::derive_symbol(&record.progress);
            if derived != record.symbol {
                warn!(item_id = %item.id, %day, stored = %record.symbol, %derived, "remote symbol disagrees with progress; recomputed");
                record.symbol = derived;
            }
        }
        if snapshot.contains_key(&item.id) {
            return Err(TallyError::MalformedPayload(format!(
                "duplicate item id {}",
                item.id
            )));
        }
        snapshot.insert(item.id.clone(), item);
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Progress, Schedule, Symbol, Tracking};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_705_300_000 + secs, 0).unwrap()
    }

    fn day(raw: &str) -> DayKey {
        DayKey::parse(raw).unwrap()
    }

    fn reps(count: u32, secs: i64) -> DailyRecord {
        DailyRecord::new(
            Progress::Quantitative {
                unit: "reps".into(),
                goal: 5,
                count,
            },
            at(secs),
            None,
        )
    }

    fn item(id: &str, title: &str, records: &[(&str, DailyRecord)]) -> TrackedItem {
        TrackedItem {
            id: id.into(),
            title: title.into(),
            tracking: Tracking::Quantitative {
                unit: "reps".into(),
                target: 5,
            },
            schedule: Schedule::Daily,
            owner: "ana".into(),
            archived: false,
            deleted_at: None,
            created_at: at(0),
            updated_at: at(0),
            records: records
                .iter()
                .map(|(d, r)| (day(d), r.clone()))
                .collect(),
        }
    }

    fn snap(items: Vec<TrackedItem>) -> Snapshot {
        crate::model::snapshot_from(items)
    }

    #[test]
    fn newer_local_day_beats_older_remote_day() {
        let local = snap(vec![item("a", "Push-ups", &[("2024-01-15", reps(3, 10))])]);
        let remote = snap(vec![item("a", "Push-ups", &[("2024-01-15", reps(5, 5))])]);
        let out = merge(&local, &remote);
        let record = &out.snapshot["a"].records[&day("2024-01-15")];
        assert_eq!(record.symbol, Symbol::Partial);
        assert_eq!(out.stats.days_local, 1);
        assert_eq!(out.stats.days_remote, 0);
    }

    #[test]
    fn tie_goes_to_remote() {
        let local = snap(vec![item("a", "P", &[("2024-01-15", reps(1, 10))])]);
        let remote = snap(vec![item("a", "P", &[("2024-01-15", reps(4, 10))])]);
        let out = merge(&local, &remote);
        assert_eq!(out.snapshot["a"].records[&day("2024-01-15")], reps(4, 10));
    }

    #[test]
    fn server_wins_item_fields_and_one_sided_days_survive() {
        let local = snap(vec![item("a", "Local title", &[("2024-01-14", reps(2, 3))])]);
        let remote = snap(vec![item("a", "Server title", &[("2024-01-15", reps(5, 4))])]);
        let out = merge(&local, &remote);
        let merged = &out.snapshot["a"];
        assert_eq!(merged.title, "Server title");
        assert_eq!(merged.records.len(), 2);
    }

    #[test]
    fn adopts_remote_only_and_keeps_local_only() {
        let local = snap(vec![item("tmp-1", "New", &[])]);
        let remote = snap(vec![item("srv-1", "Theirs", &[])]);
        let out = merge(&local, &remote);
        assert_eq!(out.snapshot.len(), 2);
        assert_eq!(out.stats.adopted, 1);
        assert_eq!(out.stats.kept_local, 1);
    }

    #[test]
    fn pending_filter_drops_items_the_server_deleted() {
        let local = snap(vec![item("tmp-1", "New", &[]), item("srv-9", "Gone", &[])]);
        let pending: BTreeSet<String> = std::iter::once("tmp-1".to_string()).collect();
        let out = merge_with_pending(&local, &Snapshot::new(), &pending);
        assert!(out.snapshot.contains_key("tmp-1"));
        assert!(!out.snapshot.contains_key("srv-9"));
        assert_eq!(out.stats.dropped, 1);
    }

    #[test]
    fn merge_with_self_is_identity() {
        let s = snap(vec![
            item("a", "A", &[("2024-01-15", reps(2, 1))]),
            item("b", "B", &[]),
        ]);
        assert_eq!(merge(&s, &s).snapshot, s);
    }

    #[test]
    fn validation_recomputes_symbols() {
        let mut record = reps(5, 1);
        record.symbol = Symbol::Missed;
        let snapshot = validate_remote(vec![item("a", "A", &[("2024-01-15", record)])]).unwrap();
        assert_eq!(
            snapshot["a"].records[&day("2024-01-15")].symbol,
            Symbol::Completed
        );
    }

    #[test]
    fn validation_rejects_kind_mismatch_and_duplicates() {
        let bad = DailyRecord::new(Progress::Binary { marker: None }, at(1), None);
        assert!(matches!(
            validate_remote(vec![item("a", "A", &[("2024-01-15", bad)])]),
            Err(TallyError::MalformedPayload(_))
        ));
        assert!(matches!(
            validate_remote(vec![item("a", "A", &[]), item("a", "A", &[])]),
            Err(TallyError::MalformedPayload(_))
        ));
    }
}
