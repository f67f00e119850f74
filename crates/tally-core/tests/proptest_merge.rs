use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use tally_core::model::{Progress, Snapshot};
use tally_core::reconcile::merge;
use tally_core::status::derive_symbol;

use generators::*;

fn qty(count: u32, goal: u32) -> Progress {
    Progress::Quantitative {
        unit: "reps".into(),
        goal,
        count,
    }
}

fn one_day(id: &str, record: tally_core::model::DailyRecord, day: tally_core::model::DayKey) -> Snapshot {
    let mut records = BTreeMap::new();
    records.insert(day, record);
    let mut snapshot = Snapshot::new();
    snapshot.insert(id.to_string(), item_with(id, records));
    snapshot
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(512))]

    #[test]
    fn symbol_rank_is_monotonic_in_count(goal in 0_u32..1000, a in 0_u32..2000, b in 0_u32..2000) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(derive_symbol(&qty(lo, goal)) <= derive_symbol(&qty(hi, goal)));
    }

    #[test]
    fn elapsed_time_is_monotonic_too(target in 0_u64..10_000, a in 0_u64..20_000, b in 0_u64..20_000) {
        let timed = |elapsed_seconds| Progress::TimeBased {
            target_seconds: target,
            elapsed_seconds,
            pause_count: 0,
            started_at: None,
            stopped_at: None,
        };
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(derive_symbol(&timed(lo)) <= derive_symbol(&timed(hi)));
    }

    #[test]
    fn merge_is_idempotent(s in arb_snapshot()) {
        prop_assert_eq!(merge(&s, &s).snapshot, s);
    }

    #[test]
    fn later_record_wins_from_either_side(
        day in arb_day(),
        older in arb_record(),
        newer_count in 0_u32..20,
        gap in 1_i64..100,
    ) {
        let newer = quantitative(newer_count, 5, 0);
        let newer = tally_core::model::DailyRecord {
            updated_at: older.updated_at + chrono::Duration::seconds(gap),
            ..newer
        };

        let local_newer = merge(&one_day("a", newer.clone(), day), &one_day("a", older.clone(), day));
        prop_assert_eq!(&local_newer.snapshot["a"].records[&day], &newer);

        let remote_newer = merge(&one_day("a", older, day), &one_day("a", newer.clone(), day));
        prop_assert_eq!(&remote_newer.snapshot["a"].records[&day], &newer);
    }

    #[test]
    fn equal_timestamps_resolve_to_remote(day in arb_day(), a in 0_u32..20, b in 0_u32..20, secs in 0_i64..50) {
        let local = quantitative(a, 5, secs);
        let remote = quantitative(b, 5, secs);
        let out = merge(&one_day("a", local, day), &one_day("a", remote.clone(), day));
        prop_assert_eq!(&out.snapshot["a"].records[&day], &remote);
    }

    #[test]
    fn merge_keeps_every_item_and_day(local in arb_snapshot(), remote in arb_snapshot()) {
        let out = merge(&local, &remote).snapshot;

        let ids: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();
        prop_assert_eq!(out.keys().collect::<BTreeSet<_>>(), ids);

        for (id, item) in &out {
            let mut days: BTreeSet<_> = BTreeSet::new();
            if let Some(l) = local.get(id) {
                days.extend(l.records.keys().copied());
            }
            if let Some(r) = remote.get(id) {
                days.extend(r.records.keys().copied());
            }
            prop_assert_eq!(item.records.keys().copied().collect::<BTreeSet<_>>(), days);
        }
    }

    #[test]
    fn merged_record_is_never_older_than_either_input(local in arb_snapshot(), remote in arb_snapshot()) {
        let out = merge(&local, &remote).snapshot;
        for (id, item) in &out {
            for (day, record) in &item.records {
                for side in [&local, &remote] {
                    if let Some(other) = side.get(id).and_then(|i| i.records.get(day)) {
                        prop_assert!(record.updated_at >= other.updated_at);
                    }
                }
            }
        }
    }
}
