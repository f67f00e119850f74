//! Random inputs shared by simulated devices and server-side edits.

use chrono::{DateTime, Duration, Utc, Weekday};
use tally_core::model::{BinaryMarker, DayKey, ItemDraft, Progress, Schedule, Tracking};

use crate::rng::DeterministicRng;

/// Pool size for generated titles; small enough that duplicates happen.
const TITLE_POOL: u64 = 24;

/// Days back from "today" that devices may log against.
const DAY_WINDOW: i64 = 4;

#[must_use]
pub fn random_draft(rng: &mut DeterministicRng) -> ItemDraft {
    let title = format!("Habit {}", rng.next_bounded(TITLE_POOL));
    let tracking = match rng.next_bounded(3) {
        0 => Tracking::Binary,
        1 => Tracking::Quantitative {
            unit: "reps".into(),
            target: u32::try_from(rng.next_bounded(12)).unwrap_or(0),
        },
        _ => Tracking::TimeBased {
            target_seconds: 60 * (1 + rng.next_bounded(30)),
        },
    };
    let schedule = match rng.next_bounded(4) {
        0 => Schedule::Weekdays {
            days: vec![Weekday::Mon, Weekday::Wed, Weekday::Fri],
        },
        1 => Schedule::TimesPerWeek {
            times: u8::try_from(1 + rng.next_bounded(7)).unwrap_or(1),
        },
        _ => Schedule::Daily,
    };
    ItemDraft {
        title,
        tracking,
        schedule,
    }
}

/// A day at or shortly before `now`'s calendar date.
#[must_use]
pub fn random_day(rng: &mut DeterministicRng, now: DateTime<Utc>) -> DayKey {
    let back = rng.between(0, DAY_WINDOW - 1);
    DayKey::from_date(now.date_naive() - Duration::days(back))
}

#[must_use]
pub fn random_marker(rng: &mut DeterministicRng) -> Option<BinaryMarker> {
    match rng.next_bounded(3) {
        0 => Some(BinaryMarker::Done),
        1 => Some(BinaryMarker::Skipped),
        _ => None,
    }
}

/// Arbitrary progress of the item's own kind.
#[must_use]
pub fn random_progress(rng: &mut DeterministicRng, tracking: &Tracking) -> Progress {
    match tracking.empty_progress() {
        Progress::Binary { .. } => Progress::Binary {
            marker: random_marker(rng),
        },
        Progress::Quantitative { unit, goal, .. } => Progress::Quantitative {
            unit,
            goal,
            count: u32::try_from(rng.next_bounded(u64::from(goal) * 2 + 2)).unwrap_or(0),
        },
        Progress::TimeBased { target_seconds, .. } => Progress::TimeBased {
            target_seconds,
            elapsed_seconds: rng.next_bounded(target_seconds * 2 + 1),
            pause_count: 0,
            started_at: None,
            stopped_at: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn progress_matches_tracking_kind() {
        let mut rng = DeterministicRng::new(4);
        for _ in 0..100 {
            let draft = random_draft(&mut rng);
            let progress = random_progress(&mut rng, &draft.tracking);
            assert_eq!(progress.kind(), draft.tracking.kind());
            assert!(draft.schedule.clone().normalize().is_ok());
        }
    }

    #[test]
    fn days_stay_in_window() {
        let now = Utc.timestamp_opt(1_705_300_000, 0).unwrap();
        let today = now.date_naive();
        let mut rng = DeterministicRng::new(8);
        for _ in 0..100 {
            let day = random_day(&mut rng, now).date();
            assert!(day <= today);
            assert!(day > today - Duration::days(DAY_WINDOW));
        }
    }
}
