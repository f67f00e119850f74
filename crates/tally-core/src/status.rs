//! Status derivation: progress sub-record to categorical [`Symbol`].
//!
//! Quantitative and time-based progress share one banding over
//! `ratio = amount / max(goal, 1)`:
//!
//! | amount / ratio       | symbol      |
//! |----------------------|-------------|
//! | amount == 0          | `Pending`   |
//! | 0 < ratio < 0.5      | `Missed`    |
//! | 0.5 <= ratio < 1     | `Partial`   |
//! | ratio >= 1           | `Completed` |
//!
//! A goal of zero is floored to one, so any positive amount against a zero
//! goal completes the day. Binary progress maps the caller's explicit marker.
//!
//! The comparisons are done in integers, which keeps the band edges exact.

use crate::error::ValidationError;
use crate::model::{BinaryMarker, Progress, Symbol, TrackingKind};

/// Derive the symbol for a sub-record. Pure.
#[must_use]
pub fn derive_symbol(progress: &Progress) -> Symbol {
    match progress {
        Progress::Binary { marker } => match marker {
            Some(BinaryMarker::Done) => Symbol::Completed,
            Some(BinaryMarker::Skipped) => Symbol::Missed,
            None => Symbol::Pending,
        },
        Progress::Quantitative { goal, count, .. } => {
            ratio_band(u64::from(*count), u64::from(*goal))
        }
        Progress::TimeBased {
            target_seconds,
            elapsed_seconds,
            ..
        } => ratio_band(*elapsed_seconds, *target_seconds),
    }
}

/// Derive the symbol after checking the sub-record matches `kind`.
///
/// # Errors
///
/// Returns [`ValidationError::TrackingMismatch`] when the progress variant
/// belongs to another kind.
pub fn derive_symbol_for(kind: TrackingKind, progress: &Progress) -> Result<Symbol, ValidationError> {
    let got = progress.kind();
    if got != kind {
        return Err(ValidationError::TrackingMismatch {
            expected: kind,
            got,
        });
    }
    Ok(derive_symbol(progress))
}

fn ratio_band(amount: u64, goal: u64) -> Symbol {
    let goal = goal.max(1);
    if amount == 0 {
        Symbol::Pending
    } else if amount >= goal {
        Symbol::Completed
    } else if amount.saturating_mul(2) >= goal {
        Symbol::Partial
    } else {
        Symbol::Missed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(count: u32, goal: u32) -> Progress {
        Progress::Quantitative {
            unit: "reps".into(),
            goal,
            count,
        }
    }

    fn timed(elapsed_seconds: u64, target_seconds: u64) -> Progress {
        Progress::TimeBased {
            target_seconds,
            elapsed_seconds,
            pause_count: 0,
            started_at: None,
            stopped_at: None,
        }
    }

    #[test]
    fn binary_follows_marker() {
        assert_eq!(
            derive_symbol(&Progress::Binary {
                marker: Some(BinaryMarker::Done)
            }),
            Symbol::Completed
        );
        assert_eq!(
            derive_symbol(&Progress::Binary {
                marker: Some(BinaryMarker::Skipped)
            }),
            Symbol::Missed
        );
        assert_eq!(derive_symbol(&Progress::Binary { marker: None }), Symbol::Pending);
    }

    #[test]
    fn quantitative_bands() {
        assert_eq!(derive_symbol(&qty(0, 10)), Symbol::Pending);
        assert_eq!(derive_symbol(&qty(4, 10)), Symbol::Missed);
        assert_eq!(derive_symbol(&qty(5, 10)), Symbol::Partial);
        assert_eq!(derive_symbol(&qty(9, 10)), Symbol::Partial);
        assert_eq!(derive_symbol(&qty(10, 10)), Symbol::Completed);
        assert_eq!(derive_symbol(&qty(25, 10)), Symbol::Completed);
    }

    #[test]
    fn odd_goal_half_boundary() {
        // 2/5 = 0.4, 3/5 = 0.6
        assert_eq!(derive_symbol(&qty(2, 5)), Symbol::Missed);
        assert_eq!(derive_symbol(&qty(3, 5)), Symbol::Partial);
    }

    #[test]
    fn zero_goal_is_floored_to_one() {
        assert_eq!(derive_symbol(&qty(1, 0)), Symbol::Completed);
        assert_eq!(derive_symbol(&qty(0, 0)), Symbol::Pending);
        assert_eq!(derive_symbol(&timed(1, 0)), Symbol::Completed);
    }

    #[test]
    fn time_based_uses_same_bands() {
        assert_eq!(derive_symbol(&timed(0, 600)), Symbol::Pending);
        assert_eq!(derive_symbol(&timed(120, 600)), Symbol::Missed);
        assert_eq!(derive_symbol(&timed(300, 600)), Symbol::Partial);
        assert_eq!(derive_symbol(&timed(600, 600)), Symbol::Completed);
    }

    #[test]
    fn huge_amounts_do_not_overflow() {
        assert_eq!(derive_symbol(&timed(u64::MAX, u64::MAX)), Symbol::Completed);
        assert_eq!(derive_symbol(&timed(u64::MAX / 2 + 1, u64::MAX)), Symbol::Partial);
    }

    #[test]
    fn kind_checked_derivation_rejects_mismatch() {
        let err = derive_symbol_for(TrackingKind::TimeBased, &qty(1, 1)).unwrap_err();
        assert!(matches!(err, ValidationError::TrackingMismatch { .. }));
        assert_eq!(
            derive_symbol_for(TrackingKind::Quantitative, &qty(1, 1)),
            Ok(Symbol::Completed)
        );
    }
}
