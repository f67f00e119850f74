//! `tally log`: record a day's progress, note, or mood.

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use tally_core::model::{BinaryMarker, DailyRecord, DayUpdate, Mood, Progress, TrackingKind};
use tally_core::tracker::Receipt;

use super::{DispatchView, day_or_today, resolve_item};
use crate::output::render_success;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MoodArg {
    Great,
    Good,
    Okay,
    Low,
    Awful,
}

impl From<MoodArg> for Mood {
    fn from(mood: MoodArg) -> Self {
        match mood {
            MoodArg::Great => Self::Great,
            MoodArg::Good => Self::Good,
            MoodArg::Okay => Self::Okay,
            MoodArg::Low => Self::Low,
            MoodArg::Awful => Self::Awful,
        }
    }
}

#[derive(Args, Debug)]
pub struct LogArgs {
    /// Item id or title.
    pub item: String,

    /// Day to log (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub day: Option<String>,

    /// Mark a binary item done.
    #[arg(long, group = "action")]
    pub done: bool,

    /// Mark a binary item skipped.
    #[arg(long, group = "action")]
    pub skip: bool,

    /// Remove a binary item's marker.
    #[arg(long, group = "action")]
    pub unmark: bool,

    /// Add to a count item (negative values subtract).
    #[arg(long, group = "action", allow_negative_numbers = true, value_name = "N")]
    pub add: Option<i64>,

    /// Set a count item's total for the day.
    #[arg(long, group = "action", value_name = "N")]
    pub count: Option<u32>,

    /// Reset the day. The record is kept as cleared.
    #[arg(long, group = "action", conflicts_with_all = ["note", "mood"])]
    pub clear: bool,

    /// Attach a note; an empty string removes it.
    #[arg(long)]
    pub note: Option<String>,

    #[arg(long, value_enum)]
    pub mood: Option<MoodArg>,
}

/// What `log` does once the item's kind is known.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Set(DayUpdate),
    Add { delta: i64, extra: Option<DayUpdate> },
    Clear,
}

impl LogArgs {
    fn extras(&self) -> DayUpdate {
        DayUpdate {
            progress: None,
            note: self.note.clone(),
            mood: self.mood.map(Mood::from),
        }
    }

    fn has_extras(&self) -> bool {
        self.note.is_some() || self.mood.is_some()
    }

    fn action(&self, kind: TrackingKind, current: Option<&Progress>) -> Result<Action> {
        if self.clear {
            return Ok(Action::Clear);
        }
        let marker = if self.done {
            Some(Some(BinaryMarker::Done))
        } else if self.skip {
            Some(Some(BinaryMarker::Skipped))
        } else if self.unmark {
            Some(None)
        } else {
            None
        };
        if let Some(marker) = marker {
            return Ok(Action::Set(DayUpdate {
                progress: Some(Progress::Binary { marker }),
                ..self.extras()
            }));
        }
        if let Some(count) = self.count {
            let (unit, goal) = match current {
                Some(Progress::Quantitative { unit, goal, .. }) => (unit.clone(), *goal),
                _ => bail!("--count only applies to count items"),
            };
            return Ok(Action::Set(DayUpdate {
                progress: Some(Progress::Quantitative { unit, goal, count }),
                ..self.extras()
            }));
        }
        if let Some(delta) = self.add {
            return Ok(Action::Add {
                delta,
                extra: self.has_extras().then(|| self.extras()),
            });
        }
        if self.has_extras() {
            return Ok(Action::Set(self.extras()));
        }
        match kind {
            TrackingKind::Binary => Ok(Action::Set(DayUpdate::progress(Progress::Binary {
                marker: Some(BinaryMarker::Done),
            }))),
            TrackingKind::Quantitative => Ok(Action::Add { delta: 1, extra: None }),
            TrackingKind::TimeBased => bail!("time-based items are logged with `tally timer`"),
        }
    }
}

fn describe(title: &str, day: impl std::fmt::Display, record: Option<&DailyRecord>) -> String {
    match record {
        Some(record) => format!("{title} {day}: {} {}", record.symbol.glyph(), record.symbol),
        None => format!("{title} {day}: nothing logged"),
    }
}

/// # Errors
///
/// Unknown item, bad day, a progress kind that does not match the item,
/// or a storage error.
pub fn run_log(args: &LogArgs, session: &Session) -> Result<()> {
    let item = resolve_item(session, &args.item)?;
    let day = day_or_today(args.day.as_deref())?;
    let current = item
        .records
        .get(&day)
        .map_or_else(|| item.tracking.empty_progress(), |r| r.progress.clone());
    let tracker = &session.tracker;

    let receipt: Receipt<Option<DailyRecord>> = match args.action(item.kind(), Some(&current))? {
        Action::Clear => tracker.clear_day(&item.id, day)?,
        Action::Set(update) => {
            let r = tracker.log_day(&item.id, day, update)?;
            Receipt {
                value: Some(r.value),
                dispatch: r.dispatch,
            }
        }
        Action::Add { delta, extra } => {
            let mut r = tracker.increment(&item.id, day, delta)?;
            if let Some(extra) = extra {
                r = tracker.log_day(&item.id, day, extra)?;
            }
            Receipt {
                value: Some(r.value),
                dispatch: r.dispatch,
            }
        }
    };

    let dispatch = DispatchView::from(&receipt.dispatch);
    let message = format!(
        "{}{}",
        describe(&item.title, day, receipt.value.as_ref()),
        dispatch.suffix()
    );
    render_success(
        session.output,
        &message,
        &serde_json::json!({
            "item_id": item.id,
            "day": day,
            "record": receipt.value,
            "dispatch": dispatch,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: LogArgs,
    }

    fn parse(argv: &[&str]) -> LogArgs {
        let mut full = vec!["test"];
        full.extend_from_slice(argv);
        Wrapper::parse_from(full).args
    }

    fn reps(count: u32) -> Progress {
        Progress::Quantitative {
            unit: "reps".into(),
            goal: 20,
            count,
        }
    }

    #[test]
    fn bare_log_completes_binary_and_bumps_counts() {
        let args = parse(&["Read"]);
        assert_eq!(
            args.action(TrackingKind::Binary, None).unwrap(),
            Action::Set(DayUpdate::progress(Progress::Binary {
                marker: Some(BinaryMarker::Done)
            }))
        );
        assert_eq!(
            args.action(TrackingKind::Quantitative, Some(&reps(3))).unwrap(),
            Action::Add { delta: 1, extra: None }
        );
        assert!(args.action(TrackingKind::TimeBased, None).is_err());
    }

    #[test]
    fn count_keeps_the_goal_of_the_day() {
        let args = parse(&["Push-ups", "--count", "12", "--mood", "good"]);
        assert_eq!(
            args.action(TrackingKind::Quantitative, Some(&reps(3))).unwrap(),
            Action::Set(DayUpdate {
                progress: Some(reps(12)),
                note: None,
                mood: Some(Mood::Good),
            })
        );
        assert!(args.action(TrackingKind::Binary, Some(&Progress::Binary { marker: None })).is_err());
    }

    #[test]
    fn negative_add_and_note() {
        let args = parse(&["Push-ups", "--add", "-5", "--note", "sore"]);
        assert_eq!(
            args.action(TrackingKind::Quantitative, Some(&reps(10))).unwrap(),
            Action::Add {
                delta: -5,
                extra: Some(DayUpdate {
                    progress: None,
                    note: Some("sore".into()),
                    mood: None
                })
            }
        );
    }

    #[test]
    fn actions_are_exclusive() {
        assert!(Wrapper::try_parse_from(["test", "Read", "--done", "--skip"]).is_err());
        assert!(Wrapper::try_parse_from(["test", "Read", "--clear", "--note", "x"]).is_err());
        assert_eq!(parse(&["Read", "--clear"]).action(TrackingKind::Binary, None).unwrap(), Action::Clear);
    }
}
