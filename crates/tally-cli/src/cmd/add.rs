//! `tally add`: start tracking a new habit or goal.

use anyhow::Result;
use chrono::Weekday;
use clap::{Args, ValueEnum};
use tally_core::model::{ItemDraft, Schedule, Tracking};

use super::DispatchView;
use crate::output::render_success;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Done or not done.
    Binary,
    /// A count towards a daily target.
    Count,
    /// Time spent towards a daily target.
    Timed,
}

/// Schedule flags shared by `add` and `edit`.
#[derive(Args, Debug, Default, Clone)]
pub struct ScheduleArgs {
    /// Only due on these weekdays (comma-separated, e.g. `mon,wed,fri`).
    #[arg(long, value_delimiter = ',', conflicts_with = "weekly")]
    pub days: Vec<Weekday>,

    /// Due a number of times per ISO week (1-7).
    #[arg(long, value_name = "N")]
    pub weekly: Option<u8>,
}

impl ScheduleArgs {
    /// `None` when no schedule flag was given.
    #[must_use]
    pub fn schedule(&self) -> Option<Schedule> {
        if !self.days.is_empty() {
            Some(Schedule::Weekdays {
                days: self.days.clone(),
            })
        } else {
            self.weekly.map(|times| Schedule::TimesPerWeek { times })
        }
    }
}

#[derive(Args, Debug)]
pub struct AddArgs {
    /// Title of the new item.
    pub title: String,

    #[arg(short, long, value_enum, default_value_t = KindArg::Binary)]
    pub kind: KindArg,

    /// Unit counted by a `count` item.
    #[arg(long, default_value = "times")]
    pub unit: String,

    /// Daily target of a `count` item.
    #[arg(long, default_value_t = 1)]
    pub target: u32,

    /// Daily target of a `timed` item, in minutes.
    #[arg(long, default_value_t = 30)]
    pub minutes: u64,

    #[command(flatten)]
    pub schedule: ScheduleArgs,
}

impl AddArgs {
    fn draft(&self) -> ItemDraft {
        let tracking = match self.kind {
            KindArg::Binary => Tracking::Binary,
            KindArg::Count => Tracking::Quantitative {
                unit: self.unit.clone(),
                target: self.target,
            },
            KindArg::Timed => Tracking::TimeBased {
                target_seconds: self.minutes.saturating_mul(60),
            },
        };
        ItemDraft {
            title: self.title.clone(),
            tracking,
            schedule: self.schedule.schedule().unwrap_or_default(),
        }
    }
}

/// # Errors
///
/// Validation failures (title, schedule) and storage errors.
pub fn run_add(args: &AddArgs, session: &Session) -> Result<()> {
    let receipt = session.tracker.create_item(args.draft())?;
    let dispatch = DispatchView::from(&receipt.dispatch);
    let message = format!(
        "Added {} ({}){}",
        receipt.value.title,
        receipt.value.id,
        dispatch.suffix()
    );
    render_success(
        session.output,
        &message,
        &serde_json::json!({ "item": receipt.value, "dispatch": dispatch }),
    )
}
