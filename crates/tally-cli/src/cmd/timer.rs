//! `tally timer`: drive a time-based item's timer.

use anyhow::Result;
use clap::{Args, ValueEnum};
use tally_core::model::{DailyRecord, Progress};

use super::{DispatchView, day_or_today, resolve_item};
use crate::output::render_success;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TimerAction {
    Start,
    Pause,
    Stop,
}

#[derive(Args, Debug)]
pub struct TimerArgs {
    #[arg(value_enum)]
    pub action: TimerAction,

    /// Item id or title.
    pub item: String,

    /// Day the time counts towards (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub day: Option<String>,
}

fn summary(record: &DailyRecord) -> String {
    match &record.progress {
        Progress::TimeBased {
            target_seconds,
            elapsed_seconds,
            ..
        } => {
            let state = if record.progress.timer_running() {
                "running"
            } else {
                "stopped"
            };
            format!(
                "{state}, {}m of {}m",
                elapsed_seconds / 60,
                target_seconds / 60
            )
        }
        _ => record.symbol.to_string(),
    }
}

/// # Errors
///
/// Unknown item, bad day, a non-time-based item, or a storage error.
pub fn run_timer(args: &TimerArgs, session: &Session) -> Result<()> {
    let item = resolve_item(session, &args.item)?;
    let day = day_or_today(args.day.as_deref())?;
    let tracker = &session.tracker;
    let receipt = match args.action {
        TimerAction::Start => tracker.start_timer(&item.id, day)?,
        TimerAction::Pause => tracker.pause_timer(&item.id, day)?,
        TimerAction::Stop => tracker.stop_timer(&item.id, day)?,
    };
    let dispatch = DispatchView::from(&receipt.dispatch);
    let message = format!(
        "{} {day}: {}{}",
        item.title,
        summary(&receipt.value),
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
