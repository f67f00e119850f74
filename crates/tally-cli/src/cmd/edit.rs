//! `tally edit`: rename an item or change its goal or schedule.

use anyhow::{Result, bail};
use clap::Args;
use tally_core::model::{ItemPatch, Schedule, Tracking};

use super::add::ScheduleArgs;
use super::{DispatchView, resolve_item};
use crate::output::render_success;
use crate::session::Session;

#[derive(Args, Debug)]
pub struct EditArgs {
    /// Item id or title.
    pub item: String,

    #[arg(long)]
    pub title: Option<String>,

    /// New daily target of a count item.
    #[arg(long)]
    pub target: Option<u32>,

    /// New unit of a count item.
    #[arg(long)]
    pub unit: Option<String>,

    /// New daily target of a timed item, in minutes.
    #[arg(long)]
    pub minutes: Option<u64>,

    /// Make the item due every day.
    #[arg(long, conflicts_with_all = ["days", "weekly"])]
    pub daily: bool,

    #[command(flatten)]
    pub schedule: ScheduleArgs,
}

impl EditArgs {
    /// Goal changes keep the item's tracking kind.
    fn tracking(&self, current: &Tracking) -> Result<Option<Tracking>> {
        let touched = self.target.is_some() || self.unit.is_some() || self.minutes.is_some();
        if !touched {
            return Ok(None);
        }
        match current {
            Tracking::Quantitative { unit, target } if self.minutes.is_none() => {
                Ok(Some(Tracking::Quantitative {
                    unit: self.unit.clone().unwrap_or_else(|| unit.clone()),
                    target: self.target.unwrap_or(*target),
                }))
            }
            Tracking::TimeBased { .. } if self.target.is_none() && self.unit.is_none() => {
                Ok(self.minutes.map(|m| Tracking::TimeBased {
                    target_seconds: m.saturating_mul(60),
                }))
            }
            Tracking::Binary => bail!("binary items have no goal to edit"),
            Tracking::Quantitative { .. } => bail!("--minutes only applies to timed items"),
            Tracking::TimeBased { .. } => bail!("--target and --unit only apply to count items"),
        }
    }

    fn patch(&self, current: &Tracking) -> Result<ItemPatch> {
        let schedule = if self.daily {
            Some(Schedule::Daily)
        } else {
            self.schedule.schedule()
        };
        Ok(ItemPatch {
            title: self.title.clone(),
            tracking: self.tracking(current)?,
            schedule,
            archived: None,
        })
    }
}

/// # Errors
///
/// Unknown item, invalid title or schedule, a goal flag that does not fit
/// the item's kind, or a storage error.
pub fn run_edit(args: &EditArgs, session: &Session) -> Result<()> {
    let item = resolve_item(session, &args.item)?;
    let patch = args.patch(&item.tracking)?;
    if patch.is_empty() {
        bail!("nothing to change; pass --title, a goal flag, or a schedule flag");
    }
    let receipt = session.tracker.update_item(&item.id, patch)?;
    let dispatch = DispatchView::from(&receipt.dispatch);
    render_success(
        session.output,
        &format!("Updated {}{}", receipt.value.title, dispatch.suffix()),
        &serde_json::json!({ "item": receipt.value, "dispatch": dispatch }),
    )
}
