//! `tally show`: one item with its recent days.

use std::io::{self, Write};

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use clap::Args;
use serde::Serialize;
use tally_core::model::{DailyRecord, DayKey, Mood, TrackedItem};

use super::{describe_schedule, describe_tracking, resolve_item};
use crate::output::{pretty_kv, pretty_rule, pretty_section, render_mode};
use crate::session::Session;

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Item id or title.
    pub item: String,

    /// How many of the most recent logged days to include.
    #[arg(long, default_value_t = 7)]
    pub days: usize,
}

#[derive(Debug, Serialize)]
pub struct ShowDay {
    pub day: DayKey,
    #[serde(flatten)]
    pub record: DailyRecord,
}

#[derive(Debug, Serialize)]
pub struct ShowItem {
    pub id: String,
    pub title: String,
    pub goal: String,
    pub schedule: String,
    pub owner: String,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pending_changes: usize,
    pub days: Vec<ShowDay>,
}

fn local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn build(item: TrackedItem, limit: usize, pending_changes: usize) -> ShowItem {
    let days = item
        .records
        .iter()
        .rev()
        .take(limit)
        .map(|(day, record)| ShowDay {
            day: *day,
            record: record.clone(),
        })
        .collect();
    ShowItem {
        goal: describe_tracking(&item.tracking),
        schedule: describe_schedule(&item.schedule),
        id: item.id,
        title: item.title,
        owner: item.owner,
        archived: item.archived,
        created_at: item.created_at,
        updated_at: item.updated_at,
        pending_changes,
        days,
    }
}

const fn mood_label(mood: Mood) -> &'static str {
    match mood {
        Mood::Great => "great",
        Mood::Good => "good",
        Mood::Okay => "okay",
        Mood::Low => "low",
        Mood::Awful => "awful",
    }
}

fn day_line(day: &ShowDay) -> String {
    let mut line = format!("{} {} {}", day.day, day.record.symbol.glyph(), day.record.symbol);
    if day.record.cleared_at.is_some() {
        line.push_str(" (cleared)");
    }
    if let Some(mood) = day.record.mood {
        line.push_str(" mood=");
        line.push_str(mood_label(mood));
    }
    if let Some(note) = &day.record.note {
        line.push_str(&format!(" \"{note}\""));
    }
    line
}

fn render_text(item: &ShowItem, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}\t{}\t{}\t{}", item.id, item.title, item.goal, item.schedule)?;
    for day in &item.days {
        writeln!(w, "{}", day_line(day))?;
    }
    Ok(())
}

fn render_pretty(item: &ShowItem, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &item.title)?;
    pretty_kv(w, "id", &item.id)?;
    pretty_kv(w, "goal", &item.goal)?;
    pretty_kv(w, "schedule", &item.schedule)?;
    pretty_kv(w, "owner", &item.owner)?;
    if item.archived {
        pretty_kv(w, "archived", "yes")?;
    }
    pretty_kv(w, "created", local(item.created_at))?;
    pretty_kv(w, "updated", local(item.updated_at))?;
    if item.pending_changes > 0 {
        pretty_kv(w, "unsynced", item.pending_changes.to_string())?;
    }
    if !item.days.is_empty() {
        pretty_rule(w)?;
        for day in &item.days {
            writeln!(w, "{}", day_line(day))?;
        }
    }
    Ok(())
}

/// # Errors
///
/// Unknown item or an output failure.
pub fn run_show(args: &ShowArgs, session: &Session) -> Result<()> {
    let item = resolve_item(session, &args.item)?;
    let pending = session
        .tracker
        .outbox()
        .peek()
        .iter()
        .filter(|entry| entry.mutation.target_id() == item.id)
        .count();
    let show = build(item, args.days, pending);
    render_mode(session.output, &show, render_text, render_pretty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use tally_core::model::{BinaryMarker, Progress, Schedule, Tracking};

    fn item_with_days(n: u32) -> TrackedItem {
        let at = Utc.timestamp_opt(1_705_300_000, 0).unwrap();
        let mut records = BTreeMap::new();
        for i in 1..=n {
            let day = DayKey::parse(&format!("2024-01-{i:02}")).unwrap();
            records.insert(
                day,
                DailyRecord::new(
                    Progress::Binary {
                        marker: Some(BinaryMarker::Done),
                    },
                    at,
                    Some("ana"),
                ),
            );
        }
        TrackedItem {
            id: "srv-000002".into(),
            title: "Read".into(),
            tracking: Tracking::Binary,
            schedule: Schedule::Daily,
            owner: "ana".into(),
            archived: false,
            deleted_at: None,
            created_at: at,
            updated_at: at,
            records,
        }
    }

    #[test]
    fn newest_days_come_first_and_are_capped() {
        let show = build(item_with_days(10), 3, 0);
        let days: Vec<String> = show.days.iter().map(|d| d.day.to_string()).collect();
        assert_eq!(days, vec!["2024-01-10", "2024-01-09", "2024-01-08"]);
    }

    #[test]
    fn day_lines_mention_mood_and_note() {
        let mut show = build(item_with_days(1), 7, 0);
        show.days[0].record.mood = Some(Mood::Great);
        show.days[0].record.note = Some("before bed".into());
        assert_eq!(day_line(&show.days[0]), "2024-01-01 \u{2713} completed mood=great \"before bed\"");
    }

    #[test]
    fn json_flattens_the_record() {
        let show = build(item_with_days(1), 7, 2);
        let json = serde_json::to_value(&show).unwrap();
        assert_eq!(json["pending_changes"], 2);
        assert_eq!(json["days"][0]["day"], "2024-01-01");
        assert_eq!(json["days"][0]["symbol"], "completed");
    }
}
