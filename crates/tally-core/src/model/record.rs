use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::TrackingKind;
use crate::status::derive_symbol;

/// Derived completion state of a day.
///
/// Declaration order is the rank order: `Pending < Missed < Partial < Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Symbol {
    Pending,
    Missed,
    Partial,
    Completed,
}

impl Symbol {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Missed => "missed",
            Self::Partial => "partial",
            Self::Completed => "completed",
        }
    }

    /// One-character glyph for compact listings.
    #[must_use]
    pub const fn glyph(self) -> char {
        match self {
            Self::Pending => '·',
            Self::Missed => '✗',
            Self::Partial => '◐',
            Self::Completed => '✓',
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emotion tag attached to a day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Great,
    Good,
    Okay,
    Low,
    Awful,
}

/// Explicit caller marker for binary items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryMarker {
    Done,
    Skipped,
}

/// Kind-specific sub-record of a day.
///
/// Exactly one variant exists per record, and it must match the parent
/// item's [`TrackingKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Progress {
    Binary {
        #[serde(default)]
        marker: Option<BinaryMarker>,
    },
    Quantitative {
        unit: String,
        goal: u32,
        count: u32,
    },
    TimeBased {
        target_seconds: u64,
        elapsed_seconds: u64,
        #[serde(default)]
        pause_count: u32,
        #[serde(default)]
        started_at: Option<DateTime<Utc>>,
        #[serde(default)]
        stopped_at: Option<DateTime<Utc>>,
    },
}

impl Progress {
    #[must_use]
    pub const fn kind(&self) -> TrackingKind {
        match self {
            Self::Binary { .. } => TrackingKind::Binary,
            Self::Quantitative { .. } => TrackingKind::Quantitative,
            Self::TimeBased { .. } => TrackingKind::TimeBased,
        }
    }

    /// True while a time-based timer has been started and not paused/stopped.
    #[must_use]
    pub fn timer_running(&self) -> bool {
        match self {
            Self::TimeBased {
                started_at: Some(start),
                stopped_at,
                ..
            } => stopped_at.is_none_or(|stop| stop < *start),
            _ => false,
        }
    }
}

/// Outcome of one tracked item on one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub symbol: Symbol,
    pub progress: Progress,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub mood: Option<Mood>,
    /// Last-write timestamp; the sole ordering key during reconciliation.
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_by: Option<String>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    /// Tombstone: the day was cleared. The record itself is never removed.
    #[serde(default)]
    pub cleared_at: Option<DateTime<Utc>>,
}

impl DailyRecord {
    /// A fresh record around `progress` with its symbol derived.
    #[must_use]
    pub fn new(progress: Progress, at: DateTime<Utc>, actor: Option<&str>) -> Self {
        Self {
            symbol: derive_symbol(&progress),
            progress,
            note: None,
            mood: None,
            updated_at: at,
            edited_by: actor.map(str::to_string),
            edited_at: Some(at),
            cleared_at: None,
        }
    }

    /// Recompute the symbol from the sub-record, discarding whatever was stored.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.symbol = derive_symbol(&self.progress);
        self
    }

    /// Stamp a local edit: last-write time plus the audit fields.
    pub fn touch(&mut self, at: DateTime<Utc>, actor: Option<&str>) {
        self.updated_at = at;
        self.edited_at = Some(at);
        self.edited_by = actor.map(str::to_string);
    }
}

/// Caller-facing update for one day.
///
/// There is deliberately no symbol field: the symbol is always derived from
/// the progress carried by the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayUpdate {
    #[serde(default)]
    pub progress: Option<Progress>,
    /// `Some("")` clears the note.
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub mood: Option<Mood>,
}

impl DayUpdate {
    #[must_use]
    pub fn progress(progress: Progress) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    #[must_use]
    pub const fn with_mood(mut self, mood: Mood) -> Self {
        self.mood = Some(mood);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_705_300_000 + secs, 0).unwrap()
    }

    #[test]
    fn symbol_rank_follows_declaration_order() {
        assert!(Symbol::Pending < Symbol::Missed);
        assert!(Symbol::Missed < Symbol::Partial);
        assert!(Symbol::Partial < Symbol::Completed);
    }

    #[test]
    fn normalized_discards_stored_symbol() {
        let mut record = DailyRecord::new(
            Progress::Quantitative {
                unit: "glasses".into(),
                goal: 8,
                count: 1,
            },
            at(0),
            Some("ana"),
        );
        record.symbol = Symbol::Completed;
        assert_eq!(record.normalized().symbol, Symbol::Missed);
    }

    #[test]
    fn progress_json_is_tagged_by_kind() {
        let progress = Progress::Quantitative {
            unit: "pages".into(),
            goal: 20,
            count: 5,
        };
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["kind"], "quantitative");
        assert_eq!(json["count"], 5);
    }

    #[test]
    fn timer_running_tracks_start_and_stop() {
        let mut progress = Progress::TimeBased {
            target_seconds: 600,
            elapsed_seconds: 0,
            pause_count: 0,
            started_at: Some(at(10)),
            stopped_at: None,
        };
        assert!(progress.timer_running());
        if let Progress::TimeBased { stopped_at, .. } = &mut progress {
            *stopped_at = Some(at(20));
        }
        assert!(!progress.timer_running());
    }
}
