use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::day::DayKey;
use super::record::{DailyRecord, Progress, Symbol};
use crate::error::ValidationError;

/// The three ways an item can be tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingKind {
    Binary,
    Quantitative,
    TimeBased,
}

impl TrackingKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::Quantitative => "quantitative",
            Self::TimeBased => "time_based",
        }
    }
}

impl fmt::Display for TrackingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracking kind together with its goal parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tracking {
    Binary,
    Quantitative { unit: String, target: u32 },
    TimeBased { target_seconds: u64 },
}

impl Tracking {
    #[must_use]
    pub const fn kind(&self) -> TrackingKind {
        match self {
            Self::Binary => TrackingKind::Binary,
            Self::Quantitative { .. } => TrackingKind::Quantitative,
            Self::TimeBased { .. } => TrackingKind::TimeBased,
        }
    }

    /// Empty progress for a day nothing has been logged on yet.
    #[must_use]
    pub fn empty_progress(&self) -> Progress {
        match self {
            Self::Binary => Progress::Binary { marker: None },
            Self::Quantitative { unit, target } => Progress::Quantitative {
                unit: unit.clone(),
                goal: *target,
                count: 0,
            },
            Self::TimeBased { target_seconds } => Progress::TimeBased {
                target_seconds: *target_seconds,
                elapsed_seconds: 0,
                pause_count: 0,
                started_at: None,
                stopped_at: None,
            },
        }
    }
}

/// Which days an item is expected to be done on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    Daily,
    Weekdays { days: Vec<Weekday> },
    TimesPerWeek { times: u8 },
}

impl Schedule {
    /// Sort and dedup weekday sets, and reject empty or out-of-range rules.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidSchedule`] for an empty weekday set
    /// or a weekly count outside `1..=7`.
    pub fn normalize(self) -> Result<Self, ValidationError> {
        match self {
            Self::Daily => Ok(Self::Daily),
            Self::Weekdays { mut days } => {
                days.sort_by_key(Weekday::num_days_from_monday);
                days.dedup();
                if days.is_empty() {
                    return Err(ValidationError::InvalidSchedule("at least one weekday"));
                }
                Ok(Self::Weekdays { days })
            }
            Self::TimesPerWeek { times } => {
                if (1..=7).contains(&times) {
                    Ok(Self::TimesPerWeek { times })
                } else {
                    Err(ValidationError::InvalidSchedule("1..=7 times per week"))
                }
            }
        }
    }
}

/// A habit or goal being monitored, with its per-day records embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedItem {
    pub id: String,
    pub title: String,
    pub tracking: Tracking,
    #[serde(default)]
    pub schedule: Schedule,
    pub owner: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub records: BTreeMap<DayKey, DailyRecord>,
}

impl TrackedItem {
    #[must_use]
    pub const fn kind(&self) -> TrackingKind {
        self.tracking.kind()
    }

    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Active items take part in title uniqueness and listings.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.archived && self.deleted_at.is_none()
    }

    /// Reject progress whose variant differs from this item's kind.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::TrackingMismatch`] on a kind mismatch.
    pub fn check_progress(&self, progress: &Progress) -> Result<(), ValidationError> {
        let expected = self.kind();
        let got = progress.kind();
        if expected == got {
            Ok(())
        } else {
            Err(ValidationError::TrackingMismatch { expected, got })
        }
    }

    #[must_use]
    pub fn symbol_on(&self, day: DayKey) -> Symbol {
        self.records.get(&day).map_or(Symbol::Pending, |r| r.symbol)
    }

    /// Whether the schedule expects the item to be done on `day`.
    ///
    /// Weekly quotas count completed days in the same ISO week, excluding
    /// `day` itself.
    #[must_use]
    pub fn is_due(&self, day: DayKey) -> bool {
        if !self.is_active() {
            return false;
        }
        match &self.schedule {
            Schedule::Daily => true,
            Schedule::Weekdays { days } => days.contains(&day.weekday()),
            Schedule::TimesPerWeek { times } => {
                let start = day.week_start();
                let done = self
                    .records
                    .range(start..day)
                    .filter(|(_, r)| r.symbol == Symbol::Completed)
                    .count();
                done < usize::from(*times)
            }
        }
    }
}

/// Input for creating a new item locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDraft {
    pub title: String,
    pub tracking: Tracking,
    #[serde(default)]
    pub schedule: Schedule,
}

/// Changes to non-record fields of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<Tracking>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

impl ItemPatch {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.tracking.is_none()
            && self.schedule.is_none()
            && self.archived.is_none()
    }

    /// Apply the patch to `item`, stamping `updated_at`.
    pub fn apply_to(&self, item: &mut TrackedItem, at: DateTime<Utc>) {
        if let Some(title) = &self.title {
            item.title.clone_from(title);
        }
        if let Some(tracking) = &self.tracking {
            item.tracking = tracking.clone();
        }
        if let Some(schedule) = &self.schedule {
            item.schedule = schedule.clone();
        }
        if let Some(archived) = self.archived {
            item.archived = archived;
        }
        item.updated_at = at;
    }
}
