use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Calendar day a [`DailyRecord`](super::DailyRecord) belongs to.
///
/// Serialized as `YYYY-MM-DD`, which also makes it usable as a JSON map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(NaiveDate);

impl DayKey {
    #[must_use]
    pub const fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Parse a strict `YYYY-MM-DD` key.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidDay`] for anything else.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.len() != 10 {
            return Err(ValidationError::InvalidDay(raw.to_string()));
        }
        NaiveDate::parse_from_str(trimmed, DAY_FORMAT)
            .map(Self)
            .map_err(|_| ValidationError::InvalidDay(raw.to_string()))
    }

    #[must_use]
    pub const fn date(self) -> NaiveDate {
        self.0
    }

    #[must_use]
    pub fn weekday(self) -> Weekday {
        self.0.weekday()
    }

    /// Monday of the ISO week containing this day.
    #[must_use]
    pub fn week_start(self) -> Self {
        let back = i64::from(self.0.weekday().num_days_from_monday());
        Self(self.0 - chrono::Duration::days(back))
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_FORMAT))
    }
}

impl FromStr for DayKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_iso_days() {
        let day = DayKey::parse("2024-01-15").unwrap();
        assert_eq!(day.to_string(), "2024-01-15");
        assert_eq!(day.weekday(), Weekday::Mon);
    }

    #[test]
    fn rejects_loose_formats() {
        for raw in ["2024-1-15", "15/01/2024", "2024-02-30", "", "2024-01-15T00:00"] {
            assert!(
                matches!(DayKey::parse(raw), Err(ValidationError::InvalidDay(_))),
                "{raw} should be rejected"
            );
        }
    }

    #[test]
    fn week_start_is_monday() {
        let sunday = DayKey::parse("2024-01-21").unwrap();
        assert_eq!(sunday.week_start().to_string(), "2024-01-15");
    }

    #[test]
    fn serializes_as_plain_string() {
        let day = DayKey::parse("2024-03-09").unwrap();
        assert_eq!(serde_json::to_string(&day).unwrap(), "\"2024-03-09\"");
        let back: DayKey = serde_json::from_str("\"2024-03-09\"").unwrap();
        assert_eq!(back, day);
    }
}
