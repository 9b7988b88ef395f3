// Ranking module.
// Day and window score aggregation plus the daily refresh rule.

pub mod day;
pub mod refresh;
pub mod scores;
pub mod window;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

pub use day::DayAggregator;
pub use refresh::should_force_refresh;
pub use scores::{ScoreEntry, ScoreMap};
pub use window::{WindowAggregator, WindowScores};

/// Named time range over which activity is aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Day,
    Week,
    Month,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Day => "day",
            WindowKind::Week => "week",
            WindowKind::Month => "month",
        }
    }

    /// Number of days in a rolling window of this kind.
    pub fn days(&self) -> u64 {
        match self {
            WindowKind::Day => 1,
            WindowKind::Week => 7,
            WindowKind::Month => 30,
        }
    }
}

/// A concrete inclusive date range with a stable cache identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpan {
    pub kind: WindowKind,
    pub identifier: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl WindowSpan {
    /// A single calendar day.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            kind: WindowKind::Day,
            identifier: date.format("%Y-%m-%d").to_string(),
            start: date,
            end: date,
        }
    }

    /// The `kind.days()` days ending at `anchor`, inclusive.
    pub fn rolling(kind: WindowKind, anchor: NaiveDate) -> Self {
        let start = anchor
            .checked_sub_days(Days::new(kind.days() - 1))
            .unwrap_or(NaiveDate::MIN);
        Self {
            kind,
            identifier: anchor.format("%Y-%m-%d").to_string(),
            start,
            end: anchor,
        }
    }

    /// Monday through Sunday of an ISO week.
    pub fn iso_week(year: i32, week: u32) -> Option<Self> {
        let start = NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?;
        let end = NaiveDate::from_isoywd_opt(year, week, Weekday::Sun)?;
        Some(Self {
            kind: WindowKind::Week,
            identifier: format!("{year:04}-W{week:02}"),
            start,
            end,
        })
    }

    /// Every day of a calendar month.
    pub fn calendar_month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = start.checked_add_months(chrono::Months::new(1))?;
        let end = next.pred_opt()?;
        Some(Self {
            kind: WindowKind::Month,
            identifier: format!("{:04}-{:02}", start.year(), start.month()),
            start,
            end,
        })
    }

    /// Dates in the span, oldest first.
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|date| *date <= self.end)
            .collect()
    }
}
