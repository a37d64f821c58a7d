use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// One calendar month, the unit a bank statement batch covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatementMonth {
    year: i32,
    month: u32,
}

impl fmt::Display for StatementMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl StatementMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| StatementMonth { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        StatementMonth {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(self) -> i32 {
        self.year
    }

    pub fn month(self) -> u32 {
        self.month
    }

    pub fn first_day(self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(self) -> NaiveDate {
        let (y, m) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(y, m, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn range(self) -> DateRange {
        DateRange::new(self.first_day(), self.last_day())
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl FromStr for StatementMonth {
    type Err = String;

    /// Parses `YYYY-MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (y, m) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("expected YYYY-MM, got '{s}'"))?;
        let year = y.parse::<i32>().map_err(|_| format!("invalid year in '{s}'"))?;
        let month = m.parse::<u32>().map_err(|_| format!("invalid month in '{s}'"))?;
        StatementMonth::new(year, month).ok_or_else(|| format!("no such month: '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Smallest range covering every date, or `None` for an empty input.
    pub fn spanning<I: IntoIterator<Item = NaiveDate>>(dates: I) -> Option<Self> {
        dates.into_iter().fold(None, |acc, d| match acc {
            None => Some(DateRange::new(d, d)),
            Some(r) => Some(DateRange::new(r.start.min(d), r.end.max(d))),
        })
    }
}

/// Period-lock collaborator. Administration of locks lives elsewhere;
/// the engine only asks whether a date falls in a closed period.
pub trait PeriodLock: Send + Sync {
    fn is_period_locked(&self, date: NaiveDate) -> bool;
}

/// Every period is open.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPeriodLocks;

impl PeriodLock for NoPeriodLocks {
    fn is_period_locked(&self, _date: NaiveDate) -> bool {
        false
    }
}

/// A fixed set of closed months, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct LockedMonths {
    months: BTreeSet<StatementMonth>,
}

impl LockedMonths {
    pub fn new<I: IntoIterator<Item = StatementMonth>>(months: I) -> Self {
        LockedMonths {
            months: months.into_iter().collect(),
        }
    }

    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, String> {
        let months = entries
            .iter()
            .map(|s| s.as_ref().parse::<StatementMonth>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(LockedMonths { months })
    }

    pub fn len(&self) -> usize {
        self.months.len()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }
}

impl PeriodLock for LockedMonths {
    fn is_period_locked(&self, date: NaiveDate) -> bool {
        self.months.contains(&StatementMonth::of(date))
    }
}
