//! Date ranges, their partition into sub-intervals, and month iteration.

use std::fmt;

use chrono::{Days, NaiveDate};

use crate::error::{DownloadError, Result};

/// Largest number of days requested in a single AppEEARS task.
pub const DEFAULT_MAX_DAYS: u32 = 10;

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(DownloadError::InvalidRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }

        Ok(DateRange { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Splits the range into contiguous sub-ranges of `max_days`.
    ///
    /// The iterator is lazy. A trailing remainder shorter than `max_days` is
    /// folded into the last interval, so January with 10 days gives
    /// `[1, 10] [11, 20] [21, 31]`. The last interval is therefore shorter
    /// than `2 * max_days`.
    pub fn partition(&self, max_days: u32) -> Result<Partition> {
        if max_days == 0 {
            return Err(DownloadError::InvalidRange(
                "sub-interval length must be at least one day".to_string(),
            ));
        }

        Ok(Partition {
            next_start: Some(self.start),
            end: self.end,
            max_days,
        })
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Iterator returned by [`DateRange::partition`].
#[derive(Debug, Clone)]
pub struct Partition {
    next_start: Option<NaiveDate>,
    end: NaiveDate,
    max_days: u32,
}

impl Iterator for Partition {
    type Item = DateRange;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;

        let remaining = (self.end - start).num_days() + 1;
        let stop = if remaining < 2 * i64::from(self.max_days) {
            self.end
        } else {
            start
                .checked_add_days(Days::new(u64::from(self.max_days) - 1))
                .map_or(self.end, |d| d.min(self.end))
        };

        self.next_start = if stop < self.end {
            stop.succ_opt()
        } else {
            None
        };

        Some(DateRange { start, end: stop })
    }
}

/// A calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(DownloadError::InvalidRange(format!(
                "month {} out of range",
                month
            )));
        }

        Ok(YearMonth { year, month })
    }

    fn succ(self) -> Self {
        if self.month == 12 {
            YearMonth {
                year: self.year + 1,
                month: 1,
            }
        } else {
            YearMonth {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// `YYYYMM`, the prefix of CDS output files.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }
}

/// Parses `YYYYMM` or `YYYY-MM`.
impl std::str::FromStr for YearMonth {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self> {
        let digits: String = s.chars().filter(|c| *c != '-').collect();
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(DownloadError::InvalidRange(format!(
                "`{}` is not a YYYYMM month",
                s
            )));
        }

        let year = digits[..4]
            .parse::<i32>()
            .map_err(|e| DownloadError::InvalidRange(e.to_string()))?;
        let month = digits[4..]
            .parse::<u32>()
            .map_err(|e| DownloadError::InvalidRange(e.to_string()))?;

        YearMonth::new(year, month)
    }
}

/// Every month from `first` to `last`, both included.
pub fn months(first: YearMonth, last: YearMonth) -> Result<Vec<YearMonth>> {
    if first > last {
        return Err(DownloadError::InvalidRange(format!(
            "first month {} is after last month {}",
            first.compact(),
            last.compact()
        )));
    }

    let mut months = vec![first];
    let mut current = first;
    while current < last {
        current = current.succ();
        months.push(current);
    }

    Ok(months)
}

// -- Tests -------------------------------------------------------------------
