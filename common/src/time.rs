//! Calendar helpers for rate dates and historical periods.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Default number of days to look back for a single-date query.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 3;

/// The dates tried for a single-date query: `date`, then each earlier day up
/// to `lookback_days` back. Weekend and holiday queries land on the previous
/// publication day this way.
pub fn lookback_dates(date: NaiveDate, lookback_days: u32) -> Vec<NaiveDate> {
    (0..=lookback_days as u64)
        .filter_map(|n| date.checked_sub_days(Days::new(n)))
        .collect()
}

/// Parse an ISO `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate, ParseError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| ParseError::InvalidDate(format!("{}: {}", s.trim(), e)))
}

/// A calendar month. Historical feeds that publish one file per month are
/// fetched and memoized per period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// Returns `None` for a month outside `1..=12`.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // Period is only constructed with a valid month.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last calendar day of the month.
    pub fn last_day(&self) -> NaiveDate {
        let (y, m) = if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        };
        NaiveDate::from_ymd_opt(y, m, 1)
            .and_then(|d| d.pred_opt())
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidDate(format!("invalid period: {}", s));
        let (y, m) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year = y.parse().map_err(|_| invalid())?;
        let month = m.parse().map_err(|_| invalid())?;
        Period::new(year, month).ok_or_else(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_lookback_dates() {
        let dates = lookback_dates(d(2024, 1, 7), 3);
        assert_eq!(
            dates,
            vec![d(2024, 1, 7), d(2024, 1, 6), d(2024, 1, 5), d(2024, 1, 4)]
        );
        assert_eq!(lookback_dates(d(2024, 1, 7), 0), vec![d(2024, 1, 7)]);
    }

    #[test]
    fn test_period_bounds() {
        let feb = Period::of(d(2024, 2, 14));
        assert_eq!(feb.to_string(), "2024-02");
        assert_eq!(feb.first_day(), d(2024, 2, 1));
        assert_eq!(feb.last_day(), d(2024, 2, 29));
        assert!(feb.contains(d(2024, 2, 29)));
        assert!(!feb.contains(d(2024, 3, 1)));

        let dec = Period::new(2023, 12).unwrap();
        assert_eq!(dec.last_day(), d(2023, 12, 31));
    }

    #[test]
    fn test_period_parse() {
        assert_eq!("2024-03".parse::<Period>().unwrap(), Period::new(2024, 3).unwrap());
        assert!("2024-13".parse::<Period>().is_err());
        assert!("march".parse::<Period>().is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date(" 2024-01-02 ").unwrap(), d(2024, 1, 2));
        assert!(matches!(parse_date("02/01/2024"), Err(ParseError::InvalidDate(_))));
    }
}
