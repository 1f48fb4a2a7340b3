use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::InsightsError;

// ── Month ─────────────────────────────────────────────────────────────────────

/// A calendar month, the reporting granularity of both exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    /// Build a month, returning `None` when `month` is outside `1..=12`.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// The month that contains `date`.
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

    /// First day of the month.
    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    /// The following calendar month.
    pub fn succ(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Every month from `start` to `end` inclusive. Empty when `start > end`.
    pub fn range_inclusive(start: Month, end: Month) -> Vec<Month> {
        let mut months = Vec::new();
        let mut current = start;
        while current <= end {
            months.push(current);
            current = current.succ();
        }
        months
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Month {
    type Err = InsightsError;

    /// Accepts `YYYY-MM` or any full date form understood by [`parse_date`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_date(s)
            .map(|parsed| Month::of(parsed.date))
            .ok_or_else(|| {
                InsightsError::InvalidArgument(format!(
                    "Unable to parse '{}' as YYYY-MM month value",
                    s
                ))
            })
    }
}

impl Serialize for Month {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Month {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ── Date parsing ──────────────────────────────────────────────────────────────

/// Granularity of a parsed date string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateGranularity {
    Month,
    Day,
}

/// A date together with the precision it was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedDate {
    pub date: NaiveDate,
    pub granularity: DateGranularity,
}

/// Parse the date forms found in the exports.
///
/// * `YYYY-MM` → first day of the month, month granularity.
/// * `YYYY-MM-DD` → that day.
/// * ISO timestamps (with or without `Z`/offset) → their date component.
///
/// Returns `None` for anything else.
pub fn parse_date(raw: &str) -> Option<ParsedDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(ParsedDate {
            date,
            granularity: DateGranularity::Day,
        });
    }

    if let Some(date) = parse_year_month(s) {
        return Some(ParsedDate {
            date,
            granularity: DateGranularity::Month,
        });
    }

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(ParsedDate {
            date: dt.date_naive(),
            granularity: DateGranularity::Day,
        });
    }

    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
    ];
    FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(s, fmt)
            .ok()
            .map(|naive| ParsedDate {
                date: naive.date(),
                granularity: DateGranularity::Day,
            })
    })
}

/// `YYYY-MM` (one- or two-digit month) → first day of that month.
fn parse_year_month(s: &str) -> Option<NaiveDate> {
    let (year, month) = s.split_once('-')?;
    if year.len() != 4 || month.is_empty() || month.len() > 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, 1)
}

// ── DateRange ─────────────────────────────────────────────────────────────────

/// Inclusive date bounds used by the `date_range` filter.
///
/// A month-only end bound covers the whole month, so `2025-01..2025-02`
/// keeps a premium request dated `2025-02-17`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Build a range from optional raw bounds, validating their order.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> crate::error::Result<Self> {
        let start = start
            .map(|raw| parse_bound(raw, "start"))
            .transpose()?
            .map(|p| p.date);
        let end = end
            .map(|raw| parse_bound(raw, "end"))
            .transpose()?
            .map(|p| match p.granularity {
                DateGranularity::Month => last_day_of_month(p.date),
                DateGranularity::Day => p.date,
            });

        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(InsightsError::InvalidArgument(
                    "start_month must be earlier than end_month".to_string(),
                ));
            }
        }
        Ok(Self { start, end })
    }

    /// `true` when `date` lies within both bounds.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }

    pub fn start_month(&self) -> Option<Month> {
        self.start.map(Month::of)
    }

    pub fn end_month(&self) -> Option<Month> {
        self.end.map(Month::of)
    }

    /// Human-readable period label used in summaries.
    pub fn description(&self) -> String {
        match (self.start_month(), self.end_month()) {
            (Some(s), Some(e)) if s == e => s.to_string(),
            (Some(s), Some(e)) => format!("{} to {}", s, e),
            (Some(s), None) => format!("from {}", s),
            (None, Some(e)) => format!("up to {}", e),
            (None, None) => "all available months".to_string(),
        }
    }
}

fn parse_bound(raw: &str, which: &str) -> crate::error::Result<ParsedDate> {
    parse_date(raw).ok_or_else(|| {
        InsightsError::InvalidArgument(format!(
            "Unable to parse {} bound '{}' as YYYY-MM or YYYY-MM-DD",
            which, raw
        ))
    })
}

fn last_day_of_month(first: NaiveDate) -> NaiveDate {
    let next = Month::of(first).succ().first_day();
    next.pred_opt().unwrap_or(first)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_month_only() {
        let parsed = parse_date("2025-01").unwrap();
        assert_eq!(parsed.date, ymd(2025, 1, 1));
        assert_eq!(parsed.granularity, DateGranularity::Month);
    }

    #[test]
    fn test_parse_full_date() {
        let parsed = parse_date("2025-07-15").unwrap();
        assert_eq!(parsed.date, ymd(2025, 7, 15));
        assert_eq!(parsed.granularity, DateGranularity::Day);
    }

    #[test]
    fn test_parse_timestamp_truncates_to_date() {
        assert_eq!(parse_date("2025-07-15T10:00:00Z").unwrap().date, ymd(2025, 7, 15));
        assert_eq!(parse_date("2025-07-15 23:59:59").unwrap().date, ymd(2025, 7, 15));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_date("").is_none());
        assert!(parse_date("July 2025").is_none());
        assert!(parse_date("2025-13").is_none());
        assert!(parse_date("25-01").is_none());
    }

    #[test]
    fn test_month_display_and_parse() {
        let m: Month = "2025-3".parse().unwrap();
        assert_eq!(m.to_string(), "2025-03");
        assert!("nope".parse::<Month>().is_err());
    }

    #[test]
    fn test_month_succ_wraps_year() {
        let dec = Month::new(2024, 12).unwrap();
        assert_eq!(dec.succ(), Month::new(2025, 1).unwrap());
    }

    #[test]
    fn test_month_range_inclusive() {
        let start = Month::new(2024, 11).unwrap();
        let end = Month::new(2025, 2).unwrap();
        let labels: Vec<String> = Month::range_inclusive(start, end)
            .iter()
            .map(|m| m.to_string())
            .collect();
        assert_eq!(labels, vec!["2024-11", "2024-12", "2025-01", "2025-02"]);
        assert!(Month::range_inclusive(end, start).is_empty());
    }

    #[test]
    fn test_date_range_month_end_covers_whole_month() {
        let range = DateRange::parse(Some("2025-01"), Some("2025-02")).unwrap();
        assert!(range.contains(ymd(2025, 1, 1)));
        assert!(range.contains(ymd(2025, 2, 28)));
        assert!(!range.contains(ymd(2025, 3, 1)));
        assert!(!range.contains(ymd(2024, 12, 31)));
    }

    #[test]
    fn test_date_range_day_bounds_inclusive() {
        let range = DateRange::parse(Some("2025-01-10"), Some("2025-01-20")).unwrap();
        assert!(range.contains(ymd(2025, 1, 10)));
        assert!(range.contains(ymd(2025, 1, 20)));
        assert!(!range.contains(ymd(2025, 1, 21)));
    }

    #[test]
    fn test_date_range_rejects_inverted_bounds() {
        let err = DateRange::parse(Some("2025-03"), Some("2025-01")).unwrap_err();
        assert!(err.to_string().contains("start_month must be earlier"));
    }

    #[test]
    fn test_date_range_open_bounds() {
        let range = DateRange::parse(None, Some("2025-01")).unwrap();
        assert!(range.contains(ymd(1999, 1, 1)));
        assert!(!range.contains(ymd(2025, 2, 1)));
        assert_eq!(range.description(), "up to 2025-01");
        assert_eq!(DateRange::default().description(), "all available months");
    }

    #[test]
    fn test_date_range_description_single_month() {
        let range = DateRange::parse(Some("2025-01"), Some("2025-01")).unwrap();
        assert_eq!(range.description(), "2025-01");
    }
}
