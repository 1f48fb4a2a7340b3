//! Cell-level normalization of raw CSV values into typed [`Value`]s.

use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{InsightsError, Result};
use crate::models::{Value, ValueKind};
use crate::time_utils::parse_date;

/// Tokens the exports use for "no value".
const EMPTY_TOKENS: &[&str] = &["", "NA", "N/A", "None", "-"];

/// Coerces raw CSV cells into typed values.
pub struct CellNormalizer;

impl CellNormalizer {
    /// Strip whitespace, non-breaking spaces and wrapping quotes.
    ///
    /// Returns `None` when the cell holds one of the empty tokens.
    pub fn clean(raw: &str) -> Option<&str> {
        let trimmed = raw
            .trim_matches(|c: char| c.is_whitespace() || c == '\u{a0}')
            .trim_matches('"')
            .trim();
        if EMPTY_TOKENS.contains(&trimmed) {
            None
        } else {
            Some(trimmed)
        }
    }

    /// Normalize one cell of `column` according to `kind`.
    ///
    /// `Ok(None)` means the cell is empty; whether that is acceptable is the
    /// caller's decision (optional vs required column).
    pub fn normalize(column: &str, raw: &str, kind: ValueKind) -> Result<Option<Value>> {
        let Some(cell) = Self::clean(raw) else {
            return Ok(None);
        };

        let value = match kind {
            ValueKind::Text => Some(Value::Text(cell.to_string())),
            ValueKind::Boolean => Self::parse_bool(cell).map(Value::Bool),
            ValueKind::Date => parse_date(cell).map(|p| Value::Date(p.date)),
            ValueKind::Integer => Self::parse_integer(cell).map(Value::Integer),
            ValueKind::Float => Self::parse_float(cell, false).map(Value::Float),
            ValueKind::Percent => Self::parse_float(cell, true).map(Value::Float),
            ValueKind::Decimal => Self::parse_decimal(cell).map(Value::Decimal),
        };

        value.map(Some).ok_or_else(|| InsightsError::Normalization {
            line: None,
            column: column.to_string(),
            value: cell.to_string(),
            expected: kind.as_str(),
        })
    }

    /// Case-insensitive boolean match; anything unrecognised is `None`.
    pub fn parse_bool(cell: &str) -> Option<bool> {
        match cell.trim().to_uppercase().as_str() {
            "TRUE" | "YES" | "1" | "T" => Some(true),
            "FALSE" | "NO" | "0" | "F" => Some(false),
            _ => None,
        }
    }

    /// Strip thousands separators and a trailing `%`.
    ///
    /// Returns the numeric text and whether a `%` was present.
    fn strip_numeric(cell: &str) -> (String, bool) {
        let without_commas: String = cell.chars().filter(|c| *c != ',').collect();
        let trimmed = without_commas.trim();
        match trimmed.strip_suffix('%') {
            Some(rest) => (rest.trim().to_string(), true),
            None => (trimmed.to_string(), false),
        }
    }

    fn parse_integer(cell: &str) -> Option<i64> {
        let (text, _) = Self::strip_numeric(cell);
        if let Ok(v) = text.parse::<i64>() {
            return Some(v);
        }
        let f = text.parse::<f64>().ok()?;
        if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            Some(f as i64)
        } else {
            None
        }
    }

    /// A trailing `%` (or `percent_only`) restricts the value to 0–100.
    fn parse_float(cell: &str, percent_only: bool) -> Option<f64> {
        let (text, had_percent) = Self::strip_numeric(cell);
        let v = text.parse::<f64>().ok().filter(|v| v.is_finite())?;
        if (had_percent || percent_only) && !(0.0..=100.0).contains(&v) {
            return None;
        }
        Some(v)
    }

    fn parse_decimal(cell: &str) -> Option<Decimal> {
        let (text, _) = Self::strip_numeric(cell);
        let text = text.strip_prefix('$').unwrap_or(&text);
        Decimal::from_str(text)
            .or_else(|_| Decimal::from_scientific(text))
            .ok()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
