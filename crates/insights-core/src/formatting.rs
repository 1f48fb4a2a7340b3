use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places used for derived rates (active / seats).
pub const RATE_DECIMALS: u32 = 2;

/// Format a whole count with thousands separators.
pub fn format_count(value: i64) -> String {
    let grouped = group_thousands(&value.unsigned_abs().to_string());
    if value < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

/// Format a decimal with thousands separators, rounded half away from zero.
///
/// # Examples
///
/// ```
/// use insights_core::formatting::format_decimal;
/// use rust_decimal::Decimal;
///
/// assert_eq!(format_decimal(Decimal::new(123456789, 3), 2), "123,456.79");
/// assert_eq!(format_decimal(Decimal::new(15, 0), 0), "15");
/// ```
pub fn format_decimal(value: Decimal, decimals: u32) -> String {
    let rounded = value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.prec$}", rounded.abs(), prec = decimals as usize);
    let (int_part, frac_part) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (text, None),
    };
    let mut out = group_thousands(&int_part);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(&frac);
    }
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("-{}", out)
    } else {
        out
    }
}

/// Format a monetary amount as a USD string with two decimal places and
/// thousands separators.
///
/// # Examples
///
/// ```
/// use insights_core::formatting::format_currency;
/// use rust_decimal::Decimal;
///
/// assert_eq!(format_currency(Decimal::new(123456, 2)), "$1,234.56");
/// assert_eq!(format_currency(Decimal::ZERO), "$0.00");
/// assert_eq!(format_currency(Decimal::new(-999, 2)), "$-9.99");
/// ```
pub fn format_currency(amount: Decimal) -> String {
    if amount.is_sign_negative() && !amount.is_zero() {
        format!("$-{}", format_decimal(amount.abs(), 2))
    } else {
        format!("${}", format_decimal(amount, 2))
    }
}

/// Format a 0–100 percentage with one decimal, or `"n/a"` when undefined.
pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}%", v),
        None => "n/a".to_string(),
    }
}

/// `(part / whole) * 100`, rounded to `decimal_places`.
///
/// Returns `None` when `whole` is zero, so a rate over an empty population is
/// undefined rather than zero or infinite.
///
/// # Examples
///
/// ```
/// use insights_core::formatting::percentage;
///
/// assert_eq!(percentage(50.0, 200.0, 1), Some(25.0));
/// assert_eq!(percentage(0.0, 0.0, 2), None);
/// ```
pub fn percentage(part: f64, whole: f64, decimal_places: u32) -> Option<f64> {
    if whole == 0.0 || !whole.is_finite() || !part.is_finite() {
        return None;
    }
    let raw = (part / whole) * 100.0;
    let factor = 10_f64.powi(decimal_places as i32);
    Some((raw * factor).round() / factor)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Insert commas every three digits from the right of an integer string.
fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

// ── Tests ──────────────────────────────────────────────────────────────────────
