use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Formats tried when a date field does not list its own. Day-first before
/// month-first: `05/23/2025` fails `%d/%m/%Y` and falls through.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%Y/%m/%d",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%Y.%m.%d",
];

/// Decimal separator convention for numeric text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberLocale {
    #[default]
    Auto,
    /// `1,234.5`
    Dot,
    /// `1.234,5`
    Comma,
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

fn is_noise(c: char) -> bool {
    matches!(
        c,
        '€' | '$' | '£' | '¥' | '"' | '\'' | '’' | ' ' | '\u{a0}' | '\u{202f}' | '\u{2009}'
    )
}

/// Parse numeric text as exported by ad platforms and spreadsheets.
///
/// Currency symbols, quotes, apostrophes and (non-breaking) spaces are
/// stripped. `(12.50)` is negative. Returns `None` for anything that is not
/// a number once cleaned.
pub fn parse_decimal(text: &str, locale: NumberLocale) -> Option<Decimal> {
    let cleaned: String = text.chars().filter(|c| !is_noise(*c)).collect();
    let mut body = cleaned.as_str();

    let mut negative = false;
    if let Some(inner) = body.strip_prefix('(').and_then(|b| b.strip_suffix(')')) {
        negative = true;
        body = inner;
    }
    if let Some(rest) = body.strip_prefix('-') {
        negative = !negative;
        body = rest;
    } else if let Some(rest) = body.strip_prefix('+') {
        body = rest;
    }
    if body.is_empty() {
        return None;
    }

    if body.contains(['e', 'E']) {
        let value = Decimal::from_scientific(body).ok()?;
        return Some(if negative { -value } else { value });
    }

    let decimal_sep = decimal_separator(body, locale)?;
    let mut canonical = String::with_capacity(body.len());
    let mut seen_point = false;
    for c in body.chars() {
        match c {
            '0'..='9' => canonical.push(c),
            '.' | ',' if Some(c) == decimal_sep => {
                if seen_point {
                    return None;
                }
                seen_point = true;
                canonical.push('.');
            }
            '.' | ',' => {}
            _ => return None,
        }
    }
    if !canonical.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    if canonical.starts_with('.') {
        canonical.insert(0, '0');
    }

    let value = Decimal::from_str(&canonical).ok()?;
    Some(if negative { -value } else { value })
}

/// Which of `.`/`,` is the decimal point in `body`, `None` for integers.
/// An outer `None` means the separators are contradictory.
fn decimal_separator(body: &str, locale: NumberLocale) -> Option<Option<char>> {
    let dots = body.matches('.').count();
    let commas = body.matches(',').count();
    let sep = match locale {
        NumberLocale::Dot => Some('.'),
        NumberLocale::Comma => Some(','),
        NumberLocale::Auto => match (dots, commas) {
            (0, 0) => None,
            (_, 0) if dots > 1 => None,
            (_, 0) => Some('.'),
            (0, _) if commas > 1 => None,
            (0, _) => {
                let (int_part, frac_part) = body.split_once(',')?;
                let grouping = frac_part.len() == 3
                    && frac_part.bytes().all(|b| b.is_ascii_digit())
                    && int_part.bytes().any(|b| (b'1'..=b'9').contains(&b));
                if grouping {
                    None
                } else {
                    Some(',')
                }
            }
            _ => {
                let last_dot = body.rfind('.');
                let last_comma = body.rfind(',');
                if last_dot > last_comma {
                    Some('.')
                } else {
                    Some(',')
                }
            }
        },
    };
    // A separator used for grouping in a forced locale may still repeat; the
    // decimal one may not.
    match sep {
        Some('.') if dots > 1 => return None,
        Some(',') if commas > 1 => return None,
        _ => {}
    }
    Some(sep)
}

/// Lossless-as-printed conversion of a spreadsheet float.
pub fn decimal_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_str(&format!("{value}")).ok()
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Try each format in order, date-times first then plain dates.
pub fn parse_date<S: AsRef<str>>(text: &str, formats: &[S]) -> Option<NaiveDateTime> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if formats.is_empty() {
        return parse_with(text, DEFAULT_DATE_FORMATS.iter().copied());
    }
    parse_with(text, formats.iter().map(AsRef::as_ref))
}

fn parse_with<'a>(text: &str, formats: impl Iterator<Item = &'a str>) -> Option<NaiveDateTime> {
    for format in formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
        if let Ok(d) = NaiveDate::parse_from_str(text, format) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Excel serial (1900 date system) to a date-time. Exact from serial 61
/// (1900-03-01) on; earlier serials are a day early because of the phantom
/// 1900-02-29.
pub fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    // 9999-12-31 is the last date Excel can show.
    if !serial.is_finite() || serial < 1.0 || serial >= 2_958_466.0 {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let days = serial.trunc() as i64;
    let seconds = (serial.fract() * 86_400.0).round() as i64;
    base.checked_add_signed(Duration::days(days))?
        .checked_add_signed(Duration::seconds(seconds))
}
