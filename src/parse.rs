//! Primitive field parsers.
//!
//! Failure policy is lossy: an amount that cannot be read becomes `0.0`, a
//! date becomes `None`. The `try_*` variants expose the failure so callers can
//! keep a [`ParseWarning`] next to the defaulted value.
//!
//! Dates are tried against a fixed list of formats and the first that parses
//! wins. `03/04/2023` is therefore March 4th because `MM/DD/YYYY` precedes
//! `DD/MM/YYYY`; no locale inference is attempted.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::warn;

/// Formats tried by [`parse_date`], in order.
pub const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%d-%m-%Y", "%m/%d/%Y", "%Y/%m/%d", "%d/%m/%Y"];

// chrono's %Y takes one to four digits; statements always print four
static YEAR_FIRST: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}[-/]\d{1,2}[-/]\d{1,2}$").unwrap());
static YEAR_LAST: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}[-/]\d{1,2}[-/]\d{4}$").unwrap());

const CURRENCY_SYMBOLS: [char; 3] = ['$', '€', '£'];
const MINUS_GLYPHS: [char; 3] = ['\u{2212}', '\u{FE63}', '\u{FF0D}'];

/// A field that fell back to its neutral value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseWarning {
    pub field: &'static str,
    pub raw: String,
    pub reason: String,
}

impl ParseWarning {
    fn new(field: &'static str, raw: &str, reason: impl Into<String>) -> Self {
        Self {
            field,
            raw: raw.to_string(),
            reason: reason.into(),
        }
    }
}

/// `Ok(None)` for absent/empty input, `Err` when the text is not a number.
pub fn try_parse_amount(raw: Option<&str>) -> Result<Option<f64>, ParseWarning> {
    let raw = match raw {
        Some(r) if !r.is_empty() => r,
        _ => return Ok(None),
    };
    let cleaned: String = raw
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',' && !c.is_whitespace())
        .map(|c| if MINUS_GLYPHS.contains(&c) { '-' } else { c })
        .collect();

    cleaned
        .parse::<f64>()
        .map(Some)
        .map_err(|e| ParseWarning::new("amount", raw, e.to_string()))
}

pub fn parse_amount(raw: Option<&str>) -> f64 {
    match try_parse_amount(raw) {
        Ok(value) => value.unwrap_or(0.0),
        Err(warning) => {
            warn!(raw = %warning.raw, "Error parsing amount: {}", warning.reason);
            0.0
        }
    }
}

pub fn try_parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>, ParseWarning> {
    let raw = match raw {
        Some(r) if !r.is_empty() => r,
        _ => return Ok(None),
    };
    let text = raw.trim();
    DATE_FORMATS
        .iter()
        .filter(|fmt| {
            let shape = if fmt.starts_with("%Y") { &YEAR_FIRST } else { &YEAR_LAST };
            shape.is_match(text)
        })
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .map(Some)
        .ok_or_else(|| ParseWarning::new("date", raw, "no known date format matched"))
}

pub fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    match try_parse_date(raw) {
        Ok(date) => date,
        Err(warning) => {
            warn!(raw = %warning.raw, "Error parsing date: {}", warning.reason);
            None
        }
    }
}

/// Values that can be read as a yes/no flag.
pub trait FlagValue {
    fn as_flag(&self) -> bool;
}

impl FlagValue for bool {
    fn as_flag(&self) -> bool {
        *self
    }
}

impl FlagValue for str {
    fn as_flag(&self) -> bool {
        matches!(self.trim().to_lowercase().as_str(), "yes" | "true" | "1")
    }
}

impl FlagValue for String {
    fn as_flag(&self) -> bool {
        self.as_str().as_flag()
    }
}

impl<T: FlagValue + ?Sized> FlagValue for &T {
    fn as_flag(&self) -> bool {
        (**self).as_flag()
    }
}

impl<T: FlagValue> FlagValue for Option<T> {
    fn as_flag(&self) -> bool {
        self.as_ref().map_or(false, FlagValue::as_flag)
    }
}

/// `true` only for `yes`/`true`/`1` (any case, surrounding space ignored);
/// null is `false`, native booleans pass through.
pub fn parse_bool<V: FlagValue>(value: V) -> bool {
    value.as_flag()
}
