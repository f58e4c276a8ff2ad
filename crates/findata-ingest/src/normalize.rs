//! Type coercion of raw source values
//!
//! Every function here is total: unparseable input yields `None` (or
//! [`Category::Unknown`]) and never an error. The validator decides whether a
//! `None` is a problem for a given field.

use std::str::FromStr;

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::raw::RawValue;

/// Date layouts accepted from the source, tried in order
pub const DATE_FORMATS: [&str; 5] = ["%Y%m%d", "%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d", "%d/%m/%Y"];

/// Normalized status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    Paid,
    Active,
    Overdue,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Paid => "PAID",
            Category::Active => "ACTIVE",
            Category::Overdue => "OVERDUE",
            Category::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn date(value: &RawValue) -> Option<NaiveDate> {
    match value {
        RawValue::Date(d) => Some(*d),
        RawValue::DateTime(dt) => Some(dt.date()),
        RawValue::Null | RawValue::Bool(_) => None,
        other => {
            let text = other.to_text()?;
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        }
    }
}

pub fn decimal(value: &RawValue) -> Option<BigDecimal> {
    match value {
        RawValue::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        RawValue::Text(s) => parse_decimal(s),
        _ => None,
    }
}

/// Parse a decimal string, tolerating comma separators, embedded spaces and
/// digit grouping ("1.234,56" and "1 234,56" both read as 1234.56)
///
/// Exponent notation is not a source format and is rejected: "1e200000000"
/// would otherwise expand to a number with that many digits.
pub fn parse_decimal(text: &str) -> Option<BigDecimal> {
    if text.contains(['e', 'E']) {
        return None;
    }
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    let candidate = match cleaned.rsplit_once('.') {
        Some((head, tail)) if head.contains('.') => format!("{}.{}", head.replace('.', ""), tail),
        _ => cleaned,
    };

    BigDecimal::from_str(&candidate).ok()
}

/// Fractional rate from percent, basis-point or already-fractional input
///
/// Explicit markers win: "150bps" is 0.015 and "12.5%" is 0.125. Unmarked
/// values above 1 are treated as basis points from 1000 up and as percent
/// below that. Values at or below 1 are returned unchanged.
pub fn rate(value: &RawValue) -> Option<BigDecimal> {
    if value.is_empty() {
        return None;
    }
    let value = match value {
        RawValue::Number(_) => decimal(value)?,
        other => {
            let text = other.to_text()?.to_lowercase();
            let text = text.trim();
            if text.contains("bps") {
                return parse_decimal(&text.replace("bps", "")).map(|v| v / BigDecimal::from(10_000));
            }
            if text.contains('%') {
                return parse_decimal(&text.replace('%', "")).map(|v| v / BigDecimal::from(100));
            }
            parse_decimal(text)?
        }
    };
    let one = BigDecimal::from(1);
    if value > one {
        if value >= BigDecimal::from(1000) {
            return Some(value / BigDecimal::from(10_000));
        }
        return Some(value / BigDecimal::from(100));
    }
    Some(value)
}

/// Whole number, truncated toward zero ("10,0" and "10.9" both give 10)
pub fn integer(value: &RawValue) -> Option<i64> {
    match value {
        RawValue::Bool(_) | RawValue::Null => None,
        RawValue::Number(n) => match n.as_i64() {
            Some(i) => Some(i),
            None => truncate(&decimal(value)?),
        },
        RawValue::Text(s) => truncate(&parse_decimal(s)?),
        _ => None,
    }
}

fn truncate(value: &BigDecimal) -> Option<i64> {
    value.with_scale_round(0, RoundingMode::Down).to_i64()
}

pub fn string(value: &RawValue) -> Option<String> {
    let text = value.to_text()?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn category(value: &RawValue) -> Category {
    let Some(text) = value.to_text() else {
        return Category::Unknown;
    };

    match text.trim().to_lowercase().as_str() {
        "k" | "kapalı" | "kapali" | "paid" | "closed" => Category::Paid,
        "a" | "aktif" | "active" => Category::Active,
        "g" | "gecikmiş" | "gecikmis" | "overdue" | "delinquent" => Category::Overdue,
        _ => Category::Unknown,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn test_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        for input in ["20250314", "2025-03-14", "14.03.2025", "2025/03/14", "14/03/2025", " 2025-03-14 "] {
            assert_eq!(date(&RawValue::from(input)), Some(expected), "{input}");
        }
        assert_eq!(date(&RawValue::from(20250314i64)), Some(expected));
        assert_eq!(date(&RawValue::from(expected)), Some(expected));
    }

    #[test]
    fn test_date_rejects_garbage() {
        assert_eq!(date(&RawValue::from("")), None);
        assert_eq!(date(&RawValue::from("yesterday")), None);
        assert_eq!(date(&RawValue::from("2025-02-30")), None);
        assert_eq!(date(&RawValue::Bool(true)), None);
    }

    #[test]
    fn test_decimal_separators() {
        assert_eq!(decimal(&RawValue::from("1000")), Some(dec("1000")));
        assert_eq!(decimal(&RawValue::from("10,5")), Some(dec("10.5")));
        assert_eq!(decimal(&RawValue::from("1.234.56")), Some(dec("1234.56")));
        assert_eq!(decimal(&RawValue::from("1.234,56")), Some(dec("1234.56")));
        assert_eq!(decimal(&RawValue::from("1 000,50")), Some(dec("1000.50")));
        assert_eq!(decimal(&RawValue::from("abc")), None);
        assert_eq!(decimal(&RawValue::from("   ")), None);
        assert_eq!(decimal(&RawValue::Bool(false)), None);
    }

    #[test]
    fn test_rate_scenarios() {
        assert_eq!(rate(&RawValue::from("12.5%")), Some(dec("0.125")));
        assert_eq!(rate(&RawValue::from("150bps")), Some(dec("0.015")));
        assert_eq!(rate(&RawValue::from("1500")), Some(dec("0.15")));
        assert_eq!(rate(&RawValue::from("24")), Some(dec("0.24")));
        assert_eq!(rate(&RawValue::from("0.35")), Some(dec("0.35")));
        assert_eq!(rate(&RawValue::from("1")), Some(dec("1")));
        assert_eq!(rate(&RawValue::from("12,5 %")), Some(dec("0.125")));
        assert_eq!(rate(&RawValue::from("n/a")), None);
        assert_eq!(rate(&RawValue::Null), None);
    }

    #[test]
    fn test_integer() {
        assert_eq!(integer(&RawValue::from(12i64)), Some(12));
        assert_eq!(integer(&RawValue::from("10,0")), Some(10));
        assert_eq!(integer(&RawValue::from("10.9")), Some(10));
        assert_eq!(integer(&RawValue::from("-3.7")), Some(-3));
        assert_eq!(integer(&RawValue::Bool(true)), None);
        assert_eq!(integer(&RawValue::from("twelve")), None);
    }

    #[test]
    fn test_exponent_notation_rejected() {
        for input in ["1e200000000", "1E5", "2.5e-3", "-4e+2"] {
            assert_eq!(decimal(&RawValue::from(input)), None, "{input}");
            assert_eq!(integer(&RawValue::from(input)), None, "{input}");
            assert_eq!(rate(&RawValue::from(input)), None, "{input}");
        }
    }

    #[test]
    fn test_string() {
        assert_eq!(string(&RawValue::from("  L1 ")), Some("L1".to_string()));
        assert_eq!(string(&RawValue::from("   ")), None);
        assert_eq!(string(&RawValue::Null), None);
    }

    #[test]
    fn test_category_synonyms() {
        assert_eq!(category(&RawValue::from("A")), Category::Active);
        assert_eq!(category(&RawValue::from("Aktif")), Category::Active);
        assert_eq!(category(&RawValue::from("KAPALI")), Category::Paid);
        assert_eq!(category(&RawValue::from("closed")), Category::Paid);
        assert_eq!(category(&RawValue::from(" gecikmiş ")), Category::Overdue);
        assert_eq!(category(&RawValue::from("Delinquent")), Category::Overdue);
        assert_eq!(category(&RawValue::from("pending")), Category::Unknown);
        assert_eq!(category(&RawValue::Null), Category::Unknown);
    }

    proptest! {
        #[test]
        fn prop_single_separator_matches_dot(int in 0u32..1_000_000, frac in 0u32..1000, comma in any::<bool>()) {
            let sep = if comma { "," } else { "." };
            let input = format!("{int}{sep}{frac}");
            let expected = BigDecimal::from_str(&input.replace(',', ".")).ok();
            prop_assert_eq!(decimal(&RawValue::from(input.as_str())), expected);
        }

        #[test]
        fn prop_rate_idempotent_on_fractions(x in -1_000_000i64..=1_000_000) {
            // x / 1_000_000 spans [-1, 1]
            let input = (BigDecimal::from(x) / BigDecimal::from(1_000_000)).to_string();
            let once = rate(&RawValue::from(input.as_str())).unwrap();
            let twice = rate(&RawValue::from(once.to_string())).unwrap();
            prop_assert_eq!(once, twice);
        }
    }
}
