//! Numeric cell coercion

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹', '₩', '₣'];
const NULL_MARKERS: &[&str] = &["", "-", "–", "—", "--"];

/// Typed cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    /// Parsed number
    Number(Decimal),
    /// Blank or dash; excluded from sums
    Null,
    /// Anything else (labels, footnote markers)
    Text(String),
}

impl CellValue {
    /// Numeric value, if any
    #[inline]
    #[must_use]
    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether the cell is a number
    #[inline]
    #[must_use]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }
}

/// Coerce an extracted cell string
///
/// - currency symbols, thousands separators and whitespace are stripped
/// - `(1,234)` is negative
/// - a trailing `%` is dropped (the value is taken as printed)
/// - blank and dash cells are [`CellValue::Null`]
#[must_use]
pub fn coerce_cell(raw: &str) -> CellValue {
    let trimmed = raw.trim();
    if NULL_MARKERS.contains(&trimmed) {
        return CellValue::Null;
    }

    let mut text: String = trimmed
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && !c.is_whitespace() && *c != ',' && *c != '\'')
        .collect();

    if let Some(stripped) = text.strip_suffix('%') {
        text = stripped.to_string();
    }

    if NULL_MARKERS.contains(&text.as_str()) {
        return CellValue::Null;
    }

    let (negate, body) = match text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, text.as_str()),
    };

    let body = body.strip_prefix('+').unwrap_or(body);
    if body.is_empty() || !body.chars().any(|c| c.is_ascii_digit()) {
        return CellValue::Text(trimmed.to_string());
    }

    match Decimal::from_str(body) {
        Ok(value) => {
            let signed = if negate { -value } else { value };
            CellValue::Number(signed.normalize())
        }
        Err(_) => CellValue::Text(trimmed.to_string()),
    }
}
