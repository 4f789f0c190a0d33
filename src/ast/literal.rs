//! Literal value types for FHIRPath expressions

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::core::error_code::FP0003;
use crate::core::temporal::{PrecisionDate, PrecisionDateTime, PrecisionTime};
use crate::core::{FhirPathError, Quantity, Result};

/// Literal values that can appear directly in FHIRPath expressions
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    /// `{}`
    Null,
    Boolean(bool),
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Date(PrecisionDate),
    DateTime(PrecisionDateTime),
    Time(PrecisionTime),
    /// Quantity literal (e.g. `5 'mg'`, `4 days`)
    Quantity { value: Decimal, unit: String },
}

fn malformed(kind: &str, text: &str) -> FhirPathError {
    FhirPathError::syntax_error(FP0003, format!("Invalid {kind} literal: {text}"), None)
}

impl LiteralValue {
    /// Parse a quoted string literal, handling escape sequences
    pub fn parse_string(text: &str) -> Result<Self> {
        Ok(Self::String(unescape(strip_quotes(text, '\''))))
    }

    /// Parse a number literal; integers stay integers
    pub fn parse_number(text: &str) -> Result<Self> {
        if !text.contains('.') {
            if let Ok(i) = text.parse::<i64>() {
                return Ok(Self::Integer(i));
            }
        }
        Decimal::from_str(text)
            .map(Self::Decimal)
            .map_err(|_| malformed("number", text))
    }

    /// Parse `@YYYY-MM-DD`
    pub fn parse_date(text: &str) -> Result<Self> {
        PrecisionDate::parse(text.trim_start_matches('@'))
            .map(Self::Date)
            .ok_or_else(|| malformed("date", text))
    }

    /// Parse `@YYYY-MM-DDThh:mm:ss.fff(+zz:zz)`, including the `@YYYYT` form
    pub fn parse_datetime(text: &str) -> Result<Self> {
        PrecisionDateTime::parse(text.trim_start_matches('@'))
            .map(Self::DateTime)
            .ok_or_else(|| malformed("date-time", text))
    }

    /// Parse `@Thh:mm:ss.fff`
    pub fn parse_time(text: &str) -> Result<Self> {
        PrecisionTime::parse(text.trim_start_matches('@').trim_start_matches('T'))
            .map(Self::Time)
            .ok_or_else(|| malformed("time", text))
    }

    /// Build a quantity from its number text and a quoted UCUM unit or calendar keyword
    pub fn parse_quantity(number: &str, unit: &str) -> Result<Self> {
        let value = Decimal::from_str(number).map_err(|_| malformed("quantity", number))?;
        let unit = unit.trim();
        let unit = if unit.starts_with('\'') {
            unescape(strip_quotes(unit, '\''))
        } else {
            unit.to_string()
        };
        Ok(Self::Quantity { value, unit })
    }
}

fn strip_quotes(text: &str, quote: char) -> &str {
    text.strip_prefix(quote)
        .and_then(|t| t.strip_suffix(quote))
        .unwrap_or(text)
}

/// Resolve FHIRPath escape sequences in a string body
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('f') => out.push('\u{000C}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Quote a string for display, escaping what [`unescape`] resolves
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("{}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::String(s) => f.write_str(&escape(s)),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Date(d) => write!(f, "@{d}"),
            Self::DateTime(dt) => write!(f, "@{dt}"),
            Self::Time(t) => write!(f, "@T{t}"),
            Self::Quantity { value, unit } => {
                let quantity = Quantity::new(*value, unit.clone());
                if quantity.is_calendar_duration() {
                    write!(f, "{value} {unit}")
                } else {
                    write!(f, "{value} {}", escape(unit))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_escapes() {
        let lit = LiteralValue::parse_string(r"'it\'s A\n'").unwrap();
        assert_eq!(lit, LiteralValue::String("it's A\n".to_string()));
    }

    #[test]
    fn test_number_kinds() {
        assert_eq!(LiteralValue::parse_number("42").unwrap(), LiteralValue::Integer(42));
        assert!(matches!(LiteralValue::parse_number("1.50").unwrap(), LiteralValue::Decimal(d) if d.scale() == 2));
        assert!(LiteralValue::parse_number("abc").is_err());
    }

    #[test]
    fn test_temporal_literals() {
        assert!(matches!(LiteralValue::parse_date("@2019-02").unwrap(), LiteralValue::Date(_)));
        assert!(matches!(
            LiteralValue::parse_datetime("@2019-02-03T10:00Z").unwrap(),
            LiteralValue::DateTime(_)
        ));
        assert!(matches!(LiteralValue::parse_time("@T10:30").unwrap(), LiteralValue::Time(_)));
    }

    #[test]
    fn test_quantity_display() {
        let ucum = LiteralValue::parse_quantity("3", "'min'").unwrap();
        assert_eq!(ucum.to_string(), "3 'min'");
        let calendar = LiteralValue::parse_quantity("4", "days").unwrap();
        assert_eq!(calendar.to_string(), "4 days");
    }
}
