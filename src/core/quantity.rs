//! Quantities and UCUM unit conversion
//!
//! Units are parsed into a scale factor over base units plus a dimension
//! vector. Two quantities are comparable when their dimension vectors match.
//! Calendar keywords (`year`, `month`, ...) are handled alongside UCUM codes:
//! weeks and finer map onto their UCUM definite durations, while `year` and
//! `month` live in their own calendar dimension and only compare with each
//! other.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use rust_decimal::Decimal;

use crate::core::error_code::{FP0051, FP0056};
use crate::core::temporal::CalendarUnit;
use crate::core::{FhirPathError, Result};

/// Exponents over m, g, s, K, mol, A, cd and calendar months
type Dimension = [i8; 8];

const DIMENSIONLESS: Dimension = [0; 8];
const LENGTH: Dimension = [1, 0, 0, 0, 0, 0, 0, 0];
const MASS: Dimension = [0, 1, 0, 0, 0, 0, 0, 0];
const TIME: Dimension = [0, 0, 1, 0, 0, 0, 0, 0];
const TEMPERATURE: Dimension = [0, 0, 0, 1, 0, 0, 0, 0];
const AMOUNT: Dimension = [0, 0, 0, 0, 1, 0, 0, 0];
const CURRENT: Dimension = [0, 0, 0, 0, 0, 1, 0, 0];
const LUMINOUS: Dimension = [0, 0, 0, 0, 0, 0, 1, 0];
const CALENDAR_MONTH: Dimension = [0, 0, 0, 0, 0, 0, 0, 1];
const VOLUME: Dimension = [3, 0, 0, 0, 0, 0, 0, 0];
const FORCE: Dimension = [1, 1, -2, 0, 0, 0, 0, 0];
const PRESSURE: Dimension = [-1, 1, -2, 0, 0, 0, 0, 0];
const ENERGY: Dimension = [2, 1, -2, 0, 0, 0, 0, 0];
const POWER: Dimension = [2, 1, -3, 0, 0, 0, 0, 0];
const FREQUENCY: Dimension = [0, 0, -1, 0, 0, 0, 0, 0];

struct Atom {
    factor: &'static str,
    dimension: Dimension,
    /// Offset added after scaling, for Celsius and Fahrenheit
    offset: Option<&'static str>,
    metric: bool,
}

const fn atom(factor: &'static str, dimension: Dimension, metric: bool) -> Atom {
    Atom {
        factor,
        dimension,
        offset: None,
        metric,
    }
}

static ATOMS: Lazy<HashMap<&'static str, Atom>> = Lazy::new(|| {
    HashMap::from([
        ("1", atom("1", DIMENSIONLESS, false)),
        ("%", atom("0.01", DIMENSIONLESS, false)),
        ("[ppm]", atom("0.000001", DIMENSIONLESS, false)),
        ("m", atom("1", LENGTH, true)),
        ("[in_i]", atom("0.0254", LENGTH, false)),
        ("[ft_i]", atom("0.3048", LENGTH, false)),
        ("[yd_i]", atom("0.9144", LENGTH, false)),
        ("[mi_i]", atom("1609.344", LENGTH, false)),
        ("g", atom("1", MASS, true)),
        ("t", atom("1000000", MASS, true)),
        ("[lb_av]", atom("453.59237", MASS, false)),
        ("[oz_av]", atom("28.349523125", MASS, false)),
        ("s", atom("1", TIME, true)),
        ("min", atom("60", TIME, false)),
        ("h", atom("3600", TIME, false)),
        ("d", atom("86400", TIME, false)),
        ("wk", atom("604800", TIME, false)),
        ("mo", atom("2629800", TIME, false)),
        ("a", atom("31557600", TIME, false)),
        ("K", atom("1", TEMPERATURE, true)),
        (
            "Cel",
            Atom {
                factor: "1",
                dimension: TEMPERATURE,
                offset: Some("273.15"),
                metric: true,
            },
        ),
        (
            "[degF]",
            Atom {
                factor: "0.5555555555555555555555555556",
                dimension: TEMPERATURE,
                offset: Some("255.3722222222222222222222222"),
                metric: false,
            },
        ),
        ("mol", atom("1", AMOUNT, true)),
        ("A", atom("1", CURRENT, true)),
        ("cd", atom("1", LUMINOUS, true)),
        ("L", atom("0.001", VOLUME, true)),
        ("l", atom("0.001", VOLUME, true)),
        ("N", atom("1000", FORCE, true)),
        ("Pa", atom("1000", PRESSURE, true)),
        ("bar", atom("100000000", PRESSURE, true)),
        ("atm", atom("101325000", PRESSURE, false)),
        ("mm[Hg]", atom("133322.387415", PRESSURE, false)),
        ("J", atom("1000", ENERGY, true)),
        ("cal", atom("4184", ENERGY, true)),
        ("W", atom("1000", POWER, true)),
        ("Hz", atom("1", FREQUENCY, true)),
        ("year", atom("12", CALENDAR_MONTH, false)),
        ("month", atom("1", CALENDAR_MONTH, false)),
    ])
});

static PREFIXES: &[(&str, &str)] = &[
    ("da", "10"),
    ("Y", "1000000000000000000000000"),
    ("Z", "1000000000000000000000"),
    ("E", "1000000000000000000"),
    ("P", "1000000000000000"),
    ("T", "1000000000000"),
    ("G", "1000000000"),
    ("M", "1000000"),
    ("k", "1000"),
    ("h", "100"),
    ("d", "0.1"),
    ("c", "0.01"),
    ("m", "0.001"),
    ("u", "0.000001"),
    ("n", "0.000000001"),
    ("p", "0.000000000001"),
    ("f", "0.000000000000001"),
];

/// Parsed form of a unit string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDefinition {
    pub factor: Decimal,
    dimension: Dimension,
    pub offset: Option<Decimal>,
}

impl UnitDefinition {
    fn dimensionless() -> Self {
        Self {
            factor: Decimal::ONE,
            dimension: DIMENSIONLESS,
            offset: None,
        }
    }

    pub fn is_convertible_to(&self, other: &Self) -> bool {
        self.dimension == other.dimension
    }

    fn combine(mut self, other: Self, exponent: i8) -> Option<Self> {
        for (mine, theirs) in self.dimension.iter_mut().zip(other.dimension.iter()) {
            *mine = mine.checked_add(theirs.checked_mul(exponent)?)?;
        }
        self.factor = if exponent >= 0 {
            self.factor.checked_mul(power(other.factor, exponent)?)?
        } else {
            self.factor.checked_div(power(other.factor, -exponent)?)?
        };
        self.offset = None;
        Some(self)
    }
}

fn power(value: Decimal, exponent: i8) -> Option<Decimal> {
    let mut result = Decimal::ONE;
    for _ in 0..exponent {
        result = result.checked_mul(value)?;
    }
    Some(result)
}

fn calendar_alias(unit: &str) -> &str {
    match CalendarUnit::parse(unit) {
        Some(CalendarUnit::Year) if unit != "a" => "year",
        Some(CalendarUnit::Month) if unit != "mo" => "month",
        Some(CalendarUnit::Week) => "wk",
        Some(CalendarUnit::Day) => "d",
        Some(CalendarUnit::Hour) => "h",
        Some(CalendarUnit::Minute) => "min",
        Some(CalendarUnit::Second) => "s",
        Some(CalendarUnit::Millisecond) => "ms",
        _ => unit,
    }
}

fn lookup_atom(symbol: &str) -> Option<UnitDefinition> {
    let build = |atom: &Atom, scale: Decimal| -> Option<UnitDefinition> {
        Some(UnitDefinition {
            factor: Decimal::from_str(atom.factor).ok()?.checked_mul(scale)?,
            dimension: atom.dimension,
            offset: match atom.offset {
                Some(offset) => Some(Decimal::from_str(offset).ok()?),
                None => None,
            },
        })
    };
    if let Some(atom) = ATOMS.get(symbol) {
        return build(atom, Decimal::ONE);
    }
    for (prefix, scale) in PREFIXES {
        if let Some(rest) = symbol.strip_prefix(prefix) {
            if let Some(atom) = ATOMS.get(rest).filter(|a| a.metric) {
                return build(atom, Decimal::from_str(scale).ok()?);
            }
        }
    }
    None
}

/// Split a trailing signed integer exponent (`m2`, `s-1`) from a component
fn split_exponent(component: &str) -> (&str, i8) {
    let digits_start = component
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    let Some(start) = digits_start else {
        return (component, 1);
    };
    let (mut symbol, digits) = component.split_at(start);
    let mut exponent: i8 = digits.parse().unwrap_or(1);
    if let Some(stripped) = symbol.strip_suffix('-') {
        symbol = stripped;
        exponent = -exponent;
    } else if let Some(stripped) = symbol.strip_suffix('+') {
        symbol = stripped;
    }
    if symbol.is_empty() {
        (component, 1)
    } else {
        (symbol, exponent)
    }
}

fn parse_component(component: &str) -> Option<UnitDefinition> {
    if component.starts_with('{') && component.ends_with('}') {
        return Some(UnitDefinition::dimensionless());
    }
    let component = match component.find('{') {
        Some(index) if component.ends_with('}') => &component[..index],
        _ => component,
    };
    if let Some(inner) = component.strip_prefix('(').and_then(|c| c.strip_suffix(')')) {
        return parse_unit(inner);
    }
    if let Some(definition) = lookup_atom(component) {
        return Some(definition);
    }
    if let Ok(number) = Decimal::from_str(component) {
        return Some(UnitDefinition {
            factor: number,
            ..UnitDefinition::dimensionless()
        });
    }
    if let Some((base, exponent)) = component.split_once("*") {
        let base = Decimal::from_str(base).ok()?;
        let exponent: i8 = exponent.parse().ok()?;
        return Some(UnitDefinition {
            factor: if exponent >= 0 {
                power(base, exponent)?
            } else {
                Decimal::ONE.checked_div(power(base, -exponent)?)?
            },
            ..UnitDefinition::dimensionless()
        });
    }
    let (symbol, exponent) = split_exponent(component);
    let definition = lookup_atom(symbol)?;
    if exponent == 1 {
        return Some(definition);
    }
    UnitDefinition::dimensionless().combine(definition, exponent)
}

/// Split a unit term on top-level `.` and `/` separators
fn tokenize(unit: &str) -> Option<Vec<(bool, &str)>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut brace = false;
    let mut start = 0;
    let mut divide = false;
    for (i, c) in unit.char_indices() {
        match c {
            '(' if !brace => depth += 1,
            ')' if !brace => depth -= 1,
            '{' => brace = true,
            '}' => brace = false,
            '.' | '/' if depth == 0 && !brace => {
                if i > start {
                    parts.push((divide, &unit[start..i]));
                } else if i != 0 || c == '.' {
                    return None;
                }
                divide = c == '/';
                start = i + 1;
            }
            _ => {}
        }
    }
    if start >= unit.len() {
        return None;
    }
    parts.push((divide, &unit[start..]));
    Some(parts)
}

/// Parse a UCUM unit expression or calendar keyword
pub fn parse_unit(unit: &str) -> Option<UnitDefinition> {
    let unit = unit.trim();
    if unit.is_empty() {
        return Some(UnitDefinition::dimensionless());
    }
    let aliased = calendar_alias(unit);
    if let Some(definition) = lookup_atom(aliased) {
        return Some(definition);
    }
    let mut result = UnitDefinition::dimensionless();
    for (divide, component) in tokenize(unit)? {
        let definition = parse_component(component)?;
        result = result.combine(definition, if divide { -1 } else { 1 })?;
    }
    Some(result)
}

/// Numeric value with a UCUM unit or calendar keyword
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Quantity {
    pub value: Decimal,
    pub unit: String,
}

impl Quantity {
    pub fn new(value: Decimal, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    /// Plain number promoted to a quantity with unit `1`
    pub fn dimensionless(value: Decimal) -> Self {
        Self::new(value, "1")
    }

    /// Whether the unit is written as a calendar keyword (`year`, `days`, ...)
    pub fn is_calendar_duration(&self) -> bool {
        let unit = self.unit.as_str();
        CalendarUnit::parse(unit).is_some() && !matches!(unit, "a" | "mo" | "wk" | "d" | "h" | "min" | "s" | "ms")
    }

    /// Calendar unit usable for date/time arithmetic, if any
    pub fn calendar_unit(&self) -> Option<CalendarUnit> {
        CalendarUnit::parse(&self.unit)
    }

    fn definition(&self) -> Result<UnitDefinition> {
        parse_unit(&self.unit).ok_or_else(|| {
            FhirPathError::type_error(FP0051, format!("Unknown unit '{}'", self.unit))
        })
    }

    /// Whether both quantities share a convertible unit system
    pub fn comparable(&self, other: &Quantity) -> bool {
        match (parse_unit(&self.unit), parse_unit(&other.unit)) {
            (Some(a), Some(b)) => a.is_convertible_to(&b),
            _ => false,
        }
    }

    /// Express this quantity in `unit`, `None` when not convertible
    pub fn convert_to(&self, unit: &str) -> Option<Quantity> {
        if self.unit == unit {
            return Some(self.clone());
        }
        let from = parse_unit(&self.unit)?;
        let to = parse_unit(unit)?;
        if !from.is_convertible_to(&to) {
            return None;
        }
        let base = self.value.checked_mul(from.factor)? + from.offset.unwrap_or_default();
        let value = (base - to.offset.unwrap_or_default()).checked_div(to.factor)?;
        Some(Quantity::new(value.normalize(), unit))
    }

    fn aligned(&self, other: &Quantity) -> Result<Option<(Decimal, Decimal)>> {
        if self.unit == other.unit {
            return Ok(Some((self.value, other.value)));
        }
        let (a, b) = (self.definition()?, other.definition()?);
        if !a.is_convertible_to(&b) {
            return Ok(None);
        }
        Ok(other
            .convert_to(&self.unit)
            .map(|converted| (self.value, converted.value)))
    }

    /// Equality after conversion; `None` when the units are not comparable
    pub fn equals(&self, other: &Quantity) -> Option<bool> {
        match self.aligned(other) {
            Ok(Some((a, b))) => Some(a.round_dp(8) == b.round_dp(8)),
            _ => None,
        }
    }

    /// Equivalence compares at the precision of the less precise value
    pub fn equivalent(&self, other: &Quantity) -> bool {
        match self.aligned(other) {
            Ok(Some((a, b))) => {
                let scale = self.value.scale().min(other.value.scale());
                a.round_dp(scale) == b.round_dp(scale)
            }
            _ => false,
        }
    }

    /// Ordering after conversion; incompatible units are a type error
    pub fn compare(&self, other: &Quantity) -> Result<Ordering> {
        match self.aligned(other)? {
            Some((a, b)) => Ok(a.cmp(&b)),
            None => Err(FhirPathError::type_error(
                FP0056,
                format!("Cannot compare quantities with units '{}' and '{}'", self.unit, other.unit),
            )),
        }
    }

    pub fn add(&self, other: &Quantity) -> Result<Quantity> {
        self.additive(other, false)
    }

    pub fn subtract(&self, other: &Quantity) -> Result<Quantity> {
        self.additive(other, true)
    }

    fn additive(&self, other: &Quantity, negate: bool) -> Result<Quantity> {
        let Some((a, b)) = self.aligned(other)? else {
            return Err(FhirPathError::type_error(
                FP0056,
                format!("Cannot add quantities with units '{}' and '{}'", self.unit, other.unit),
            ));
        };
        let value = if negate { a.checked_sub(b) } else { a.checked_add(b) };
        value
            .map(|value| Quantity::new(value, self.unit.clone()))
            .ok_or_else(|| FhirPathError::type_error(FP0051, "Quantity arithmetic overflow"))
    }

    pub fn multiply(&self, other: &Quantity) -> Option<Quantity> {
        let value = self.value.checked_mul(other.value)?;
        let unit = match (self.unit.as_str(), other.unit.as_str()) {
            ("1", unit) | (unit, "1") => unit.to_string(),
            (a, b) => format!("{}.{}", wrap(a), wrap(b)),
        };
        Some(Quantity::new(value, unit))
    }

    pub fn divide(&self, other: &Quantity) -> Option<Quantity> {
        let value = self.value.checked_div(other.value)?;
        let unit = match (self.unit.as_str(), other.unit.as_str()) {
            (a, b) if a == b => "1".to_string(),
            (unit, "1") => unit.to_string(),
            (a, b) => format!("{}/{}", wrap(a), wrap(b)),
        };
        Some(Quantity::new(value, unit))
    }
}

fn wrap(unit: &str) -> String {
    if unit.contains(['.', '/']) {
        format!("({unit})")
    } else {
        unit.to_string()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_calendar_duration() {
            write!(f, "{} {}", self.value, self.unit)
        } else {
            write!(f, "{} '{}'", self.value, self.unit)
        }
    }
}
