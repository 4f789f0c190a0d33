//! Runtime values flowing through evaluation

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde_json::{Value as JsonValue, json};

use crate::core::node::ValueNode;
use crate::core::quantity::Quantity;
use crate::core::temporal::{PrecisionDate, PrecisionDateTime, PrecisionTime};
use crate::core::type_info::TypeInfo;

const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

/// Model types carrying a FHIR Quantity shape
const QUANTITY_TYPES: &[&str] = &[
    "Quantity",
    "Age",
    "Count",
    "Distance",
    "Duration",
    "SimpleQuantity",
    "MoneyQuantity",
];

/// A single FHIRPath value
#[derive(Debug, Clone)]
pub enum FhirPathValue {
    Boolean(bool),
    Integer(i64),
    Decimal(Decimal),
    String(String),
    Date(PrecisionDate),
    DateTime(PrecisionDateTime),
    Time(PrecisionTime),
    Quantity(Quantity),
    /// Element of the input document (or of a resolved external resource)
    Node(Arc<ValueNode>),
    /// Result of `type()`
    TypeInfo(TypeInfo),
    /// The `%terminologies` handle
    Terminologies,
}

impl FhirPathValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn integer(value: i64) -> Self {
        Self::Integer(value)
    }

    pub fn decimal(value: Decimal) -> Self {
        Self::Decimal(value)
    }

    pub fn boolean(value: bool) -> Self {
        Self::Boolean(value)
    }

    pub fn quantity(value: Decimal, unit: impl Into<String>) -> Self {
        Self::Quantity(Quantity::new(value, unit))
    }

    /// FHIRPath type of the value
    pub fn type_info(&self) -> TypeInfo {
        match self {
            Self::Boolean(_) => TypeInfo::system("Boolean"),
            Self::Integer(_) => TypeInfo::system("Integer"),
            Self::Decimal(_) => TypeInfo::system("Decimal"),
            Self::String(_) => TypeInfo::system("String"),
            Self::Date(_) => TypeInfo::system("Date"),
            Self::DateTime(_) => TypeInfo::system("DateTime"),
            Self::Time(_) => TypeInfo::system("Time"),
            Self::Quantity(_) => TypeInfo::system("Quantity"),
            Self::Node(node) => node.type_info(),
            Self::TypeInfo(_) => TypeInfo::system("TypeInfo"),
            Self::Terminologies => TypeInfo::system("Terminologies"),
        }
    }

    /// Short type label for diagnostics
    pub fn type_name(&self) -> String {
        self.type_info().name
    }

    /// Element path when the value came from the document
    pub fn element_path(&self) -> Option<String> {
        match self {
            Self::Node(node) => Some(node.full_path().to_string()),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Arc<ValueNode>> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Convert a document primitive into the matching System value
    ///
    /// Structures that are not quantities come back as the node itself.
    pub fn to_primitive(&self) -> FhirPathValue {
        let Self::Node(node) = self else {
            return self.clone();
        };
        let declared = node.declared_type();
        match node.data() {
            JsonValue::Bool(b) => Self::Boolean(*b),
            JsonValue::Number(n) => {
                let as_decimal = matches!(declared, Some("decimal"));
                match n.as_i64() {
                    Some(i) if !as_decimal => Self::Integer(i),
                    _ => decimal_from_json(n).map_or_else(|| self.clone(), Self::Decimal),
                }
            }
            JsonValue::String(s) => string_primitive(s, declared),
            JsonValue::Object(map) => {
                let quantity_typed = declared.is_some_and(|t| QUANTITY_TYPES.contains(&t));
                let looks_like_quantity = declared.is_none()
                    && map.get("value").is_some_and(JsonValue::is_number)
                    && (map.contains_key("code") || map.contains_key("unit"));
                if quantity_typed || looks_like_quantity {
                    quantity_from_json(map).map_or_else(|| self.clone(), Self::Quantity)
                } else {
                    self.clone()
                }
            }
            _ => self.clone(),
        }
    }

    /// String content of a string-like value
    pub fn as_str(&self) -> Option<String> {
        match self.to_primitive() {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// JSON form for results handed back to callers
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Boolean(b) => JsonValue::Bool(*b),
            Self::Integer(i) => json!(i),
            Self::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(d.to_string())),
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Node(node) => node.data().clone(),
            Self::Quantity(q) => json!({"value": q.value.to_f64(), "unit": q.unit}),
            Self::TypeInfo(info) => json!({"namespace": info.namespace.as_str(), "name": info.name}),
            other => JsonValue::String(other.to_string()),
        }
    }

    /// Replace date/time and quantity values by their display strings
    pub fn resolve_internal_type(self) -> FhirPathValue {
        match self {
            Self::Date(_) | Self::DateTime(_) | Self::Time(_) | Self::Quantity(_) => {
                Self::String(self.to_string())
            }
            other => other,
        }
    }
}

fn string_primitive(s: &str, declared: Option<&str>) -> FhirPathValue {
    let parsed = match declared {
        Some("date") => PrecisionDate::parse(s).map(FhirPathValue::Date),
        Some("dateTime") | Some("instant") => PrecisionDateTime::parse(s).map(FhirPathValue::DateTime),
        Some("time") => PrecisionTime::parse(s).map(FhirPathValue::Time),
        Some("decimal") => Decimal::from_str(s).ok().map(FhirPathValue::Decimal),
        Some("integer64") => s.parse().ok().map(FhirPathValue::Integer),
        _ => None,
    };
    parsed.unwrap_or_else(|| FhirPathValue::String(s.to_string()))
}

/// Decimal from a JSON number, keeping the written digits where possible
pub fn decimal_from_json(n: &serde_json::Number) -> Option<Decimal> {
    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
        .or_else(|| n.as_f64().and_then(Decimal::from_f64))
}

fn quantity_from_json(map: &serde_json::Map<String, JsonValue>) -> Option<Quantity> {
    let value = match map.get("value")? {
        JsonValue::Number(n) => decimal_from_json(n)?,
        _ => return None,
    };
    let code = map.get("code").and_then(JsonValue::as_str);
    let unit = map.get("unit").and_then(JsonValue::as_str);
    let system = map.get("system").and_then(JsonValue::as_str);
    let unit = match (system, code) {
        (Some(UCUM_SYSTEM), Some(code)) => code,
        (None, Some(code)) => code,
        _ => unit.or(code).unwrap_or("1"),
    };
    Some(Quantity::new(value, unit))
}

impl fmt::Display for FhirPathValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::String(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{d}"),
            Self::DateTime(dt) => write!(f, "{dt}"),
            Self::Time(t) => write!(f, "{t}"),
            Self::Quantity(q) => write!(f, "{q}"),
            Self::Node(node) => match node.data() {
                JsonValue::String(s) => f.write_str(s),
                other => write!(f, "{other}"),
            },
            Self::TypeInfo(info) => write!(f, "{info}"),
            Self::Terminologies => f.write_str("%terminologies"),
        }
    }
}

impl From<bool> for FhirPathValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for FhirPathValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<Decimal> for FhirPathValue {
    fn from(value: Decimal) -> Self {
        Self::Decimal(value)
    }
}

impl From<String> for FhirPathValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for FhirPathValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<Quantity> for FhirPathValue {
    fn from(value: Quantity) -> Self {
        Self::Quantity(value)
    }
}

impl From<Arc<ValueNode>> for FhirPathValue {
    fn from(value: Arc<ValueNode>) -> Self {
        Self::Node(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(data: JsonValue, declared: Option<&str>) -> FhirPathValue {
        FhirPathValue::Node(ValueNode::make(
            data,
            None,
            None,
            None,
            None,
            declared.map(str::to_string),
            None,
        ))
    }

    #[test]
    fn test_declared_date_becomes_date() {
        let value = node(json!("1974-12-25"), Some("date")).to_primitive();
        assert!(matches!(value, FhirPathValue::Date(_)));

        let plain = node(json!("1974-12-25"), None).to_primitive();
        assert!(matches!(plain, FhirPathValue::String(_)));
    }

    #[test]
    fn test_quantity_shape_becomes_quantity() {
        let value = node(
            json!({"value": 185, "unit": "lbs", "system": UCUM_SYSTEM, "code": "[lb_av]"}),
            Some("Quantity"),
        )
        .to_primitive();
        match value {
            FhirPathValue::Quantity(q) => assert_eq!(q.unit, "[lb_av]"),
            other => panic!("expected quantity, got {other:?}"),
        }
    }

    #[test]
    fn test_decimal_declared_integer_json() {
        let value = node(json!(3), Some("decimal")).to_primitive();
        assert!(matches!(value, FhirPathValue::Decimal(_)));
    }

    #[test]
    fn test_resolve_internal_type() {
        let date = FhirPathValue::Date(PrecisionDate::parse("2019-01").unwrap());
        assert!(matches!(date.resolve_internal_type(), FhirPathValue::String(s) if s == "2019-01"));
    }
}
