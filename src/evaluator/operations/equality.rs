//! Equality (`=`, `!=`) and equivalence (`~`, `!~`)
//!
//! Equality compares numbers after rounding to 8 decimal places and may come
//! back undetermined (`None`) for date/time values of different precision.
//! Equivalence never is undetermined: strings compare case-insensitively with
//! whitespace collapsed, numbers at the precision of the less precise operand,
//! and collections ignore order.

use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use crate::core::value::decimal_from_json;
use crate::core::{
    Collection, FhirPathValue, PrecisionDate, PrecisionDateTime, PrecisionTime,
};

/// Decimal places numbers are rounded to before an equality test
const EQUALITY_PRECISION: u32 = 8;

fn number(value: &FhirPathValue) -> Option<Decimal> {
    match value {
        FhirPathValue::Integer(i) => Some(Decimal::from(*i)),
        FhirPathValue::Decimal(d) => Some(*d),
        _ => None,
    }
}

/// Parse a string operand into the temporal kind of the other operand
fn temporal_like(text: &str, like: &FhirPathValue) -> Option<FhirPathValue> {
    match like {
        FhirPathValue::Date(_) => PrecisionDate::parse(text)
            .map(FhirPathValue::Date)
            .or_else(|| PrecisionDateTime::parse(text).map(FhirPathValue::DateTime)),
        FhirPathValue::DateTime(_) => PrecisionDateTime::parse(text).map(FhirPathValue::DateTime),
        FhirPathValue::Time(_) => PrecisionTime::parse(text.trim_start_matches('T')).map(FhirPathValue::Time),
        _ => None,
    }
}

fn is_temporal(value: &FhirPathValue) -> bool {
    matches!(
        value,
        FhirPathValue::Date(_) | FhirPathValue::DateTime(_) | FhirPathValue::Time(_)
    )
}

fn temporal_equals(left: &FhirPathValue, right: &FhirPathValue) -> Option<bool> {
    match (left, right) {
        (FhirPathValue::Date(a), FhirPathValue::Date(b)) => a.equals(b),
        (FhirPathValue::DateTime(a), FhirPathValue::DateTime(b)) => a.equals(b),
        (FhirPathValue::Date(a), FhirPathValue::DateTime(b)) => a.to_datetime().equals(b),
        (FhirPathValue::DateTime(a), FhirPathValue::Date(b)) => a.equals(&b.to_datetime()),
        (FhirPathValue::Time(a), FhirPathValue::Time(b)) => a.equals(b),
        _ => Some(false),
    }
}

fn temporal_equivalent(left: &FhirPathValue, right: &FhirPathValue) -> bool {
    match (left, right) {
        (FhirPathValue::Date(a), FhirPathValue::Date(b)) => a.equivalent(b),
        (FhirPathValue::DateTime(a), FhirPathValue::DateTime(b)) => a.equivalent(b),
        (FhirPathValue::Date(a), FhirPathValue::DateTime(b)) => a.to_datetime().equivalent(b),
        (FhirPathValue::DateTime(a), FhirPathValue::Date(b)) => a.equivalent(&b.to_datetime()),
        (FhirPathValue::Time(a), FhirPathValue::Time(b)) => a.equivalent(b),
        _ => false,
    }
}

/// Strict equality of two items
pub fn equals(left: &FhirPathValue, right: &FhirPathValue) -> Option<bool> {
    let (left, right) = (left.to_primitive(), right.to_primitive());
    if let (Some(a), Some(b)) = (number(&left), number(&right)) {
        return Some(a.round_dp(EQUALITY_PRECISION) == b.round_dp(EQUALITY_PRECISION));
    }
    match (&left, &right) {
        (FhirPathValue::Boolean(a), FhirPathValue::Boolean(b)) => Some(a == b),
        (FhirPathValue::String(a), FhirPathValue::String(b)) => Some(a == b),
        (FhirPathValue::String(text), other) if is_temporal(other) => {
            temporal_like(text, other).map_or(Some(false), |parsed| temporal_equals(&parsed, other))
        }
        (other, FhirPathValue::String(text)) if is_temporal(other) => {
            temporal_like(text, other).map_or(Some(false), |parsed| temporal_equals(other, &parsed))
        }
        (a, b) if is_temporal(a) && is_temporal(b) => temporal_equals(a, b),
        (FhirPathValue::Quantity(a), FhirPathValue::Quantity(b)) => Some(a.equals(b).unwrap_or(false)),
        (FhirPathValue::TypeInfo(a), FhirPathValue::TypeInfo(b)) => Some(a == b),
        (FhirPathValue::Terminologies, FhirPathValue::Terminologies) => Some(true),
        (FhirPathValue::Node(a), FhirPathValue::Node(b)) => Some(json_equal(a.data(), b.data(), false)),
        _ => Some(false),
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn numbers_equivalent(a: Decimal, b: Decimal) -> bool {
    let scale = a.scale().min(b.scale());
    a.round_dp(scale) == b.round_dp(scale)
}

/// Equivalence of two items
pub fn equivalent(left: &FhirPathValue, right: &FhirPathValue) -> bool {
    let (left, right) = (left.to_primitive(), right.to_primitive());
    if let (Some(a), Some(b)) = (number(&left), number(&right)) {
        return numbers_equivalent(a, b);
    }
    match (&left, &right) {
        (FhirPathValue::String(a), FhirPathValue::String(b)) => normalize_text(a) == normalize_text(b),
        (FhirPathValue::String(text), other) if is_temporal(other) => {
            temporal_like(text, other).is_some_and(|parsed| temporal_equivalent(&parsed, other))
        }
        (other, FhirPathValue::String(text)) if is_temporal(other) => {
            temporal_like(text, other).is_some_and(|parsed| temporal_equivalent(other, &parsed))
        }
        (a, b) if is_temporal(a) && is_temporal(b) => temporal_equivalent(a, b),
        (FhirPathValue::Quantity(a), FhirPathValue::Quantity(b)) => a.equivalent(b),
        (FhirPathValue::Node(a), FhirPathValue::Node(b)) => json_equal(a.data(), b.data(), true),
        _ => equals(&left, &right) == Some(true),
    }
}

/// Deep comparison of document structures; object keys never depend on order
fn json_equal(left: &JsonValue, right: &JsonValue, fuzzy: bool) -> bool {
    match (left, right) {
        (JsonValue::Number(a), JsonValue::Number(b)) => {
            match (decimal_from_json(a), decimal_from_json(b)) {
                (Some(a), Some(b)) if fuzzy => numbers_equivalent(a, b),
                (Some(a), Some(b)) => a.round_dp(EQUALITY_PRECISION) == b.round_dp(EQUALITY_PRECISION),
                _ => a == b,
            }
        }
        (JsonValue::String(a), JsonValue::String(b)) if fuzzy => normalize_text(a) == normalize_text(b),
        (JsonValue::Object(a), JsonValue::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, value)| {
                    b.get(key).is_some_and(|other| json_equal(value, other, fuzzy))
                })
        }
        (JsonValue::Array(a), JsonValue::Array(b)) if fuzzy => {
            a.len() == b.len() && unordered_match(a, b, |x, y| json_equal(x, y, true))
        }
        (JsonValue::Array(a), JsonValue::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| json_equal(x, y, false))
        }
        (a, b) => a == b,
    }
}

/// Every item on the left pairs with a distinct item on the right
fn unordered_match<T>(left: &[T], right: &[T], same: impl Fn(&T, &T) -> bool) -> bool {
    let mut used = vec![false; right.len()];
    left.iter().all(|item| {
        let found = right
            .iter()
            .enumerate()
            .find(|(i, other)| !used[*i] && same(item, other))
            .map(|(i, _)| i);
        match found {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

/// `=` over collections: empty when either side is empty
pub fn collections_equal(left: &Collection, right: &Collection) -> Option<bool> {
    if left.is_empty() || right.is_empty() {
        return None;
    }
    if left.len() != right.len() {
        return Some(false);
    }
    let mut undetermined = false;
    for (a, b) in left.iter().zip(right.iter()) {
        match equals(a, b) {
            Some(false) => return Some(false),
            None => undetermined = true,
            Some(true) => {}
        }
    }
    if undetermined { None } else { Some(true) }
}

/// `~` over collections: order-independent, two empties are equivalent
pub fn collections_equivalent(left: &Collection, right: &Collection) -> bool {
    left.len() == right.len() && unordered_match(left.as_slice(), right.as_slice(), equivalent)
}

/// Membership by strict equality
pub fn contains_value(collection: &Collection, value: &FhirPathValue) -> bool {
    collection.iter().any(|item| equals(item, value) == Some(true))
}

/// Items in first-occurrence order with equal duplicates removed
pub fn distinct(collection: Collection) -> Collection {
    let mut unique = Collection::empty();
    for item in collection {
        if !contains_value(&unique, &item) {
            unique.push(item);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Quantity, ValueNode};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use std::str::FromStr;

    fn dec(s: &str) -> FhirPathValue {
        FhirPathValue::Decimal(Decimal::from_str(s).unwrap())
    }

    fn node(data: JsonValue) -> FhirPathValue {
        FhirPathValue::Node(ValueNode::root(data, None))
    }

    #[test]
    fn test_numbers_equal_after_rounding() {
        assert_eq!(equals(&FhirPathValue::Integer(1), &dec("1.0")), Some(true));
        assert_eq!(equals(&dec("0.1"), &dec("0.100000001")), Some(true));
        assert_eq!(equals(&dec("0.1"), &dec("0.2")), Some(false));
    }

    #[test]
    fn test_temporal_precision_mismatch_is_undetermined() {
        let year = FhirPathValue::Date(PrecisionDate::parse("2019").unwrap());
        let day = FhirPathValue::Date(PrecisionDate::parse("2019-01-01").unwrap());
        assert_eq!(equals(&year, &day), None);
        assert_eq!(equals(&day, &FhirPathValue::string("2019-01-01")), Some(true));
        assert!(!equivalent(&year, &day));
    }

    #[rstest]
    #[case("ab  C", "AB C", true)]
    #[case(" a\tb ", "A B", true)]
    #[case("abc", "abd", false)]
    fn test_string_equivalence(#[case] left: &str, #[case] right: &str, #[case] expected: bool) {
        assert_eq!(equivalent(&left.into(), &right.into()), expected);
    }

    #[test]
    fn test_decimal_equivalence_uses_least_precision() {
        assert!(equivalent(&dec("1.0"), &dec("1.04")));
        assert!(!equivalent(&dec("1.0"), &dec("1.06")));
    }

    #[test]
    fn test_quantities_convert() {
        let minutes = FhirPathValue::Quantity(Quantity::new(Decimal::from(3), "min"));
        let seconds = FhirPathValue::Quantity(Quantity::new(Decimal::from(180), "s"));
        assert_eq!(equals(&minutes, &seconds), Some(true));
    }

    #[test]
    fn test_structures_ignore_key_order() {
        let a = node(json!({"system": "s", "code": "c"}));
        let b = node(json!({"code": "c", "system": "s"}));
        assert_eq!(equals(&a, &b), Some(true));

        let ordered = node(json!({"given": ["a", "b"]}));
        let reversed = node(json!({"given": ["B", "a"]}));
        assert_eq!(equals(&ordered, &reversed), Some(false));
        assert!(equivalent(&ordered, &reversed));
    }

    #[test]
    fn test_collection_equality_rules() {
        let one = Collection::single(1i64.into());
        assert_eq!(collections_equal(&one, &Collection::empty()), None);
        assert_eq!(
            collections_equal(&one, &Collection::from_values(vec![1i64.into(), 1i64.into()])),
            Some(false)
        );
        assert!(collections_equivalent(&Collection::empty(), &Collection::empty()));
        assert!(collections_equivalent(
            &Collection::from_values(vec![1i64.into(), 2i64.into()]),
            &Collection::from_values(vec![2i64.into(), 1i64.into()]),
        ));
    }

    #[test]
    fn test_distinct_is_idempotent() {
        let values = Collection::from_values(vec![1i64.into(), dec("1.0"), "a".into(), "a".into()]);
        let once = distinct(values);
        assert_eq!(once.len(), 2);
        assert_eq!(distinct(once.clone()).len(), once.len());
    }
}
