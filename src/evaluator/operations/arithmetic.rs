//! Arithmetic operators (`+ - * / div mod &`) and unary `-`/`+`
//!
//! Integer overflow and division by zero yield an empty result. Date/time
//! values accept calendar-duration quantities; other quantities convert
//! units before adding.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::ast::{BinaryOperator, UnaryOperator};
use crate::core::error_code::FP0051;
use crate::core::{Collection, FhirPathError, FhirPathValue, Quantity, Result};

fn mismatch(op: BinaryOperator, left: &FhirPathValue, right: &FhirPathValue) -> FhirPathError {
    FhirPathError::type_error(
        FP0051,
        format!(
            "Operator '{}' cannot be applied to {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ),
    )
}

fn number(value: &FhirPathValue) -> Option<Decimal> {
    match value {
        FhirPathValue::Integer(i) => Some(Decimal::from(*i)),
        FhirPathValue::Decimal(d) => Some(*d),
        _ => None,
    }
}

fn decimal(value: Option<Decimal>) -> Option<FhirPathValue> {
    value.map(FhirPathValue::Decimal)
}

/// String concatenation treating empty operands as ""
fn concatenate(left: &Collection, right: &Collection) -> Result<Collection> {
    let text = |collection: &Collection| -> Result<String> {
        match collection.singleton("Operator '&'")? {
            None => Ok(String::new()),
            Some(value) => value.as_str().ok_or_else(|| {
                FhirPathError::type_error(
                    FP0051,
                    format!("Operator '&' expects strings, got {}", value.type_name()),
                )
            }),
        }
    };
    let mut result = text(left)?;
    result.push_str(&text(right)?);
    Ok(Collection::single(FhirPathValue::String(result)))
}

/// Apply an arithmetic operator to two singleton operands
pub fn arithmetic(op: BinaryOperator, left: &Collection, right: &Collection) -> Result<Collection> {
    if op == BinaryOperator::Concatenate {
        return concatenate(left, right);
    }
    let what = format!("Operator '{}'", op.symbol());
    let (Some(a), Some(b)) = (left.singleton(&what)?, right.singleton(&what)?) else {
        return Ok(Collection::empty());
    };
    let (a, b) = (a.to_primitive(), b.to_primitive());
    Ok(Collection::from(apply(op, &a, &b)?))
}

fn apply(op: BinaryOperator, a: &FhirPathValue, b: &FhirPathValue) -> Result<Option<FhirPathValue>> {
    use FhirPathValue as V;

    if let (V::Integer(x), V::Integer(y)) = (a, b) {
        let (x, y) = (*x, *y);
        return Ok(match op {
            BinaryOperator::Add => x.checked_add(y).map(V::Integer),
            BinaryOperator::Subtract => x.checked_sub(y).map(V::Integer),
            BinaryOperator::Multiply => x.checked_mul(y).map(V::Integer),
            BinaryOperator::Divide => decimal(Decimal::from(x).checked_div(Decimal::from(y))),
            BinaryOperator::IntegerDivide => x.checked_div(y).map(V::Integer),
            BinaryOperator::Modulo => x.checked_rem(y).map(V::Integer),
            _ => return Err(mismatch(op, a, b)),
        });
    }
    if let (Some(x), Some(y)) = (number(a), number(b)) {
        return Ok(match op {
            BinaryOperator::Add => decimal(x.checked_add(y)),
            BinaryOperator::Subtract => decimal(x.checked_sub(y)),
            BinaryOperator::Multiply => decimal(x.checked_mul(y)),
            BinaryOperator::Divide => decimal(x.checked_div(y)),
            BinaryOperator::IntegerDivide => x
                .checked_div(y)
                .and_then(|q| q.trunc().to_i64())
                .map(V::Integer),
            BinaryOperator::Modulo => decimal(x.checked_rem(y)),
            _ => return Err(mismatch(op, a, b)),
        });
    }

    match (op, a, b) {
        (BinaryOperator::Add, V::String(x), V::String(y)) => Ok(Some(V::String(format!("{x}{y}")))),
        (BinaryOperator::Add, V::Quantity(x), V::Quantity(y)) => x.add(y).map(|q| Some(V::Quantity(q))),
        (BinaryOperator::Subtract, V::Quantity(x), V::Quantity(y)) => {
            x.subtract(y).map(|q| Some(V::Quantity(q)))
        }
        (BinaryOperator::Multiply, V::Quantity(x), V::Quantity(y)) => Ok(x.multiply(y).map(V::Quantity)),
        (BinaryOperator::Divide, V::Quantity(x), V::Quantity(y)) => Ok(x.divide(y).map(V::Quantity)),
        (BinaryOperator::Multiply | BinaryOperator::Divide, V::Quantity(x), other) => match number(other) {
            Some(n) => apply(op, &V::Quantity(x.clone()), &V::Quantity(Quantity::dimensionless(n))),
            None => Err(mismatch(op, a, b)),
        },
        (BinaryOperator::Multiply, other, V::Quantity(y)) => match number(other) {
            Some(n) => Ok(Quantity::dimensionless(n).multiply(y).map(V::Quantity)),
            None => Err(mismatch(op, a, b)),
        },
        (BinaryOperator::Add | BinaryOperator::Subtract, temporal, V::Quantity(q)) => {
            shift_temporal(op, temporal, q).map(Some)
        }
        _ => Err(mismatch(op, a, b)),
    }
}

fn shift_temporal(op: BinaryOperator, value: &FhirPathValue, quantity: &Quantity) -> Result<FhirPathValue> {
    let unit = quantity.calendar_unit().ok_or_else(|| {
        FhirPathError::type_error(
            FP0051,
            format!("'{}' is not a time-valued unit", quantity.unit),
        )
    })?;
    let amount = if op == BinaryOperator::Subtract {
        -quantity.value
    } else {
        quantity.value
    };
    match value {
        FhirPathValue::Date(d) => d.add_duration(amount, unit).map(FhirPathValue::Date),
        FhirPathValue::DateTime(dt) => dt.add_duration(amount, unit).map(FhirPathValue::DateTime),
        FhirPathValue::Time(t) => t.add_duration(amount, unit).map(FhirPathValue::Time),
        other => Err(mismatch(op, other, &FhirPathValue::Quantity(quantity.clone()))),
    }
}

/// Unary `-` and `+`
pub fn unary(op: UnaryOperator, operand: &Collection) -> Result<Collection> {
    let what = format!("Unary '{}'", op.symbol());
    let Some(value) = operand.singleton(&what)? else {
        return Ok(Collection::empty());
    };
    let value = value.to_primitive();
    let result = match (op, &value) {
        (UnaryOperator::Positive, FhirPathValue::Integer(_) | FhirPathValue::Decimal(_) | FhirPathValue::Quantity(_)) => {
            Some(value.clone())
        }
        (UnaryOperator::Negate, FhirPathValue::Integer(i)) => i.checked_neg().map(FhirPathValue::Integer),
        (UnaryOperator::Negate, FhirPathValue::Decimal(d)) => Some(FhirPathValue::Decimal(-*d)),
        (UnaryOperator::Negate, FhirPathValue::Quantity(q)) => {
            Some(FhirPathValue::Quantity(Quantity::new(-q.value, q.unit.clone())))
        }
        _ => {
            return Err(FhirPathError::type_error(
                FP0051,
                format!("{what} cannot be applied to {}", value.type_name()),
            ));
        }
    };
    Ok(Collection::from(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PrecisionDate;
    use std::str::FromStr;

    fn int(i: i64) -> Collection {
        Collection::single(FhirPathValue::Integer(i))
    }

    fn dec(s: &str) -> Collection {
        Collection::single(FhirPathValue::Decimal(Decimal::from_str(s).unwrap()))
    }

    fn only(collection: Collection) -> FhirPathValue {
        assert_eq!(collection.len(), 1);
        collection.into_iter().next().unwrap()
    }

    #[test]
    fn test_integer_arithmetic_and_overflow() {
        assert!(matches!(only(arithmetic(BinaryOperator::Add, &int(2), &int(3)).unwrap()), FhirPathValue::Integer(5)));
        assert!(arithmetic(BinaryOperator::Add, &int(i64::MAX), &int(1)).unwrap().is_empty());
        assert!(matches!(only(arithmetic(BinaryOperator::IntegerDivide, &int(7), &int(2)).unwrap()), FhirPathValue::Integer(3)));
        assert!(matches!(only(arithmetic(BinaryOperator::Modulo, &int(7), &int(2)).unwrap()), FhirPathValue::Integer(1)));
    }

    #[test]
    fn test_division_yields_decimal_and_zero_is_empty() {
        match only(arithmetic(BinaryOperator::Divide, &int(6), &int(4)).unwrap()) {
            FhirPathValue::Decimal(d) => assert_eq!(d, Decimal::from_str("1.5").unwrap()),
            other => panic!("expected decimal, got {other:?}"),
        }
        assert!(arithmetic(BinaryOperator::Divide, &int(1), &int(0)).unwrap().is_empty());
        assert!(arithmetic(BinaryOperator::Modulo, &dec("1.5"), &dec("0")).unwrap().is_empty());
    }

    #[test]
    fn test_concatenate_treats_empty_as_empty_string() {
        let result = arithmetic(BinaryOperator::Concatenate, &Collection::single("a".into()), &Collection::empty()).unwrap();
        assert!(matches!(only(result), FhirPathValue::String(s) if s == "a"));
        assert!(arithmetic(BinaryOperator::Add, &Collection::single("a".into()), &Collection::empty()).unwrap().is_empty());
    }

    #[test]
    fn test_date_plus_calendar_duration() {
        let date = Collection::single(FhirPathValue::Date(PrecisionDate::parse("2019-01-31").unwrap()));
        let month = Collection::single(FhirPathValue::quantity(Decimal::ONE, "month"));
        match only(arithmetic(BinaryOperator::Add, &date, &month).unwrap()) {
            FhirPathValue::Date(d) => assert_eq!(d.to_string(), "2019-02-28"),
            other => panic!("expected date, got {other:?}"),
        }
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let err = arithmetic(BinaryOperator::Add, &int(1), &Collection::single("a".into())).unwrap_err();
        assert_eq!(err.error_code(), FP0051);
    }

    #[test]
    fn test_unary_minus() {
        assert!(matches!(only(unary(UnaryOperator::Negate, &int(5)).unwrap()), FhirPathValue::Integer(-5)));
        assert!(unary(UnaryOperator::Negate, &Collection::single("a".into())).is_err());
    }
}
