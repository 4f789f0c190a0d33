//! Comparison operators (`<`, `<=`, `>`, `>=`)

use std::cmp::Ordering;

use rust_decimal::Decimal;

use crate::ast::BinaryOperator;
use crate::core::error_code::FP0051;
use crate::core::{
    Collection, FhirPathError, FhirPathValue, PrecisionDate, PrecisionDateTime, PrecisionTime,
    Quantity, Result,
};

fn number(value: &FhirPathValue) -> Option<Decimal> {
    match value {
        FhirPathValue::Integer(i) => Some(Decimal::from(*i)),
        FhirPathValue::Decimal(d) => Some(*d),
        _ => None,
    }
}

fn mismatch(left: &FhirPathValue, right: &FhirPathValue) -> FhirPathError {
    FhirPathError::type_error(
        FP0051,
        format!(
            "Cannot compare values of type {} and {}",
            left.type_name(),
            right.type_name()
        ),
    )
}

/// Order two items; `None` when the order is undetermined
pub fn compare_values(left: &FhirPathValue, right: &FhirPathValue) -> Result<Option<Ordering>> {
    let (left, right) = (left.to_primitive(), right.to_primitive());
    if let (Some(a), Some(b)) = (number(&left), number(&right)) {
        return Ok(Some(a.cmp(&b)));
    }
    match (&left, &right) {
        (FhirPathValue::String(a), FhirPathValue::String(b)) => Ok(Some(a.cmp(b))),
        (FhirPathValue::Date(a), FhirPathValue::Date(b)) => Ok(a.compare(b)),
        (FhirPathValue::DateTime(a), FhirPathValue::DateTime(b)) => Ok(a.compare(b)),
        (FhirPathValue::Date(a), FhirPathValue::DateTime(b)) => Ok(a.to_datetime().compare(b)),
        (FhirPathValue::DateTime(a), FhirPathValue::Date(b)) => Ok(a.compare(&b.to_datetime())),
        (FhirPathValue::Time(a), FhirPathValue::Time(b)) => Ok(a.compare(b)),
        (FhirPathValue::Quantity(a), FhirPathValue::Quantity(b)) => a.compare(b).map(Some),
        (FhirPathValue::Quantity(a), other) | (other, FhirPathValue::Quantity(a)) => {
            let Some(n) = number(other) else {
                return Err(mismatch(&left, &right));
            };
            let promoted = Quantity::dimensionless(n);
            let ordering = if matches!(left, FhirPathValue::Quantity(_)) {
                a.compare(&promoted)?
            } else {
                promoted.compare(a)?
            };
            Ok(Some(ordering))
        }
        (FhirPathValue::String(text), other) | (other, FhirPathValue::String(text)) => {
            let parsed = parse_like(text, other).ok_or_else(|| mismatch(&left, &right))?;
            if matches!(left, FhirPathValue::String(_)) {
                compare_values(&parsed, other)
            } else {
                compare_values(other, &parsed)
            }
        }
        _ => Err(mismatch(&left, &right)),
    }
}

fn parse_like(text: &str, like: &FhirPathValue) -> Option<FhirPathValue> {
    match like {
        FhirPathValue::Date(_) => PrecisionDate::parse(text).map(FhirPathValue::Date),
        FhirPathValue::DateTime(_) => PrecisionDateTime::parse(text).map(FhirPathValue::DateTime),
        FhirPathValue::Time(_) => PrecisionTime::parse(text).map(FhirPathValue::Time),
        _ => None,
    }
}

/// Apply a comparison operator to two singleton operands
pub fn compare(op: BinaryOperator, left: &Collection, right: &Collection) -> Result<Collection> {
    let what = format!("Operator '{}'", op.symbol());
    let (Some(a), Some(b)) = (left.singleton(&what)?, right.singleton(&what)?) else {
        return Ok(Collection::empty());
    };
    let Some(ordering) = compare_values(a, b)? else {
        return Ok(Collection::empty());
    };
    let result = match op {
        BinaryOperator::LessThan => ordering == Ordering::Less,
        BinaryOperator::LessThanOrEqual => ordering != Ordering::Greater,
        BinaryOperator::GreaterThan => ordering == Ordering::Greater,
        BinaryOperator::GreaterThanOrEqual => ordering != Ordering::Less,
        other => {
            return Err(FhirPathError::type_error(
                FP0051,
                format!("'{}' is not a comparison operator", other.symbol()),
            ));
        }
    };
    Ok(Collection::single(FhirPathValue::Boolean(result)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_code::FP0056;

    fn quantity(value: i64, unit: &str) -> Collection {
        Collection::single(FhirPathValue::Quantity(Quantity::new(Decimal::from(value), unit)))
    }

    fn boolean(collection: Collection) -> Option<bool> {
        match collection.first() {
            Some(FhirPathValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    #[test]
    fn test_quantities_compare_after_conversion() {
        let result = compare(BinaryOperator::GreaterThan, &quantity(3, "min"), &quantity(100, "s")).unwrap();
        assert_eq!(boolean(result), Some(true));

        let err = compare(BinaryOperator::LessThan, &quantity(3, "min"), &quantity(1, "kg")).unwrap_err();
        assert_eq!(err.error_code(), FP0056);
    }

    #[test]
    fn test_number_promotes_against_unit_one() {
        let result = compare(
            BinaryOperator::LessThan,
            &Collection::single(FhirPathValue::Integer(1)),
            &quantity(2, "1"),
        )
        .unwrap();
        assert_eq!(boolean(result), Some(true));
    }

    #[test]
    fn test_mismatched_types_fail() {
        let err = compare(
            BinaryOperator::LessThan,
            &Collection::single(FhirPathValue::Integer(1)),
            &Collection::single("a".into()),
        )
        .unwrap_err();
        assert_eq!(err.error_code(), FP0051);
    }

    #[test]
    fn test_undetermined_and_empty_propagate() {
        let year = Collection::single(FhirPathValue::Date(PrecisionDate::parse("2019").unwrap()));
        let day = Collection::single(FhirPathValue::Date(PrecisionDate::parse("2019-05-01").unwrap()));
        assert!(compare(BinaryOperator::LessThan, &year, &day).unwrap().is_empty());
        assert!(compare(BinaryOperator::LessThan, &year, &Collection::empty()).unwrap().is_empty());

        let later = Collection::single(FhirPathValue::Date(PrecisionDate::parse("2020").unwrap()));
        assert_eq!(boolean(compare(BinaryOperator::LessThan, &day, &later).unwrap()), Some(true));
    }
}
