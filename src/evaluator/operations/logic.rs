//! Three-valued boolean operators
//!
//! `None` stands for the empty collection. `and` and `or` decide from one
//! operand when that operand alone fixes the outcome.

use crate::ast::BinaryOperator;
use crate::core::error_code::FP0051;
use crate::core::{Collection, FhirPathError, FhirPathValue, Result};

pub fn and(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

pub fn or(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

pub fn xor(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    Some(left? != right?)
}

pub fn implies(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(true)) => Some(true),
        (Some(true), Some(false)) => Some(false),
        _ => None,
    }
}

/// Outcome fixed by the left operand alone, if any
pub fn short_circuit(op: BinaryOperator, left: Option<bool>) -> Option<bool> {
    match (op, left) {
        (BinaryOperator::And, Some(false)) => Some(false),
        (BinaryOperator::Or, Some(true)) => Some(true),
        (BinaryOperator::Implies, Some(false)) => Some(true),
        _ => None,
    }
}

pub fn logical(op: BinaryOperator, left: Option<bool>, right: Option<bool>) -> Result<Collection> {
    let result = match op {
        BinaryOperator::And => and(left, right),
        BinaryOperator::Or => or(left, right),
        BinaryOperator::Xor => xor(left, right),
        BinaryOperator::Implies => implies(left, right),
        other => {
            return Err(FhirPathError::type_error(
                FP0051,
                format!("'{}' is not a logical operator", other.symbol()),
            ));
        }
    };
    Ok(Collection::from(result.map(FhirPathValue::Boolean)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Some(false), None, Some(false))]
    #[case(Some(true), None, None)]
    #[case(Some(true), Some(true), Some(true))]
    fn test_and(#[case] left: Option<bool>, #[case] right: Option<bool>, #[case] expected: Option<bool>) {
        assert_eq!(and(left, right), expected);
        assert_eq!(and(right, left), expected);
    }

    #[rstest]
    #[case(Some(true), None, Some(true))]
    #[case(Some(false), None, None)]
    #[case(Some(false), Some(false), Some(false))]
    fn test_or(#[case] left: Option<bool>, #[case] right: Option<bool>, #[case] expected: Option<bool>) {
        assert_eq!(or(left, right), expected);
        assert_eq!(or(right, left), expected);
    }

    #[test]
    fn test_implies_and_xor() {
        assert_eq!(implies(None, Some(true)), Some(true));
        assert_eq!(implies(Some(true), None), None);
        assert_eq!(implies(Some(false), None), Some(true));
        assert_eq!(xor(Some(true), Some(false)), Some(true));
        assert_eq!(xor(Some(true), None), None);
    }
}
