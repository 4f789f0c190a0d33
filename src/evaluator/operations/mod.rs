//! FHIRPath operator implementations
//!
//! Pure functions over already evaluated operands. The tree walker decides
//! evaluation order and short-circuiting; everything here only combines values.

pub mod arithmetic;
pub mod equality;
pub mod logic;
pub mod ordering;

use crate::ast::BinaryOperator;
use crate::core::{Collection, FhirPathValue, Result};

pub use arithmetic::{arithmetic, unary};
pub use equality::{collections_equal, collections_equivalent, contains_value, distinct, equals, equivalent};
pub use ordering::{compare, compare_values};

/// `=`, `!=`, `~` and `!~`
pub fn equality(op: BinaryOperator, left: &Collection, right: &Collection) -> Collection {
    let result = match op {
        BinaryOperator::Equal => collections_equal(left, right),
        BinaryOperator::NotEqual => collections_equal(left, right).map(|eq| !eq),
        BinaryOperator::Equivalent => Some(collections_equivalent(left, right)),
        _ => Some(!collections_equivalent(left, right)),
    };
    Collection::from(result.map(FhirPathValue::Boolean))
}

/// `in` and `contains`
pub fn membership(op: BinaryOperator, left: &Collection, right: &Collection) -> Result<Collection> {
    let (item, collection) = if op == BinaryOperator::In {
        (left.singleton("Operator 'in'")?, right)
    } else {
        (right.singleton("Operator 'contains'")?, left)
    };
    Ok(match item {
        None => Collection::empty(),
        Some(item) => Collection::single(FhirPathValue::Boolean(contains_value(collection, item))),
    })
}

/// `|`: both sides with duplicates removed
pub fn union(left: Collection, right: Collection) -> Collection {
    let mut all = left;
    all.extend(right);
    distinct(all)
}
