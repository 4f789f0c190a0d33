//! Aggregate functions: sum, min, max, avg

use std::cmp::Ordering;

use rust_decimal::Decimal;

use super::{FunctionCategory, FunctionContext, FunctionRegistry};
use crate::core::error_code::FP0051;
use crate::core::{Collection, FhirPathError, FhirPathValue, Result};
use crate::evaluator::operations::compare_values;
use crate::register_function;

fn primitives(ctx: &FunctionContext<'_>) -> Vec<FhirPathValue> {
    ctx.input.iter().map(FhirPathValue::to_primitive).collect()
}

fn not_numeric(ctx: &FunctionContext<'_>, value: &FhirPathValue) -> FhirPathError {
    FhirPathError::type_error(
        FP0051,
        format!("{}() expects numbers or quantities, got {}", ctx.name, value.type_name()),
    )
}

/// Sum of integers, decimals or quantities; an empty input sums to 0
fn sum(ctx: &FunctionContext<'_>) -> Result<FhirPathValue> {
    let mut total = FhirPathValue::Integer(0);
    for value in primitives(ctx) {
        total = match (total, value) {
            (FhirPathValue::Integer(a), FhirPathValue::Integer(b)) => a
                .checked_add(b)
                .map(FhirPathValue::Integer)
                .unwrap_or_else(|| FhirPathValue::Decimal(Decimal::from(a) + Decimal::from(b))),
            (FhirPathValue::Integer(a), FhirPathValue::Decimal(b)) => FhirPathValue::Decimal(Decimal::from(a) + b),
            (FhirPathValue::Decimal(a), FhirPathValue::Integer(b)) => FhirPathValue::Decimal(a + Decimal::from(b)),
            (FhirPathValue::Decimal(a), FhirPathValue::Decimal(b)) => FhirPathValue::Decimal(a + b),
            (FhirPathValue::Integer(0), FhirPathValue::Quantity(q)) => FhirPathValue::Quantity(q),
            (FhirPathValue::Quantity(a), FhirPathValue::Quantity(b)) => FhirPathValue::Quantity(a.add(&b)?),
            (_, other) => return Err(not_numeric(ctx, &other)),
        };
    }
    Ok(total)
}

/// Extreme value by FHIRPath ordering; `wanted` selects min or max
fn extreme(ctx: &FunctionContext<'_>, wanted: Ordering) -> Result<Collection> {
    let mut best: Option<FhirPathValue> = None;
    for value in primitives(ctx) {
        if matches!(value, FhirPathValue::Node(_) | FhirPathValue::Boolean(_)) {
            return Err(not_numeric(ctx, &value));
        }
        best = match best {
            None => Some(value),
            Some(current) => match compare_values(&value, &current)? {
                Some(ordering) if ordering == wanted => Some(value),
                Some(_) => Some(current),
                None => return Ok(Collection::empty()),
            },
        };
    }
    Ok(Collection::from(best))
}

impl FunctionRegistry {
    pub fn register_aggregate_functions(&self) -> Result<()> {
        register_function!(
            self,
            sync "sum",
            category: FunctionCategory::Aggregate,
            description: "Sum of the input numbers; 0 for an empty input",
            parameters: [],
            return_type: "Number",
            examples: ["(1 | 2 | 3).sum()"],
            implementation: |ctx: &FunctionContext<'_>| Ok(Collection::single(sum(ctx)?))
        )?;

        register_function!(
            self,
            sync "min",
            category: FunctionCategory::Aggregate,
            description: "Smallest item of the input",
            parameters: [],
            return_type: "Any",
            examples: ["(3 | 1 | 2).min()"],
            implementation: |ctx: &FunctionContext<'_>| extreme(ctx, Ordering::Less)
        )?;

        register_function!(
            self,
            sync "max",
            category: FunctionCategory::Aggregate,
            description: "Largest item of the input",
            parameters: [],
            return_type: "Any",
            examples: ["(3 | 1 | 2).max()"],
            implementation: |ctx: &FunctionContext<'_>| extreme(ctx, Ordering::Greater)
        )?;

        register_function!(
            self,
            sync "avg",
            category: FunctionCategory::Aggregate,
            description: "Arithmetic mean of the input numbers",
            parameters: [],
            return_type: "Number",
            examples: ["(1 | 2 | 3).avg()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                if ctx.input.is_empty() {
                    return Ok(Collection::empty());
                }
                let count = Decimal::from(ctx.input.len());
                let average = match sum(ctx)? {
                    FhirPathValue::Integer(i) => Decimal::from(i).checked_div(count).map(FhirPathValue::Decimal),
                    FhirPathValue::Decimal(d) => d.checked_div(count).map(FhirPathValue::Decimal),
                    FhirPathValue::Quantity(q) => q
                        .value
                        .checked_div(count)
                        .map(|value| FhirPathValue::quantity(value, q.unit)),
                    _ => None,
                };
                Ok(Collection::from(average.map(|v| match v {
                    FhirPathValue::Decimal(d) => FhirPathValue::Decimal(d.normalize()),
                    other => other,
                })))
            }
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExpressionNode;
    use crate::ast::builder::{ExpressionBuilderExt, boolean, decimal, ident, integer, quantity, string, union};
    use crate::registry::testing::{evaluate, integers, strings};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn one_to(n: i64) -> ExpressionNode {
        (2..=n).fold(integer(1), |acc, i| union(acc, integer(i)))
    }

    #[tokio::test]
    async fn test_sum_of_integers_and_of_nothing() {
        let total = evaluate(&one_to(3).call("sum", vec![]), json!({})).await.unwrap();
        assert_eq!(integers(&total), vec![6]);

        let nothing = evaluate(&ident("missing").call("sum", vec![]), json!({})).await.unwrap();
        assert_eq!(integers(&nothing), vec![0]);
    }

    #[tokio::test]
    async fn test_sum_mixing_integer_and_decimal() {
        let expr = union(integer(1), decimal("2.5")).call("sum", vec![]);
        let total = evaluate(&expr, json!({})).await.unwrap();
        assert!(
            matches!(total.first(), Some(FhirPathValue::Decimal(d)) if *d == Decimal::new(35, 1)),
            "{total:?}"
        );
    }

    #[tokio::test]
    async fn test_sum_of_quantities() {
        let expr = union(quantity("1", "mg"), quantity("2", "mg")).call("sum", vec![]);
        let total = evaluate(&expr, json!({})).await.unwrap();
        assert!(
            matches!(total.first(), Some(FhirPathValue::Quantity(q)) if q.value == Decimal::from(3)),
            "{total:?}"
        );
    }

    #[tokio::test]
    async fn test_sum_rejects_booleans() {
        let expr = union(boolean(true), boolean(false)).call("sum", vec![]);
        let err = evaluate(&expr, json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), FP0051);
    }

    #[tokio::test]
    async fn test_min_and_max() {
        let numbers = union(union(integer(3), integer(1)), integer(2));
        let min = evaluate(&numbers.clone().call("min", vec![]), json!({})).await.unwrap();
        let max = evaluate(&numbers.call("max", vec![]), json!({})).await.unwrap();
        assert_eq!(integers(&min), vec![1]);
        assert_eq!(integers(&max), vec![3]);

        let words = union(string("pear"), string("apple")).call("min", vec![]);
        assert_eq!(strings(&evaluate(&words, json!({})).await.unwrap()), vec!["apple"]);
    }

    #[tokio::test]
    async fn test_avg_is_a_decimal_and_empty_for_no_input() {
        let mean = evaluate(&one_to(4).call("avg", vec![]), json!({})).await.unwrap();
        assert!(
            matches!(mean.first(), Some(FhirPathValue::Decimal(d)) if *d == Decimal::new(25, 1)),
            "{mean:?}"
        );

        let nothing = evaluate(&ident("missing").call("avg", vec![]), json!({})).await.unwrap();
        assert!(nothing.is_empty());
    }
}
