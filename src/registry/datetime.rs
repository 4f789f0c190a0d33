//! Date/time functions: now, today, timeOfDay, component extraction and comparable

use rust_decimal::Decimal;

use super::builder::{FunctionBuilder, sync_fn};
use super::{FunctionCategory, FunctionContext, FunctionRegistry, ParameterKind};
use crate::core::error_code::FP0051;
use crate::core::{Collection, FhirPathError, FhirPathValue, Quantity, Result, TemporalPrecision};
use crate::register_function;

const COMPONENTS: [(&str, TemporalPrecision); 7] = [
    ("yearOf", TemporalPrecision::Year),
    ("monthOf", TemporalPrecision::Month),
    ("dayOf", TemporalPrecision::Day),
    ("hourOf", TemporalPrecision::Hour),
    ("minuteOf", TemporalPrecision::Minute),
    ("secondOf", TemporalPrecision::Second),
    ("millisecondOf", TemporalPrecision::Millisecond),
];

/// Component of a date, date-time or time; empty when finer than the value's precision
fn component(ctx: &FunctionContext<'_>, precision: TemporalPrecision) -> Result<Collection> {
    let value = match ctx.input_singleton()? {
        None => return Ok(Collection::empty()),
        Some(FhirPathValue::Date(d)) => d.component(precision),
        Some(FhirPathValue::DateTime(dt)) => dt.component(precision),
        Some(FhirPathValue::Time(t)) if precision >= TemporalPrecision::Hour => t.component(precision),
        Some(other) => {
            return Err(FhirPathError::type_error(
                FP0051,
                format!("{}() expects a Date, DateTime or Time, got {}", ctx.name, other.type_name()),
            ));
        }
    };
    Ok(Collection::from(value.map(FhirPathValue::Integer)))
}

fn as_quantity(value: &FhirPathValue) -> Option<Quantity> {
    match value.to_primitive() {
        FhirPathValue::Quantity(q) => Some(q),
        FhirPathValue::Integer(i) => Some(Quantity::dimensionless(Decimal::from(i))),
        FhirPathValue::Decimal(d) => Some(Quantity::dimensionless(d)),
        _ => None,
    }
}

impl FunctionRegistry {
    pub fn register_datetime_functions(&self) -> Result<()> {
        register_function!(
            self,
            sync "now",
            category: FunctionCategory::DateTime,
            description: "Current date and time; constant within one evaluation",
            parameters: [],
            return_type: "DateTime",
            examples: ["now()"],
            implementation: |ctx: &FunctionContext<'_>| {
                Ok(Collection::single(FhirPathValue::DateTime(ctx.context.state().now())))
            }
        )?;

        register_function!(
            self,
            sync "today",
            category: FunctionCategory::DateTime,
            description: "Current date; constant within one evaluation",
            parameters: [],
            return_type: "Date",
            examples: ["today()"],
            implementation: |ctx: &FunctionContext<'_>| {
                Ok(Collection::single(FhirPathValue::Date(ctx.context.state().today())))
            }
        )?;

        register_function!(
            self,
            sync "timeOfDay",
            category: FunctionCategory::DateTime,
            description: "Current time of day; constant within one evaluation",
            parameters: [],
            return_type: "Time",
            examples: ["timeOfDay()"],
            implementation: |ctx: &FunctionContext<'_>| {
                Ok(Collection::single(FhirPathValue::Time(ctx.context.state().time_of_day())))
            }
        )?;

        for (name, precision) in COMPONENTS {
            FunctionBuilder::new(name, FunctionCategory::DateTime)
                .description(format!("The {precision} component of the input"))
                .return_type("Integer")
                .example(format!("@2020-03-04T10:20:30.400.{name}()"))
                .register_sync(self, sync_fn(move |ctx: &FunctionContext<'_>| component(ctx, precision)))?;
        }

        register_function!(
            self,
            sync "comparable",
            category: FunctionCategory::DateTime,
            description: "Returns true if both quantities have units in the same convertible system",
            parameters: ["other": ParameterKind::Any => "Quantity to compare with"],
            return_type: "Boolean",
            examples: ["1 'cm'.comparable(1 '[in_i]')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let Some(input) = ctx.input_singleton()? else {
                    return Ok(Collection::empty());
                };
                let other = ctx.arg_collection(0);
                let Some(other) = other.singleton("comparable()")? else {
                    return Ok(Collection::empty());
                };
                let comparable = match (as_quantity(&input), as_quantity(other)) {
                    (Some(a), Some(b)) => a.comparable(&b),
                    _ => false,
                };
                Ok(Collection::single(FhirPathValue::Boolean(comparable)))
            }
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOperator;
    use crate::ast::builder::{ExpressionBuilderExt, binary, func, quantity, temporal};
    use crate::registry::testing::{booleans, evaluate, integers};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("now")]
    #[case("today")]
    #[case("timeOfDay")]
    #[tokio::test]
    async fn test_clock_is_fixed_within_one_evaluation(#[case] function: &str) {
        let expr = binary(BinaryOperator::Equal, func(function, vec![]), func(function, vec![]));
        assert_eq!(booleans(&evaluate(&expr, json!({})).await.unwrap()), vec![true]);
    }

    #[rstest]
    #[case("@2020-03-04T10:20:30.400", "yearOf", Some(2020))]
    #[case("@2020-03-04T10:20:30.400", "monthOf", Some(3))]
    #[case("@2020-03-04T10:20:30.400", "minuteOf", Some(20))]
    #[case("@2020-03-04T10:20:30.400", "millisecondOf", Some(400))]
    #[case("@2020-03", "dayOf", None)]
    #[case("@T14:30", "hourOf", Some(14))]
    #[case("@T14:30", "secondOf", None)]
    #[tokio::test]
    async fn test_components(#[case] literal: &str, #[case] function: &str, #[case] expected: Option<i64>) {
        let result = evaluate(&temporal(literal).call(function, vec![]), json!({})).await.unwrap();
        assert_eq!(integers(&result), expected.into_iter().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_time_has_no_date_components() {
        let err = evaluate(&temporal("@T14:30").call("yearOf", vec![]), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), FP0051);
    }

    #[tokio::test]
    async fn test_comparable_units() {
        let length = quantity("1", "cm").call("comparable", vec![quantity("1", "[in_i]")]);
        let mixed = quantity("1", "cm").call("comparable", vec![quantity("1", "mg")]);
        assert_eq!(booleans(&evaluate(&length, json!({})).await.unwrap()), vec![true]);
        assert_eq!(booleans(&evaluate(&mixed, json!({})).await.unwrap()), vec![false]);
    }
}
