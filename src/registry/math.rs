//! Math functions

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};

use super::{FunctionCategory, FunctionContext, FunctionRegistry, ParameterKind};
use crate::core::error_code::{FP0051, FP0053};
use crate::core::{Collection, FhirPathError, FhirPathValue, Quantity, Result};
use crate::register_function;

/// Numeric input of a math function
enum Number {
    Integer(i64),
    Decimal(Decimal),
    Quantity(Quantity),
}

impl Number {
    fn decimal(&self) -> Decimal {
        match self {
            Number::Integer(i) => Decimal::from(*i),
            Number::Decimal(d) => *d,
            Number::Quantity(q) => q.value,
        }
    }
}

fn number_input(ctx: &FunctionContext<'_>) -> Result<Option<Number>> {
    match ctx.input_singleton()? {
        None => Ok(None),
        Some(FhirPathValue::Integer(i)) => Ok(Some(Number::Integer(i))),
        Some(FhirPathValue::Decimal(d)) => Ok(Some(Number::Decimal(d))),
        Some(FhirPathValue::Quantity(q)) if ctx.name == "abs" => Ok(Some(Number::Quantity(q))),
        Some(other) => Err(FhirPathError::type_error(
            FP0051,
            format!("{}() expects a number, got {}", ctx.name, other.type_name()),
        )),
    }
}

fn decimal(value: Option<Decimal>) -> Collection {
    Collection::from(value.map(|d| FhirPathValue::Decimal(d.normalize())))
}

fn integer(value: Option<i64>) -> Collection {
    Collection::from(value.map(FhirPathValue::Integer))
}

/// Apply `op` to the decimal value of a numeric input
fn decimal_op(ctx: &FunctionContext<'_>, op: impl Fn(Decimal) -> Option<Decimal>) -> Result<Collection> {
    Ok(match number_input(ctx)? {
        Some(number) => decimal(op(number.decimal())),
        None => Collection::empty(),
    })
}

fn integer_op(ctx: &FunctionContext<'_>, op: impl Fn(Decimal) -> Decimal) -> Result<Collection> {
    Ok(match number_input(ctx)? {
        Some(Number::Integer(i)) => integer(Some(i)),
        Some(number) => integer(op(number.decimal()).to_i64()),
        None => Collection::empty(),
    })
}

fn ln(value: Decimal) -> Option<Decimal> {
    (value > Decimal::ZERO).then(|| value.ln())
}

fn power(base: &Number, exponent: Decimal) -> Option<FhirPathValue> {
    if let (Number::Integer(b), Some(e)) = (base, exponent.to_i64()) {
        if exponent.fract().is_zero() && e >= 0 {
            let e = u32::try_from(e).ok()?;
            return b.checked_pow(e).map(FhirPathValue::Integer);
        }
    }
    let base = base.decimal();
    if base.is_sign_negative() && !exponent.fract().is_zero() {
        return None;
    }
    base.checked_powd(exponent).map(|d| FhirPathValue::Decimal(d.normalize()))
}

impl FunctionRegistry {
    pub fn register_math_functions(&self) -> Result<()> {
        register_function!(
            self,
            sync "abs",
            category: FunctionCategory::Math,
            description: "Absolute value of a number or quantity",
            parameters: [],
            return_type: "Number",
            examples: ["(-5).abs()", "(-5.5 'mg').abs()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(Collection::from(number_input(ctx)?.and_then(|number| match number {
                    Number::Integer(i) => i.checked_abs().map(FhirPathValue::Integer),
                    Number::Decimal(d) => Some(FhirPathValue::Decimal(d.abs())),
                    Number::Quantity(q) => Some(FhirPathValue::Quantity(Quantity::new(q.value.abs(), q.unit))),
                })))
            }
        )?;

        register_function!(
            self,
            sync "ceiling",
            category: FunctionCategory::Math,
            description: "Smallest integer greater than or equal to the input",
            parameters: [],
            return_type: "Integer",
            examples: ["1.1.ceiling()"],
            implementation: |ctx: &FunctionContext<'_>| integer_op(ctx, |d| d.ceil())
        )?;

        register_function!(
            self,
            sync "floor",
            category: FunctionCategory::Math,
            description: "Largest integer less than or equal to the input",
            parameters: [],
            return_type: "Integer",
            examples: ["1.9.floor()"],
            implementation: |ctx: &FunctionContext<'_>| integer_op(ctx, |d| d.floor())
        )?;

        register_function!(
            self,
            sync "truncate",
            category: FunctionCategory::Math,
            description: "Integer part of the input",
            parameters: [],
            return_type: "Integer",
            examples: ["(-1.9).truncate()"],
            implementation: |ctx: &FunctionContext<'_>| integer_op(ctx, |d| d.trunc())
        )?;

        register_function!(
            self,
            sync "exp",
            category: FunctionCategory::Math,
            description: "e raised to the power of the input",
            parameters: [],
            return_type: "Decimal",
            examples: ["0.exp()"],
            implementation: |ctx: &FunctionContext<'_>| decimal_op(ctx, |d| d.checked_exp())
        )?;

        register_function!(
            self,
            sync "ln",
            category: FunctionCategory::Math,
            description: "Natural logarithm of the input",
            parameters: [],
            return_type: "Decimal",
            examples: ["1.ln()"],
            implementation: |ctx: &FunctionContext<'_>| decimal_op(ctx, ln)
        )?;

        register_function!(
            self,
            sync "log",
            category: FunctionCategory::Math,
            description: "Logarithm of the input in the given base",
            parameters: ["base": ParameterKind::Number => "Logarithm base"],
            return_type: "Decimal",
            examples: ["100.log(10)"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let Some(base) = ctx.arg_number(0) else {
                    return Ok(Collection::empty());
                };
                decimal_op(ctx, |d| {
                    let denominator = ln(base).filter(|l| !l.is_zero())?;
                    ln(d)?.checked_div(denominator)
                })
            }
        )?;

        register_function!(
            self,
            sync "power",
            category: FunctionCategory::Math,
            description: "The input raised to exponent; Integer when both are integers",
            parameters: ["exponent": ParameterKind::Number => "Exponent"],
            return_type: "Number",
            examples: ["2.power(3)", "(-1).power(0.5)"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let (Some(base), Some(exponent)) = (number_input(ctx)?, ctx.arg_number(0)) else {
                    return Ok(Collection::empty());
                };
                Ok(Collection::from(power(&base, exponent)))
            }
        )?;

        register_function!(
            self,
            sync "round",
            category: FunctionCategory::Math,
            description: "The input rounded half away from zero to the given number of decimal places",
            parameters: [],
            optional: ["precision": ParameterKind::Integer => "Decimal places, default 0"],
            return_type: "Decimal",
            examples: ["3.14159.round(3)"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let precision = ctx.arg_integer(0).unwrap_or(0);
                let places = u32::try_from(precision).map_err(|_| {
                    FhirPathError::type_error(FP0053, format!("round() precision must be non-negative, got {precision}"))
                })?;
                decimal_op(ctx, |d| {
                    Some(d.round_dp_with_strategy(places, rust_decimal::RoundingStrategy::MidpointAwayFromZero))
                })
            }
        )?;

        register_function!(
            self,
            sync "sqrt",
            category: FunctionCategory::Math,
            description: "Square root of the input, empty for negative numbers",
            parameters: [],
            return_type: "Decimal",
            examples: ["81.sqrt()"],
            implementation: |ctx: &FunctionContext<'_>| decimal_op(ctx, |d| d.sqrt())
        )?;

        Ok(())
    }
}
