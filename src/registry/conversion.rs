//! Conversion functions (`toX()` and `convertsToX()`)

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;

use super::builder::{FunctionBuilder, sync_fn};
use super::{FunctionCategory, FunctionContext, FunctionRegistry, ParameterKind};
use crate::core::{
    CalendarUnit, Collection, FhirPathValue, PrecisionDate, PrecisionDateTime, PrecisionTime, Quantity,
    Result,
};
use crate::register_function;

static INTEGER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d+$").expect("valid integer pattern"));

static DECIMAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?\d+(\.\d+)?$").expect("valid decimal pattern"));

static QUANTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([+-]?\d+(?:\.\d+)?)\s*(?:'([^']+)'|([a-zA-Z]+))?$").expect("valid quantity pattern")
});

#[derive(Debug, Clone, Copy)]
enum Target {
    Boolean,
    Integer,
    Decimal,
    String,
    Date,
    DateTime,
    Time,
}

impl Target {
    const ALL: [(Target, &'static str); 7] = [
        (Target::Boolean, "Boolean"),
        (Target::Integer, "Integer"),
        (Target::Decimal, "Decimal"),
        (Target::String, "String"),
        (Target::Date, "Date"),
        (Target::DateTime, "DateTime"),
        (Target::Time, "Time"),
    ];

    fn convert(self, value: &FhirPathValue) -> Option<FhirPathValue> {
        match self {
            Target::Boolean => to_boolean(value).map(FhirPathValue::Boolean),
            Target::Integer => to_integer(value).map(FhirPathValue::Integer),
            Target::Decimal => to_decimal(value).map(FhirPathValue::Decimal),
            Target::String => to_string(value).map(FhirPathValue::String),
            Target::Date => to_date(value).map(FhirPathValue::Date),
            Target::DateTime => to_datetime(value).map(FhirPathValue::DateTime),
            Target::Time => to_time(value).map(FhirPathValue::Time),
        }
    }
}

fn to_boolean(value: &FhirPathValue) -> Option<bool> {
    match value {
        FhirPathValue::Boolean(b) => Some(*b),
        FhirPathValue::Integer(1) => Some(true),
        FhirPathValue::Integer(0) => Some(false),
        FhirPathValue::Decimal(d) if *d == Decimal::ONE => Some(true),
        FhirPathValue::Decimal(d) if d.is_zero() => Some(false),
        FhirPathValue::String(s) => match s.to_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" | "1.0" => Some(true),
            "false" | "f" | "no" | "n" | "0" | "0.0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn to_integer(value: &FhirPathValue) -> Option<i64> {
    match value {
        FhirPathValue::Integer(i) => Some(*i),
        FhirPathValue::Boolean(b) => Some(i64::from(*b)),
        FhirPathValue::String(s) if INTEGER_RE.is_match(s) => s.parse().ok(),
        _ => None,
    }
}

fn to_decimal(value: &FhirPathValue) -> Option<Decimal> {
    match value {
        FhirPathValue::Integer(i) => Some(Decimal::from(*i)),
        FhirPathValue::Decimal(d) => Some(*d),
        FhirPathValue::Boolean(b) => Some(if *b { Decimal::ONE } else { Decimal::ZERO }),
        FhirPathValue::String(s) if DECIMAL_RE.is_match(s) => Decimal::from_str(s).ok(),
        _ => None,
    }
}

fn to_string(value: &FhirPathValue) -> Option<String> {
    match value {
        FhirPathValue::Node(_) | FhirPathValue::TypeInfo(_) | FhirPathValue::Terminologies => None,
        other => Some(other.to_string()),
    }
}

fn to_date(value: &FhirPathValue) -> Option<PrecisionDate> {
    match value {
        FhirPathValue::Date(d) => Some(d.clone()),
        FhirPathValue::DateTime(dt) => Some(dt.date()),
        FhirPathValue::String(s) => {
            PrecisionDate::parse(s).or_else(|| PrecisionDateTime::parse(s).map(|dt| dt.date()))
        }
        _ => None,
    }
}

fn to_datetime(value: &FhirPathValue) -> Option<PrecisionDateTime> {
    match value {
        FhirPathValue::DateTime(dt) => Some(dt.clone()),
        FhirPathValue::Date(d) => Some(d.to_datetime()),
        FhirPathValue::String(s) => PrecisionDateTime::parse(s),
        _ => None,
    }
}

fn to_time(value: &FhirPathValue) -> Option<PrecisionTime> {
    match value {
        FhirPathValue::Time(t) => Some(t.clone()),
        FhirPathValue::String(s) => PrecisionTime::parse(s.strip_prefix('T').unwrap_or(s)),
        _ => None,
    }
}

/// Quantity from a number, a boolean, a quantity or a quantity literal string
fn to_quantity(value: &FhirPathValue) -> Option<Quantity> {
    match value {
        FhirPathValue::Quantity(q) => Some(q.clone()),
        FhirPathValue::Integer(i) => Some(Quantity::dimensionless(Decimal::from(*i))),
        FhirPathValue::Decimal(d) => Some(Quantity::dimensionless(*d)),
        FhirPathValue::Boolean(b) => {
            Some(Quantity::dimensionless(if *b { Decimal::ONE } else { Decimal::ZERO }))
        }
        FhirPathValue::String(s) => {
            let caps = QUANTITY_RE.captures(s.trim())?;
            let amount = Decimal::from_str(caps.get(1)?.as_str()).ok()?;
            let unit = match (caps.get(2), caps.get(3)) {
                (Some(ucum), _) => ucum.as_str().to_string(),
                (None, Some(word)) => CalendarUnit::parse(word.as_str())?.keyword().to_string(),
                (None, None) => "1".to_string(),
            };
            Some(Quantity::new(amount, unit))
        }
        _ => None,
    }
}

fn quantity_in_unit(ctx: &FunctionContext<'_>) -> Result<Option<Quantity>> {
    let Some(value) = ctx.input_singleton()? else {
        return Ok(None);
    };
    let quantity = to_quantity(&value);
    Ok(match ctx.arg_string(0) {
        Some(unit) => quantity.and_then(|q| q.convert_to(&unit)),
        None => quantity,
    })
}

impl FunctionRegistry {
    pub fn register_conversion_functions(&self) -> Result<()> {
        for (target, type_name) in Target::ALL {
            FunctionBuilder::new(format!("to{type_name}"), FunctionCategory::Conversion)
                .description(format!("Converts the input to {type_name}, empty when not convertible"))
                .return_type(type_name)
                .register_sync(
                    self,
                    sync_fn(move |ctx: &FunctionContext<'_>| -> Result<Collection> {
                        Ok(Collection::from(ctx.input_singleton()?.and_then(|v| target.convert(&v))))
                    }),
                )?;

            FunctionBuilder::new(format!("convertsTo{type_name}"), FunctionCategory::Conversion)
                .description(format!("Returns true if the input can be converted to {type_name}"))
                .return_type("Boolean")
                .register_sync(
                    self,
                    sync_fn(move |ctx: &FunctionContext<'_>| -> Result<Collection> {
                        Ok(Collection::from(
                            ctx.input_singleton()?
                                .map(|v| FhirPathValue::Boolean(target.convert(&v).is_some())),
                        ))
                    }),
                )?;
        }

        register_function!(
            self,
            sync "toQuantity",
            category: FunctionCategory::Conversion,
            description: "Converts the input to a Quantity, optionally expressed in the given unit",
            parameters: [],
            optional: ["unit": ParameterKind::String => "Target unit"],
            return_type: "Quantity",
            examples: ["'5 mg'.toQuantity()", "'1 year'.toQuantity('a')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(Collection::from(quantity_in_unit(ctx)?.map(FhirPathValue::Quantity)))
            }
        )?;

        register_function!(
            self,
            sync "convertsToQuantity",
            category: FunctionCategory::Conversion,
            description: "Returns true if the input can be converted to a Quantity",
            parameters: [],
            optional: ["unit": ParameterKind::String => "Target unit"],
            return_type: "Boolean",
            examples: ["'5 mg'.convertsToQuantity()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                if ctx.input.is_empty() {
                    return Ok(Collection::empty());
                }
                Ok(Collection::single(FhirPathValue::Boolean(quantity_in_unit(ctx)?.is_some())))
            }
        )?;

        Ok(())
    }
}
