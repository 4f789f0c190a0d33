//! Existence functions: empty, exists, not, all*/any*, subsetOf, supersetOf, distinct, count

use super::{FunctionCategory, FunctionContext, FunctionRegistry, ParameterKind};
use crate::core::error_code::FP0051;
use crate::core::{Collection, FhirPathError, FhirPathValue, Result};
use crate::evaluator::operations::{contains_value, distinct};
use crate::register_function;

fn boolean(value: bool) -> Result<Collection> {
    Ok(Collection::single(FhirPathValue::Boolean(value)))
}

/// Every input item as a boolean, rejecting anything else
fn booleans(ctx: &FunctionContext<'_>) -> Result<Vec<bool>> {
    ctx.input
        .iter()
        .map(|item| match item.to_primitive() {
            FhirPathValue::Boolean(b) => Ok(b),
            other => Err(FhirPathError::type_error(
                FP0051,
                format!("{}() expects Boolean items, got {}", ctx.name, other.type_name()),
            )),
        })
        .collect()
}

fn subset(items: &Collection, of: &Collection) -> bool {
    items.iter().all(|item| contains_value(of, item))
}

impl FunctionRegistry {
    pub fn register_existence_functions(&self) -> Result<()> {
        register_function!(
            self,
            sync "empty",
            category: FunctionCategory::Existence,
            description: "Returns true if the input collection is empty",
            parameters: [],
            return_type: "Boolean",
            examples: ["Patient.name.empty()"],
            implementation: |ctx: &FunctionContext<'_>| boolean(ctx.input.is_empty())
        )?;

        register_function!(
            self,
            sync "exists",
            category: FunctionCategory::Existence,
            description: "Returns true if the input collection has any items",
            parameters: [],
            return_type: "Boolean",
            examples: ["Patient.name.exists()"],
            implementation: |ctx: &FunctionContext<'_>| boolean(!ctx.input.is_empty())
        )?;

        register_function!(
            self,
            sync "not",
            category: FunctionCategory::Existence,
            description: "Boolean negation of the input",
            parameters: [],
            return_type: "Boolean",
            examples: ["Patient.active.not()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let value = ctx.input.to_boolean("not()")?;
                Ok(Collection::from(value.map(|b| FhirPathValue::Boolean(!b))))
            }
        )?;

        register_function!(
            self,
            sync "allTrue",
            category: FunctionCategory::Existence,
            description: "Returns true if every item is true",
            parameters: [],
            return_type: "Boolean",
            examples: ["Observation.component.exists().allTrue()"],
            implementation: |ctx: &FunctionContext<'_>| boolean(booleans(ctx)?.iter().all(|b| *b))
        )?;

        register_function!(
            self,
            sync "anyTrue",
            category: FunctionCategory::Existence,
            description: "Returns true if any item is true",
            parameters: [],
            return_type: "Boolean",
            examples: ["(false | true).anyTrue()"],
            implementation: |ctx: &FunctionContext<'_>| boolean(booleans(ctx)?.iter().any(|b| *b))
        )?;

        register_function!(
            self,
            sync "allFalse",
            category: FunctionCategory::Existence,
            description: "Returns true if every item is false",
            parameters: [],
            return_type: "Boolean",
            examples: ["(false | false).allFalse()"],
            implementation: |ctx: &FunctionContext<'_>| boolean(booleans(ctx)?.iter().all(|b| !*b))
        )?;

        register_function!(
            self,
            sync "anyFalse",
            category: FunctionCategory::Existence,
            description: "Returns true if any item is false",
            parameters: [],
            return_type: "Boolean",
            examples: ["(true | false).anyFalse()"],
            implementation: |ctx: &FunctionContext<'_>| boolean(booleans(ctx)?.iter().any(|b| !*b))
        )?;

        register_function!(
            self,
            sync "subsetOf",
            category: FunctionCategory::Existence,
            description: "Returns true if every input item is in the other collection",
            parameters: ["other": ParameterKind::AnyAtRoot => "Collection to test against"],
            return_type: "Boolean",
            examples: ["Patient.name.given.subsetOf(Patient.name.given)"],
            implementation: |ctx: &FunctionContext<'_>| boolean(subset(ctx.input, &ctx.arg_collection(0)))
        )?;

        register_function!(
            self,
            sync "supersetOf",
            category: FunctionCategory::Existence,
            description: "Returns true if every item of the other collection is in the input",
            parameters: ["other": ParameterKind::AnyAtRoot => "Collection to test against"],
            return_type: "Boolean",
            examples: ["Patient.name.given.supersetOf(Patient.name.given.first())"],
            implementation: |ctx: &FunctionContext<'_>| boolean(subset(&ctx.arg_collection(0), ctx.input))
        )?;

        register_function!(
            self,
            sync "distinct",
            category: FunctionCategory::Existence,
            description: "Removes duplicate items, keeping the first occurrence",
            parameters: [],
            return_type: "Collection",
            examples: ["(1 | 2 | 2).distinct()"],
            implementation: |ctx: &FunctionContext<'_>| Ok(distinct(ctx.input.clone()))
        )?;

        register_function!(
            self,
            sync "isDistinct",
            category: FunctionCategory::Existence,
            description: "Returns true if the input has no duplicate items",
            parameters: [],
            return_type: "Boolean",
            examples: ["Patient.identifier.value.isDistinct()"],
            implementation: |ctx: &FunctionContext<'_>| boolean(distinct(ctx.input.clone()).len() == ctx.input.len())
        )?;

        register_function!(
            self,
            sync "count",
            category: FunctionCategory::Existence,
            description: "Number of items in the input",
            parameters: [],
            return_type: "Integer",
            examples: ["Patient.name.count()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let count = i64::try_from(ctx.input.len()).unwrap_or(i64::MAX);
                Ok(Collection::single(FhirPathValue::Integer(count)))
            }
        )?;

        Ok(())
    }
}
