//! Subsetting functions

use super::{FunctionCategory, FunctionContext, FunctionRegistry, ParameterKind};
use crate::core::{Collection, Result};
use crate::evaluator::operations::{contains_value, distinct};
use crate::register_function;

fn skip(input: &Collection, count: i64) -> Collection {
    let count = usize::try_from(count.max(0)).unwrap_or(usize::MAX);
    input.iter().skip(count).cloned().collect()
}

fn take(input: &Collection, count: i64) -> Collection {
    let count = usize::try_from(count.max(0)).unwrap_or(usize::MAX);
    input.iter().take(count).cloned().collect()
}

impl FunctionRegistry {
    pub fn register_subsetting_functions(&self) -> Result<()> {
        register_function!(
            self,
            sync "single",
            category: FunctionCategory::Subsetting,
            description: "Returns the only item of the input, failing when there is more than one",
            parameters: [],
            return_type: "Any",
            examples: ["Patient.name.single()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(Collection::from(ctx.input.singleton("single()")?.cloned()))
            }
        )?;

        register_function!(
            self,
            sync "first",
            category: FunctionCategory::Subsetting,
            description: "Returns the first item of the input",
            parameters: [],
            return_type: "Any",
            examples: ["Patient.name.first()"],
            implementation: |ctx: &FunctionContext<'_>| Ok(Collection::from(ctx.input.first().cloned()))
        )?;

        register_function!(
            self,
            sync "last",
            category: FunctionCategory::Subsetting,
            description: "Returns the last item of the input",
            parameters: [],
            return_type: "Any",
            examples: ["Patient.name.last()"],
            implementation: |ctx: &FunctionContext<'_>| Ok(Collection::from(ctx.input.last().cloned()))
        )?;

        register_function!(
            self,
            sync "tail",
            category: FunctionCategory::Subsetting,
            description: "Returns every item but the first",
            parameters: [],
            return_type: "Collection",
            examples: ["Patient.name.tail()"],
            implementation: |ctx: &FunctionContext<'_>| Ok(skip(ctx.input, 1))
        )?;

        register_function!(
            self,
            sync "skip",
            category: FunctionCategory::Subsetting,
            description: "Returns the input without its first num items",
            parameters: ["num": ParameterKind::Integer => "Number of items to skip"],
            return_type: "Collection",
            examples: ["Patient.name.skip(1)"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(match ctx.arg_integer(0) {
                    Some(count) => skip(ctx.input, count),
                    None => ctx.input.clone(),
                })
            }
        )?;

        register_function!(
            self,
            sync "take",
            category: FunctionCategory::Subsetting,
            description: "Returns the first num items of the input",
            parameters: ["num": ParameterKind::Integer => "Number of items to keep"],
            return_type: "Collection",
            examples: ["Patient.name.take(2)"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                Ok(match ctx.arg_integer(0) {
                    Some(count) => take(ctx.input, count),
                    None => Collection::empty(),
                })
            }
        )?;

        register_function!(
            self,
            sync "intersect",
            category: FunctionCategory::Subsetting,
            description: "Items present in both collections, without duplicates",
            parameters: ["other": ParameterKind::AnyAtRoot => "Collection to intersect with"],
            return_type: "Collection",
            examples: ["(1 | 2 | 3).intersect(2 | 4)"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let other = ctx.arg_collection(0);
                let shared = ctx.input.iter().filter(|item| contains_value(&other, item)).cloned().collect();
                Ok(distinct(shared))
            }
        )?;

        register_function!(
            self,
            sync "exclude",
            category: FunctionCategory::Subsetting,
            description: "Items of the input not present in the other collection, keeping duplicates and order",
            parameters: ["other": ParameterKind::AnyAtRoot => "Collection of items to drop"],
            return_type: "Collection",
            examples: ["(1 | 2 | 3).exclude(2)"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let other = ctx.arg_collection(0);
                Ok(ctx.input.iter().filter(|item| !contains_value(&other, item)).cloned().collect())
            }
        )?;

        Ok(())
    }
}
