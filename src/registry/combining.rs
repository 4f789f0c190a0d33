//! Combining functions

use super::{FunctionCategory, FunctionContext, FunctionRegistry, ParameterKind};
use crate::core::{Collection, Result};
use crate::evaluator::operations::union;
use crate::register_function;

impl FunctionRegistry {
    pub fn register_combining_functions(&self) -> Result<()> {
        register_function!(
            self,
            sync "union",
            category: FunctionCategory::Combining,
            description: "Merges two collections, removing duplicates",
            parameters: ["other": ParameterKind::AnyAtRoot => "Collection to merge"],
            return_type: "Collection",
            examples: ["Patient.name.given.union(Patient.name.family)"],
            implementation: |ctx: &FunctionContext<'_>| Ok(union(ctx.input.clone(), ctx.arg_collection(0)))
        )?;

        register_function!(
            self,
            sync "combine",
            category: FunctionCategory::Combining,
            description: "Concatenates two collections, keeping duplicates",
            parameters: ["other": ParameterKind::AnyAtRoot => "Collection to append"],
            return_type: "Collection",
            examples: ["Patient.name.given.combine(Patient.name.family)"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let mut all = ctx.input.clone();
                all.extend(ctx.arg_collection(0));
                Ok(all)
            }
        )?;

        Ok(())
    }
}
