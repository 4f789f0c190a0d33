//! Type functions: is, as, ofType, type

use std::sync::Arc;

use super::{FunctionCategory, FunctionContext, FunctionRegistry, ParameterKind};
use crate::core::{Collection, FhirPathValue, Result, TypeSpecifier};
use crate::register_function;

/// Whether `value` is of the given type or one of its subtypes
pub fn is_of_type(ctx: &FunctionContext<'_>, value: &FhirPathValue, specifier: &TypeSpecifier) -> bool {
    value.type_info().is(specifier, ctx.model().map(Arc::as_ref))
}

impl FunctionRegistry {
    pub fn register_type_functions(&self) -> Result<()> {
        register_function!(
            self,
            sync "is",
            category: FunctionCategory::Type,
            description: "Returns true if the input is of the given type",
            parameters: ["type": ParameterKind::TypeSpecifier => "Type name"],
            return_type: "Boolean",
            examples: ["Observation.value.is(Quantity)"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let (Some(item), Some(specifier)) = (ctx.input.singleton("is()")?, ctx.arg_type(0)) else {
                    return Ok(Collection::empty());
                };
                Ok(Collection::single(FhirPathValue::Boolean(is_of_type(ctx, item, specifier))))
            }
        )?;

        register_function!(
            self,
            sync "as",
            category: FunctionCategory::Type,
            description: "The input when it is of the given type, otherwise empty",
            parameters: ["type": ParameterKind::TypeSpecifier => "Type name"],
            return_type: "Any",
            examples: ["Observation.value.as(Quantity).unit"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let (Some(item), Some(specifier)) = (ctx.input.singleton("as()")?, ctx.arg_type(0)) else {
                    return Ok(Collection::empty());
                };
                Ok(Collection::from(is_of_type(ctx, item, specifier).then(|| item.clone())))
            }
        )?;

        register_function!(
            self,
            sync "ofType",
            category: FunctionCategory::Type,
            description: "The input items of the given type",
            parameters: ["type": ParameterKind::TypeSpecifier => "Type name"],
            return_type: "Collection",
            examples: ["Bundle.entry.resource.ofType(Patient)"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let Some(specifier) = ctx.arg_type(0) else {
                    return Ok(Collection::empty());
                };
                Ok(ctx.input.iter().filter(|item| is_of_type(ctx, item, specifier)).cloned().collect())
            }
        )?;

        register_function!(
            self,
            sync "type",
            category: FunctionCategory::Type,
            description: "Type information of every input item",
            parameters: [],
            return_type: "TypeInfo",
            examples: ["Patient.active.type().name"],
            implementation: |ctx: &FunctionContext<'_>| {
                Ok(ctx.input.iter().map(|item| FhirPathValue::TypeInfo(item.type_info())).collect())
            }
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExpressionNode;
    use crate::ast::builder::{ExpressionBuilderExt, decimal, ident, integer, string, this, union};
    use crate::core::Model;
    use crate::core::error_code::FP0052;
    use crate::registry::testing::{booleans, evaluate, evaluate_with_model, integers, strings};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn mixed() -> ExpressionNode {
        union(union(integer(1), string("a")), decimal("2.5"))
    }

    #[tokio::test]
    async fn test_of_type_filters_system_types() {
        let ints = evaluate(&mixed().call("ofType", vec![ident("Integer")]), json!({})).await.unwrap();
        let texts = evaluate(&mixed().call("ofType", vec![ident("String")]), json!({})).await.unwrap();
        assert_eq!(integers(&ints), vec![1]);
        assert_eq!(strings(&texts), vec!["a"]);
    }

    #[tokio::test]
    async fn test_is_and_as_on_a_single_item() {
        let is_int = evaluate(&integer(1).call("is", vec![ident("Integer")]), json!({})).await.unwrap();
        let is_not = evaluate(&string("a").call("is", vec![ident("Integer")]), json!({})).await.unwrap();
        assert_eq!(booleans(&is_int), vec![true]);
        assert_eq!(booleans(&is_not), vec![false]);

        let kept = evaluate(&integer(1).call("as", vec![ident("Integer")]), json!({})).await.unwrap();
        let dropped = evaluate(&string("a").call("as", vec![ident("Integer")]), json!({})).await.unwrap();
        assert_eq!(integers(&kept), vec![1]);
        assert!(dropped.is_empty());
    }

    #[tokio::test]
    async fn test_is_requires_a_singleton() {
        let err = evaluate(&mixed().call("is", vec![ident("Integer")]), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), FP0052);
    }

    #[tokio::test]
    async fn test_is_follows_the_model_hierarchy() {
        let model = Arc::new(
            Model::new("r4")
                .with_parent_type("Patient", "DomainResource")
                .with_parent_type("DomainResource", "Resource"),
        );
        let patient = json!({"resourceType": "Patient", "id": "p1"});
        for (type_name, expected) in [("Patient", true), ("Resource", true), ("Observation", false)] {
            let expr = this().call("is", vec![ident(type_name)]);
            let result = evaluate_with_model(&expr, patient.clone(), Some(Arc::clone(&model)))
                .await
                .unwrap();
            assert_eq!(booleans(&result), vec![expected], "is({type_name})");
        }
    }
}
