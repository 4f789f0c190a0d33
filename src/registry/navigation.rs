//! Tree navigation functions

use super::{FunctionCategory, FunctionContext, FunctionRegistry};
use crate::core::Result;
use crate::evaluator::Navigator;
use crate::register_function;

impl FunctionRegistry {
    pub fn register_navigation_functions(&self) -> Result<()> {
        register_function!(
            self,
            sync "children",
            category: FunctionCategory::Navigation,
            description: "Every direct child node of the input items",
            parameters: [],
            return_type: "Collection",
            examples: ["Patient.children()"],
            implementation: |ctx: &FunctionContext<'_>| Ok(Navigator::new(ctx.model()).children(ctx.input))
        )?;

        register_function!(
            self,
            sync "descendants",
            category: FunctionCategory::Navigation,
            description: "Every nested child node of the input items, breadth first",
            parameters: [],
            return_type: "Collection",
            examples: ["Patient.descendants()"],
            implementation: |ctx: &FunctionContext<'_>| Ok(Navigator::new(ctx.model()).descendants(ctx.input))
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::builder::{ExpressionBuilderExt, this};
    use crate::registry::testing::{booleans, evaluate, strings};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn patient() -> Value {
        json!({
            "resourceType": "Patient",
            "active": true,
            "name": [{"given": ["Peter", "James"]}]
        })
    }

    #[tokio::test]
    async fn test_children_are_one_level_deep() {
        let children = evaluate(&this().call("children", vec![]), patient()).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(booleans(&children), vec![true]);
    }

    #[tokio::test]
    async fn test_descendants_reach_nested_values() {
        let descendants = evaluate(&this().call("descendants", vec![]), patient()).await.unwrap();
        assert_eq!(descendants.len(), 4);
        assert_eq!(strings(&descendants), vec!["Peter", "James"]);
    }

    #[tokio::test]
    async fn test_primitives_have_no_children() {
        let expr = this().member("active").call("children", vec![]);
        assert!(evaluate(&expr, patient()).await.unwrap().is_empty());
    }
}
