//! Evaluation harness for the registry's unit tests

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use super::create_standard_registry;
use crate::ast::ExpressionNode;
use crate::core::{CollectingTraceProvider, Collection, FhirPathValue, Model, Result, ValueNode};
use crate::evaluator::{EvaluationContext, EvaluationState, evaluate_node};
use crate::terminology::{ReqwestTransport, ResolutionCache};

/// Evaluate `expr` against `resource` with the standard function set
pub async fn evaluate(expr: &ExpressionNode, resource: JsonValue) -> Result<Collection> {
    evaluate_with_model(expr, resource, None).await
}

pub async fn evaluate_with_model(
    expr: &ExpressionNode,
    resource: JsonValue,
    model: Option<Arc<Model>>,
) -> Result<Collection> {
    let input = Collection::single(FhirPathValue::Node(ValueNode::root(resource, model.clone())));
    let state = EvaluationState::new(
        model,
        IndexMap::new(),
        input,
        Arc::new(create_standard_registry()),
        Arc::new(CollectingTraceProvider::new()),
        String::new(),
        Arc::new(ResolutionCache::default()),
        Arc::new(ReqwestTransport::default()),
        64,
    );
    let mut ctx = EvaluationContext::new(Arc::new(state));
    let focus = ctx.this();
    evaluate_node(expr, focus, &mut ctx).await
}

pub fn integers(collection: &Collection) -> Vec<i64> {
    collection
        .iter()
        .filter_map(|v| match v.to_primitive() {
            FhirPathValue::Integer(i) => Some(i),
            _ => None,
        })
        .collect()
}

pub fn booleans(collection: &Collection) -> Vec<bool> {
    collection
        .iter()
        .filter_map(|v| match v.to_primitive() {
            FhirPathValue::Boolean(b) => Some(b),
            _ => None,
        })
        .collect()
}

pub fn strings(collection: &Collection) -> Vec<String> {
    collection.iter().filter_map(FhirPathValue::as_str).collect()
}
