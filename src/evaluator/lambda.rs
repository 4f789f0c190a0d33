//! Functions whose arguments are expressions rather than values
//!
//! `where`, `select`, `repeat`, `aggregate`, `all`, `exists(criteria)`,
//! `iif`, `defineVariable` and `trace` receive their argument sub-trees
//! unevaluated and run them once per input item with `$this` and `$index`
//! rebound, or conditionally.

use std::ops::RangeInclusive;

use super::context::EvaluationContext;
use super::evaluator::evaluate_node;
use super::operations::contains_value;
use crate::ast::ExpressionNode;
use crate::core::error_code::{FP0051, FP0052, FP0066};
use crate::core::{Collection, FhirPathError, FhirPathValue, Result};

/// Accepted argument counts when `name` called with `count` arguments is a macro
pub fn macro_arity(name: &str, count: usize) -> Option<RangeInclusive<usize>> {
    match name {
        "where" | "select" | "repeat" | "all" => Some(1..=1),
        "exists" if count > 0 => Some(1..=1),
        "aggregate" | "defineVariable" | "trace" => Some(1..=2),
        "iif" => Some(2..=3),
        _ => None,
    }
}

pub async fn evaluate_macro(
    name: &str,
    args: &[ExpressionNode],
    input: Collection,
    ctx: &mut EvaluationContext,
) -> Result<Collection> {
    match name {
        "where" => filter(&args[0], input, ctx).await,
        "select" => select(&args[0], input, ctx).await,
        "repeat" => repeat(&args[0], input, ctx).await,
        "aggregate" => aggregate(&args[0], args.get(1), input, ctx).await,
        "all" => all(&args[0], input, ctx).await,
        "exists" => exists(&args[0], input, ctx).await,
        "iif" => iif(&args[0], &args[1], args.get(2), input, ctx).await,
        "defineVariable" => define_variable(&args[0], args.get(1), input, ctx).await,
        "trace" => trace(&args[0], args.get(1), input, ctx).await,
        other => Err(FhirPathError::type_error(
            FP0051,
            format!("'{other}' does not take expression arguments"),
        )),
    }
}

/// Run `body` for the item at `index`, with `$this` bound to it
async fn apply(
    body: &ExpressionNode,
    item: &FhirPathValue,
    index: usize,
    ctx: &EvaluationContext,
) -> Result<Collection> {
    let mut scoped = ctx.with_focus(item.clone(), index);
    evaluate_node(body, Collection::single(item.clone()), &mut scoped).await
}

async fn filter(criteria: &ExpressionNode, input: Collection, ctx: &EvaluationContext) -> Result<Collection> {
    let mut result = Collection::empty();
    for (i, item) in input.iter().enumerate() {
        let keep = apply(criteria, item, i, ctx).await?.to_boolean("where() criteria")?;
        if keep == Some(true) {
            result.push(item.clone());
        }
    }
    Ok(result)
}

async fn select(projection: &ExpressionNode, input: Collection, ctx: &EvaluationContext) -> Result<Collection> {
    let mut result = Collection::empty();
    for (i, item) in input.iter().enumerate() {
        result.extend(apply(projection, item, i, ctx).await?);
    }
    Ok(result)
}

/// Re-applies `projection` to each round's new items until a round adds nothing unseen
async fn repeat(projection: &ExpressionNode, input: Collection, ctx: &EvaluationContext) -> Result<Collection> {
    let limit = ctx.state().max_depth;
    let mut result = Collection::empty();
    let mut frontier = input;
    let mut rounds = 0;
    while !frontier.is_empty() {
        rounds += 1;
        if rounds > limit {
            return Err(FhirPathError::evaluation_error(
                FP0066,
                format!("repeat() did not settle within {limit} rounds"),
            ));
        }
        let mut next = Collection::empty();
        for (i, item) in frontier.iter().enumerate() {
            for produced in apply(projection, item, i, ctx).await? {
                if !contains_value(&result, &produced) {
                    result.push(produced.clone());
                    next.push(produced);
                }
            }
        }
        frontier = next;
    }
    Ok(result)
}

async fn aggregate(
    aggregator: &ExpressionNode,
    init: Option<&ExpressionNode>,
    input: Collection,
    ctx: &EvaluationContext,
) -> Result<Collection> {
    let mut total = match init {
        Some(init) => {
            let mut scoped = ctx.clone();
            evaluate_node(init, input.clone(), &mut scoped).await?
        }
        None => Collection::empty(),
    };
    for (i, item) in input.iter().enumerate() {
        let mut scoped = ctx.with_focus(item.clone(), i).with_total(total);
        total = evaluate_node(aggregator, Collection::single(item.clone()), &mut scoped).await?;
    }
    Ok(total)
}

async fn all(criteria: &ExpressionNode, input: Collection, ctx: &EvaluationContext) -> Result<Collection> {
    for (i, item) in input.iter().enumerate() {
        if apply(criteria, item, i, ctx).await?.to_boolean("all() criteria")? != Some(true) {
            return Ok(Collection::single(FhirPathValue::Boolean(false)));
        }
    }
    Ok(Collection::single(FhirPathValue::Boolean(true)))
}

async fn exists(criteria: &ExpressionNode, input: Collection, ctx: &EvaluationContext) -> Result<Collection> {
    for (i, item) in input.iter().enumerate() {
        if apply(criteria, item, i, ctx).await?.to_boolean("exists() criteria")? == Some(true) {
            return Ok(Collection::single(FhirPathValue::Boolean(true)));
        }
    }
    Ok(Collection::single(FhirPathValue::Boolean(false)))
}

async fn iif(
    criterion: &ExpressionNode,
    true_result: &ExpressionNode,
    otherwise: Option<&ExpressionNode>,
    input: Collection,
    ctx: &EvaluationContext,
) -> Result<Collection> {
    if input.len() > 1 {
        return Err(FhirPathError::type_error(
            FP0052,
            format!("iif() expects at most one input item, got {}", input.len()),
        ));
    }
    let mut scoped = match input.first() {
        Some(item) => ctx.with_focus(item.clone(), 0),
        None => ctx.clone(),
    };
    let condition = evaluate_node(criterion, input.clone(), &mut scoped)
        .await?
        .to_boolean("iif() criterion")?;
    let branch = if condition == Some(true) {
        Some(true_result)
    } else {
        otherwise
    };
    match branch {
        Some(branch) => {
            let mut scoped = ctx.clone();
            evaluate_node(branch, input, &mut scoped).await
        }
        None => Ok(Collection::empty()),
    }
}

async fn name_argument(function: &str, arg: &ExpressionNode, input: &Collection, ctx: &EvaluationContext) -> Result<String> {
    let mut scoped = ctx.clone();
    let value = evaluate_node(arg, input.clone(), &mut scoped).await?;
    match value.singleton(&format!("{function}() name"))?.map(FhirPathValue::to_primitive) {
        Some(FhirPathValue::String(name)) => Ok(name),
        other => Err(FhirPathError::type_error(
            FP0051,
            format!(
                "{function}() expects a String name, got {}",
                other.map_or_else(|| "an empty collection".to_string(), |v| v.type_name())
            ),
        )),
    }
}

/// Binds `%name` for the rest of the invocation chain; the input passes through
async fn define_variable(
    name: &ExpressionNode,
    value: Option<&ExpressionNode>,
    input: Collection,
    ctx: &mut EvaluationContext,
) -> Result<Collection> {
    let name = name_argument("defineVariable", name, &input, ctx).await?;
    let value = match value {
        Some(expr) => {
            let mut scoped = ctx.clone();
            evaluate_node(expr, input.clone(), &mut scoped).await?
        }
        None => input.clone(),
    };
    ctx.define_variable(&name, value)?;
    Ok(input)
}

async fn trace(
    name: &ExpressionNode,
    projection: Option<&ExpressionNode>,
    input: Collection,
    ctx: &EvaluationContext,
) -> Result<Collection> {
    let name = name_argument("trace", name, &input, ctx).await?;
    let values = match projection {
        Some(projection) => select(projection, input.clone(), ctx).await?,
        None => input.clone(),
    };
    ctx.trace(&name, &values);
    Ok(input)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::ast::BinaryOperator;
    use crate::ast::builder::*;
    use crate::core::error_code::FP0064;
    use crate::core::{CollectingTraceProvider, ValueNode};
    use crate::evaluator::EvaluationState;
    use crate::registry::create_standard_registry;
    use crate::terminology::{ReqwestTransport, ResolutionCache};

    fn context(resource: serde_json::Value, trace: Arc<CollectingTraceProvider>) -> EvaluationContext {
        let input = Collection::single(FhirPathValue::Node(ValueNode::root(resource, None)));
        let state = EvaluationState::new(
            None,
            IndexMap::new(),
            input,
            Arc::new(create_standard_registry()),
            trace,
            String::new(),
            Arc::new(ResolutionCache::default()),
            Arc::new(ReqwestTransport::default()),
            32,
        );
        EvaluationContext::new(Arc::new(state))
    }

    async fn eval(expr: &ExpressionNode, resource: serde_json::Value) -> Result<Collection> {
        let mut ctx = context(resource, Arc::new(CollectingTraceProvider::new()));
        let input = ctx.this();
        evaluate_node(expr, input, &mut ctx).await
    }

    fn integers(collection: &Collection) -> Vec<i64> {
        collection
            .iter()
            .filter_map(|v| match v {
                FhirPathValue::Integer(i) => Some(*i),
                _ => None,
            })
            .collect()
    }

    fn numbers() -> ExpressionNode {
        union(union(integer(1), integer(2)), integer(3))
    }

    #[tokio::test]
    async fn test_where_and_select_rebind_this_and_index() {
        let expr = numbers()
            .call("where", vec![binary(BinaryOperator::GreaterThan, this(), integer(1))])
            .call("select", vec![binary(BinaryOperator::Multiply, this(), index())]);
        let result = eval(&expr, json!({})).await.unwrap();
        assert_eq!(integers(&result), vec![0, 3]);
    }

    #[tokio::test]
    async fn test_aggregate_sums_with_total() {
        let expr = numbers().call(
            "aggregate",
            vec![binary(BinaryOperator::Add, this(), total()), integer(0)],
        );
        assert_eq!(integers(&eval(&expr, json!({})).await.unwrap()), vec![6]);
    }

    #[tokio::test]
    async fn test_aggregate_without_init_starts_empty() {
        let expr = numbers().call(
            "aggregate",
            vec![func(
                "iif",
                vec![
                    total().call("empty", vec![]),
                    this(),
                    binary(BinaryOperator::Add, this(), total()),
                ],
            )],
        );
        assert_eq!(integers(&eval(&expr, json!({})).await.unwrap()), vec![6]);
    }

    #[tokio::test]
    async fn test_repeat_walks_nested_items() {
        let questionnaire = json!({
            "resourceType": "Questionnaire",
            "item": [
                {"linkId": "1", "item": [{"linkId": "1.1"}, {"linkId": "1.2", "item": [{"linkId": "1.2.1"}]}]},
                {"linkId": "2"}
            ]
        });
        let expr = path("Questionnaire")
            .call("repeat", vec![ident("item")])
            .member("linkId");
        let result = eval(&expr, questionnaire).await.unwrap();
        let ids: Vec<String> = result.iter().filter_map(FhirPathValue::as_str).collect();
        assert_eq!(ids, vec!["1", "2", "1.1", "1.2", "1.2.1"]);
    }

    #[tokio::test]
    async fn test_repeat_stops_when_nothing_new_appears() {
        let expr = integer(1).call("repeat", vec![this()]);
        assert_eq!(integers(&eval(&expr, json!({})).await.unwrap()), vec![1]);

        // 1 -> 2 -> 3 -> 1 cycles back to a value already produced
        let cycle = integer(1).call(
            "repeat",
            vec![binary(
                BinaryOperator::Add,
                binary(BinaryOperator::Modulo, this(), integer(3)),
                integer(1),
            )],
        );
        assert_eq!(integers(&eval(&cycle, json!({})).await.unwrap()), vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn test_unbounded_repeat_hits_the_limit() {
        let expr = integer(1).call("repeat", vec![binary(BinaryOperator::Add, this(), integer(1))]);
        let err = eval(&expr, json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), FP0066);
    }

    #[tokio::test]
    async fn test_all_and_exists_with_criteria() {
        let all_positive = numbers().call("all", vec![binary(BinaryOperator::GreaterThan, this(), integer(0))]);
        let result = eval(&all_positive, json!({})).await.unwrap();
        assert!(matches!(result.first(), Some(FhirPathValue::Boolean(true))));

        let empty_all = path("missing").call("all", vec![boolean(false)]);
        let result = eval(&empty_all, json!({})).await.unwrap();
        assert!(matches!(result.first(), Some(FhirPathValue::Boolean(true))));

        let any_big = numbers().call("exists", vec![binary(BinaryOperator::GreaterThan, this(), integer(2))]);
        let result = eval(&any_big, json!({})).await.unwrap();
        assert!(matches!(result.first(), Some(FhirPathValue::Boolean(true))));
    }

    #[tokio::test]
    async fn test_iif_branches_lazily() {
        // the otherwise branch would fail on a multi-item single()
        let expr = func("iif", vec![boolean(true), string("yes"), numbers().call("single", vec![])]);
        let result = eval(&expr, json!({})).await.unwrap();
        assert!(matches!(result.first(), Some(FhirPathValue::String(s)) if s == "yes"));

        let no_otherwise = func("iif", vec![path("missing"), string("yes")]);
        assert!(eval(&no_otherwise, json!({})).await.unwrap().is_empty());

        let multi = numbers().call("iif", vec![boolean(true), string("yes")]);
        assert_eq!(eval(&multi, json!({})).await.unwrap_err().error_code(), FP0052);
    }

    #[tokio::test]
    async fn test_define_variable_flows_along_the_chain() {
        let expr = integer(5)
            .call("defineVariable", vec![string("five")])
            .call("select", vec![binary(BinaryOperator::Add, var("five"), integer(1))]);
        assert_eq!(integers(&eval(&expr, json!({})).await.unwrap()), vec![6]);
    }

    #[tokio::test]
    async fn test_define_variable_is_not_visible_to_union_sibling() {
        let expr = union(
            integer(1).call("defineVariable", vec![string("a"), integer(2)]),
            var("a"),
        );
        let err = eval(&expr, json!({})).await.unwrap_err();
        assert!(matches!(err, FhirPathError::UndefinedVariable { .. }));
    }

    #[tokio::test]
    async fn test_define_variable_rejects_redefinition() {
        let expr = integer(1)
            .call("defineVariable", vec![string("a")])
            .call("defineVariable", vec![string("a")]);
        assert_eq!(eval(&expr, json!({})).await.unwrap_err().error_code(), FP0064);
    }

    #[tokio::test]
    async fn test_trace_reports_projection_and_passes_input() {
        let provider = Arc::new(CollectingTraceProvider::new());
        let mut ctx = context(json!({}), provider.clone());
        let expr = numbers().call(
            "trace",
            vec![string("doubled"), binary(BinaryOperator::Multiply, this(), integer(2))],
        );
        let input = ctx.this();
        let result = evaluate_node(&expr, input, &mut ctx).await.unwrap();
        assert_eq!(integers(&result), vec![1, 2, 3]);
        let traces = provider.collect_traces();
        assert_eq!(traces.len(), 1);
        assert!(traces[0].starts_with("TRACE[doubled]"));
    }
}
