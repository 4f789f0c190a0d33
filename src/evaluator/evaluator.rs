//! Tree-walking evaluation of expression nodes
//!
//! [`evaluate_node`] dispatches on the [`ExpressionNode`] variant. Every node
//! takes its input focus as a [`Collection`] and produces a collection; an
//! absent value is always the empty collection.
//!
//! Scoping follows the shape of the tree: the object of an invocation and the
//! invocation itself share one context, so `defineVariable` is visible to the
//! rest of the chain. Operands of binary operators, function arguments and
//! lambda bodies each run on their own copy of the context.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::context::EvaluationContext;
use super::lambda;
use super::navigator::Navigator;
use super::operations::{self, logic};
use super::result::YieldOnce;
use crate::ast::{BinaryOperator, ExpressionNode, LiteralValue, TypeOperator};
use crate::core::error_code::{FP0051, FP0054, FP0055};
use crate::core::{Collection, FhirPathError, FhirPathValue, Result, TypeSpecifier};
use crate::registry::{
    FunctionArgument, FunctionContext, FunctionMetadata, ParameterKind, ParameterMetadata, RegisteredFunction,
};

/// Evaluate `node` against `input`
pub fn evaluate_node<'a>(
    node: &'a ExpressionNode,
    input: Collection,
    ctx: &'a mut EvaluationContext,
) -> BoxFuture<'a, Result<Collection>> {
    async move {
        let path = input.first().and_then(FhirPathValue::element_path);
        ctx.descend()
            .map_err(|e| e.with_expression(node).with_path(path.clone()))?;
        log::trace!("evaluating {} '{}' on {} item(s)", node.kind(), node, input.len());
        let result = evaluate_inner(node, input, ctx).await;
        ctx.ascend();
        result.map_err(|e| e.with_expression(node).with_path(path))
    }
    .boxed()
}

async fn evaluate_inner(node: &ExpressionNode, input: Collection, ctx: &mut EvaluationContext) -> Result<Collection> {
    match node {
        ExpressionNode::Literal(literal) => Ok(literal_value(literal)),
        ExpressionNode::This => Ok(ctx.this()),
        ExpressionNode::Index => Ok(Collection::from(ctx.index().map(FhirPathValue::Integer))),
        ExpressionNode::Total => Ok(ctx.total().cloned().unwrap_or_default()),
        ExpressionNode::Variable(name) => ctx.variable(name),
        ExpressionNode::Identifier(name) => Ok(Navigator::new(ctx.model()).navigate(&input, name)),
        ExpressionNode::FunctionCall { name, args } => call_function(name, args, input, ctx).await,
        ExpressionNode::Invocation { object, invocation } => {
            let focus = evaluate_node(object, input, ctx).await?;
            evaluate_node(invocation, focus, ctx).await
        }
        ExpressionNode::Indexer { object, index } => {
            let collection = evaluate_node(object, input.clone(), ctx).await?;
            let mut scoped = ctx.clone();
            let index = evaluate_node(index, input, &mut scoped).await?;
            select_index(collection, &index)
        }
        ExpressionNode::Unary { op, operand } => {
            let operand = evaluate_node(operand, input, ctx).await?;
            operations::unary(*op, &operand)
        }
        ExpressionNode::Binary { op, left, right } => binary(*op, left, right, input, ctx).await,
        ExpressionNode::TypeOperation {
            op,
            operand,
            specifier,
        } => {
            let operand = evaluate_node(operand, input, ctx).await?;
            type_operation(*op, &operand, specifier, ctx)
        }
        ExpressionNode::Parenthesized(inner) => evaluate_node(inner, input, ctx).await,
    }
}

pub(crate) fn literal_value(literal: &LiteralValue) -> Collection {
    let value = match literal {
        LiteralValue::Null => return Collection::empty(),
        LiteralValue::Boolean(b) => FhirPathValue::Boolean(*b),
        LiteralValue::String(s) => FhirPathValue::String(s.clone()),
        LiteralValue::Integer(i) => FhirPathValue::Integer(*i),
        LiteralValue::Decimal(d) => FhirPathValue::Decimal(*d),
        LiteralValue::Date(d) => FhirPathValue::Date(d.clone()),
        LiteralValue::DateTime(dt) => FhirPathValue::DateTime(dt.clone()),
        LiteralValue::Time(t) => FhirPathValue::Time(t.clone()),
        LiteralValue::Quantity { value, unit } => FhirPathValue::quantity(*value, unit.clone()),
    };
    Collection::single(value)
}

fn select_index(collection: Collection, index: &Collection) -> Result<Collection> {
    let position = match index.singleton("Indexer")?.map(FhirPathValue::to_primitive) {
        None => return Ok(Collection::empty()),
        Some(FhirPathValue::Integer(i)) => i,
        Some(other) => {
            return Err(FhirPathError::type_error(
                FP0051,
                format!("Index must be an Integer, got {}", other.type_name()),
            ));
        }
    };
    Ok(Collection::from(
        usize::try_from(position)
            .ok()
            .and_then(|i| collection.get(i))
            .cloned(),
    ))
}

async fn binary(
    op: BinaryOperator,
    left: &ExpressionNode,
    right: &ExpressionNode,
    input: Collection,
    ctx: &EvaluationContext,
) -> Result<Collection> {
    let mut left_ctx = ctx.clone();
    let left = evaluate_node(left, input.clone(), &mut left_ctx).await?;

    if op.is_logical() {
        let left = left.to_boolean(&format!("Left operand of '{}'", op.symbol()))?;
        if let Some(decided) = logic::short_circuit(op, left) {
            return Ok(Collection::single(FhirPathValue::Boolean(decided)));
        }
        let mut right_ctx = ctx.clone();
        let right = evaluate_node(right, input, &mut right_ctx)
            .await?
            .to_boolean(&format!("Right operand of '{}'", op.symbol()))?;
        return logic::logical(op, left, right);
    }

    let mut right_ctx = ctx.clone();
    let right = evaluate_node(right, input, &mut right_ctx).await?;
    match op {
        BinaryOperator::Equal
        | BinaryOperator::NotEqual
        | BinaryOperator::Equivalent
        | BinaryOperator::NotEquivalent => Ok(operations::equality(op, &left, &right)),
        BinaryOperator::LessThan
        | BinaryOperator::LessThanOrEqual
        | BinaryOperator::GreaterThan
        | BinaryOperator::GreaterThanOrEqual => operations::compare(op, &left, &right),
        BinaryOperator::In | BinaryOperator::Contains => operations::membership(op, &left, &right),
        BinaryOperator::Union => Ok(operations::union(left, right)),
        _ => operations::arithmetic(op, &left, &right),
    }
}

fn type_operation(
    op: TypeOperator,
    operand: &Collection,
    specifier: &TypeSpecifier,
    ctx: &EvaluationContext,
) -> Result<Collection> {
    let what = format!("Operator '{}'", op.symbol());
    let Some(item) = operand.singleton(&what)? else {
        return Ok(Collection::empty());
    };
    let matches = item.type_info().is(specifier, ctx.model().map(Arc::as_ref));
    Ok(match op {
        TypeOperator::Is => Collection::single(FhirPathValue::Boolean(matches)),
        TypeOperator::As => Collection::from(matches.then(|| item.clone())),
    })
}

fn lookup_function(name: &str, ctx: &EvaluationContext) -> Option<(RegisteredFunction, FunctionMetadata)> {
    let state = ctx.state();
    state
        .user_functions
        .as_ref()
        .and_then(|table| table.get_function(name))
        .or_else(|| state.functions.get_function(name))
}

fn arity_error(name: &str, expected: &str, got: usize) -> FhirPathError {
    FhirPathError::type_error(
        FP0055,
        format!("{name}() expects {expected} argument(s), got {got}"),
    )
}

async fn call_function(
    name: &str,
    args: &[ExpressionNode],
    input: Collection,
    ctx: &mut EvaluationContext,
) -> Result<Collection> {
    let user_defined = ctx
        .state()
        .user_functions
        .as_ref()
        .and_then(|table| table.get_function_metadata(name));
    if user_defined.is_none() {
        if let Some(arity) = lambda::macro_arity(name, args.len()) {
            if !arity.contains(&args.len()) {
                let expected = format!("{}..{}", arity.start(), arity.end());
                return Err(arity_error(name, &expected, args.len()));
            }
            return lambda::evaluate_macro(name, args, input, ctx).await;
        }
    }

    let Some((function, metadata)) = lookup_function(name, ctx) else {
        return Err(FhirPathError::type_error(FP0054, format!("Unknown function '{name}'")));
    };
    if !metadata.accepts_arity(args.len()) {
        let expected = if metadata.min_arity() == metadata.max_arity() {
            metadata.min_arity().to_string()
        } else {
            format!("{}..{}", metadata.min_arity(), metadata.max_arity())
        };
        return Err(arity_error(name, &expected, args.len()));
    }

    let arguments = evaluate_arguments(name, &metadata, args, &input, ctx).await?;
    let function_ctx = FunctionContext {
        name,
        input: &input,
        arguments: &arguments,
        context: ctx,
    };
    match function {
        RegisteredFunction::Sync(f) => f(&function_ctx),
        RegisteredFunction::Async(f) => {
            ctx.state().ensure_async_allowed(name)?;
            log::debug!("{name}(): asynchronous function reached");
            YieldOnce::default().await;
            f(&function_ctx).await
        }
    }
}

async fn evaluate_arguments(
    name: &str,
    metadata: &FunctionMetadata,
    args: &[ExpressionNode],
    input: &Collection,
    ctx: &EvaluationContext,
) -> Result<Vec<FunctionArgument>> {
    let mut evaluated = Vec::with_capacity(args.len());
    for (parameter, arg) in metadata.parameters.iter().zip(args) {
        let argument = match parameter.kind {
            ParameterKind::Identifier => match arg {
                ExpressionNode::Identifier(identifier) => FunctionArgument::Name(identifier.clone()),
                other => return Err(not_an_identifier(name, parameter, other)),
            },
            ParameterKind::TypeSpecifier => match type_name(arg) {
                Some(text) => FunctionArgument::Type(TypeSpecifier::parse(&text)),
                None => return Err(not_an_identifier(name, parameter, arg)),
            },
            ParameterKind::Any => {
                let mut scoped = ctx.clone();
                FunctionArgument::Collection(evaluate_node(arg, input.clone(), &mut scoped).await?)
            }
            ParameterKind::AnyAtRoot => {
                let mut scoped = ctx.clone();
                let focus = scoped.this();
                FunctionArgument::Collection(evaluate_node(arg, focus, &mut scoped).await?)
            }
            ParameterKind::Integer | ParameterKind::Number | ParameterKind::Boolean | ParameterKind::String => {
                let mut scoped = ctx.clone();
                let value = evaluate_node(arg, input.clone(), &mut scoped).await?;
                typed_argument(name, parameter, &value)?
            }
        };
        evaluated.push(argument);
    }
    Ok(evaluated)
}

fn typed_argument(name: &str, parameter: &ParameterMetadata, value: &Collection) -> Result<FunctionArgument> {
    let item = value
        .singleton(&format!("{name}() argument '{}'", parameter.name))?
        .map(FhirPathValue::to_primitive);
    let accepted = match (&item, parameter.kind) {
        (None, _) => true,
        (Some(FhirPathValue::Integer(_)), ParameterKind::Integer | ParameterKind::Number) => true,
        (Some(FhirPathValue::Decimal(_)), ParameterKind::Number) => true,
        (Some(FhirPathValue::Boolean(_)), ParameterKind::Boolean) => true,
        (Some(FhirPathValue::String(_)), ParameterKind::String) => true,
        _ => false,
    };
    if !accepted {
        let got = item.as_ref().map(FhirPathValue::type_name).unwrap_or_default();
        return Err(FhirPathError::type_error(
            FP0051,
            format!("{name}() argument '{}' expects {:?}, got {got}", parameter.name, parameter.kind),
        ));
    }
    Ok(FunctionArgument::Value(item))
}

/// Dotted text of an identifier path used as a type name (`Patient`, `FHIR.Patient`)
fn type_name(node: &ExpressionNode) -> Option<String> {
    match node {
        ExpressionNode::Identifier(name) => Some(name.clone()),
        ExpressionNode::Invocation { object, invocation } => {
            Some(format!("{}.{}", type_name(object)?, type_name(invocation)?))
        }
        _ => None,
    }
}

fn not_an_identifier(name: &str, parameter: &ParameterMetadata, node: &ExpressionNode) -> FhirPathError {
    FhirPathError::type_error(
        FP0051,
        format!(
            "{name}() argument '{}' must be a name, got {}",
            parameter.name,
            node.kind()
        ),
    )
}
