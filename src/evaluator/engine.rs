//! FHIRPath evaluation engine
//!
//! [`FhirPathEngine`] owns what outlives a single call: configuration, the
//! built-in function registry, the schema model, the HTTP transport and the
//! resolution cache. Each `evaluate` call builds a fresh [`EvaluationState`].
//!
//! Evaluation is polled once synchronously. When it completes without
//! reaching an asynchronous function the result is [`EvaluationResult::Ready`];
//! otherwise the suspended evaluation is handed back as
//! [`EvaluationResult::Deferred`].

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

use super::config::{AsyncMode, EngineConfig, EvaluationOptions};
use super::context::{EvaluationContext, EvaluationState};
use super::evaluator::evaluate_node;
use super::result::EvaluationResult;
use crate::ast::{ExpressionNode, ParseNode};
use crate::core::trace::{callback_provider, log_provider};
use crate::core::{Collection, FhirPathValue, Model, Result, ValueNode};
use crate::registry::{FunctionRegistry, create_standard_registry};
use crate::terminology::{HttpTransport, ReqwestTransport, ResolutionCache};

/// FHIRPath evaluation engine
///
/// # Examples
///
/// ```rust
/// use fhirpath_engine::ast::builder::path;
/// use fhirpath_engine::evaluator::{EvaluationOptions, FhirPathEngine};
/// use indexmap::IndexMap;
/// use serde_json::json;
///
/// let engine = FhirPathEngine::new();
/// let patient = json!({"resourceType": "Patient", "name": [{"given": ["Ann"]}]});
/// let result = engine
///     .evaluate(&path("Patient.name.given"), patient, IndexMap::new(), EvaluationOptions::default())
///     .unwrap()
///     .ready()
///     .unwrap();
/// assert_eq!(result.len(), 1);
/// ```
#[derive(Clone)]
pub struct FhirPathEngine {
    config: EngineConfig,
    functions: Arc<FunctionRegistry>,
    model: Option<Arc<Model>>,
    transport: Arc<dyn HttpTransport>,
    cache: Arc<ResolutionCache>,
}

impl FhirPathEngine {
    /// Engine with the default configuration and no schema model
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            functions: Arc::new(create_standard_registry()),
            model: None,
            transport: Arc::new(ReqwestTransport::new(config.request_timeout())),
            cache: Arc::new(ResolutionCache::new(config.cache_ttl())),
            config,
        }
    }

    /// Replace the HTTP transport used for terminology and reference requests
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Schema model driving type resolution and choice types
    pub fn with_model(mut self, model: Model) -> Self {
        self.model = Some(Arc::new(model));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Built-in functions, for introspection
    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    pub fn model(&self) -> Option<&Arc<Model>> {
        self.model.as_ref()
    }

    /// Shared cache of external lookups
    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// Evaluate `expression` against `resource`
    ///
    /// `environment` supplies `%name` variables. Errors raised before the
    /// evaluation suspends are returned directly; later ones surface from the
    /// deferred future.
    pub fn evaluate(
        &self,
        expression: &ExpressionNode,
        resource: JsonValue,
        environment: IndexMap<String, Collection>,
        options: EvaluationOptions,
    ) -> Result<EvaluationResult> {
        self.run(Arc::new(expression.clone()), resource, environment, options)
    }

    /// Lower a parser tree and evaluate it
    pub fn evaluate_parse_tree(
        &self,
        tree: &ParseNode,
        resource: JsonValue,
        environment: IndexMap<String, Collection>,
        options: EvaluationOptions,
    ) -> Result<EvaluationResult> {
        let expression = ExpressionNode::try_from(tree)?;
        self.run(Arc::new(expression), resource, environment, options)
    }

    /// Lower a parser tree once for repeated evaluation
    pub fn compile(&self, tree: &ParseNode) -> Result<CompiledExpression> {
        Ok(CompiledExpression {
            expression: Arc::new(ExpressionNode::try_from(tree)?),
            engine: self.clone(),
        })
    }

    fn state(
        &self,
        resource: JsonValue,
        environment: IndexMap<String, Collection>,
        options: &EvaluationOptions,
    ) -> EvaluationState {
        let trace = match (&options.trace_fn, &options.trace_provider) {
            (Some(trace_fn), _) => callback_provider(Arc::clone(trace_fn)),
            (None, Some(provider)) => Arc::clone(provider),
            (None, None) => log_provider(),
        };
        let terminology_url = options
            .terminology_url
            .clone()
            .unwrap_or_else(|| self.config.default_terminology_url.clone());
        let input = Collection::single(FhirPathValue::Node(ValueNode::root(resource, self.model.clone())));

        let mut state = EvaluationState::new(
            self.model.clone(),
            environment,
            input,
            Arc::clone(&self.functions),
            trace,
            terminology_url,
            Arc::clone(&self.cache),
            Arc::clone(&self.transport),
            self.config.max_recursion_depth,
        );
        state.user_functions = options.user_invocation_table.clone();
        state.resolve_internal_types = options.resolve_internal_types;
        state.fhir_server_url = options.fhir_server_url.clone();
        state.async_mode = options.async_mode;
        state.cancellation = options.cancellation.clone();
        state
    }

    fn run(
        &self,
        expression: Arc<ExpressionNode>,
        resource: JsonValue,
        environment: IndexMap<String, Collection>,
        options: EvaluationOptions,
    ) -> Result<EvaluationResult> {
        if let Some(token) = &options.cancellation {
            token.check()?;
        }
        let state = Arc::new(self.state(resource, environment, &options));
        let resolve_internal_types = state.resolve_internal_types;

        let mut evaluation: BoxFuture<'static, Result<Collection>> = async move {
            let mut ctx = EvaluationContext::new(state);
            let input = ctx.this();
            let result = evaluate_node(&expression, input, &mut ctx).await?;
            Ok(if resolve_internal_types {
                result.into_iter().map(FhirPathValue::resolve_internal_type).collect()
            } else {
                result
            })
        }
        .boxed();

        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        match evaluation.poll_unpin(&mut cx) {
            Poll::Ready(Ok(result)) if options.async_mode == AsyncMode::Always => Ok(EvaluationResult::Deferred(
                futures::future::ready(Ok(result)).boxed(),
            )),
            Poll::Ready(Ok(result)) => Ok(EvaluationResult::Ready(result)),
            Poll::Ready(Err(e)) => Err(e),
            Poll::Pending => {
                log::debug!("evaluation suspended on an asynchronous function");
                Ok(EvaluationResult::Deferred(evaluation))
            }
        }
    }
}

impl Default for FhirPathEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A lowered expression bound to the engine that compiled it
#[derive(Clone)]
pub struct CompiledExpression {
    expression: Arc<ExpressionNode>,
    engine: FhirPathEngine,
}

impl CompiledExpression {
    pub fn expression(&self) -> &ExpressionNode {
        &self.expression
    }

    pub fn evaluate(
        &self,
        resource: JsonValue,
        environment: IndexMap<String, Collection>,
        options: EvaluationOptions,
    ) -> Result<EvaluationResult> {
        self.engine
            .run(Arc::clone(&self.expression), resource, environment, options)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::ast::builder::*;
    use crate::core::FhirPathError;
    use crate::evaluator::CancellationToken;
    use crate::registry::{FunctionCategory, FunctionContext};
    use crate::register_function;

    fn echo<'a>(ctx: &'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> {
        async move { Ok(ctx.input.clone()) }.boxed()
    }

    fn user_table() -> Arc<FunctionRegistry> {
        let table = FunctionRegistry::new();
        register_function!(
            &table,
            async "echo",
            category: FunctionCategory::Utility,
            description: "Returns its input asynchronously",
            parameters: [],
            optional: [],
            return_type: "Collection",
            examples: ["1.echo()"],
            implementation: echo
        )
        .unwrap();
        Arc::new(table)
    }

    fn ready(result: Result<EvaluationResult>) -> Collection {
        result.unwrap().ready().expect("synchronous result")
    }

    #[test]
    fn test_synchronous_evaluation_is_ready() {
        let engine = FhirPathEngine::new();
        let patient = json!({"resourceType": "Patient", "birthDate": "1980-02-03"});
        let result = ready(engine.evaluate(
            &path("Patient.birthDate"),
            patient,
            IndexMap::new(),
            EvaluationOptions::default(),
        ));
        assert_eq!(result.len(), 1);
        assert_eq!(result.first().and_then(FhirPathValue::as_str).as_deref(), Some("1980-02-03"));
    }

    #[test]
    fn test_internal_types_kept_on_request() {
        let engine = FhirPathEngine::new();
        let options = EvaluationOptions::default().with_resolve_internal_types(false);
        let result = ready(engine.evaluate(&temporal("@2020-01-01"), json!({}), IndexMap::new(), options));
        assert!(matches!(result.first(), Some(FhirPathValue::Date(_))));

        let rendered = ready(engine.evaluate(
            &temporal("@2020-01-01"),
            json!({}),
            IndexMap::new(),
            EvaluationOptions::default(),
        ));
        assert!(matches!(rendered.first(), Some(FhirPathValue::String(s)) if s == "2020-01-01"));
    }

    #[test]
    fn test_environment_variables() {
        let engine = FhirPathEngine::new();
        let mut environment = IndexMap::new();
        environment.insert("limit".to_string(), Collection::single(FhirPathValue::Integer(3)));
        let result = ready(engine.evaluate(
            &var("limit"),
            json!({}),
            environment,
            EvaluationOptions::default(),
        ));
        assert!(matches!(result.first(), Some(FhirPathValue::Integer(3))));
    }

    #[test]
    fn test_cancelled_token_fails_before_work() {
        let engine = FhirPathEngine::new();
        let token = CancellationToken::new();
        token.cancel();
        let options = EvaluationOptions::default().with_cancellation(token);
        let err = engine
            .evaluate(&integer(1), json!({}), IndexMap::new(), options)
            .unwrap_err();
        assert!(err.is_cancellation());
    }

    #[test]
    fn test_async_function_needs_async_mode() {
        let engine = FhirPathEngine::new();
        let options = EvaluationOptions::default().with_user_invocation_table(user_table());
        let err = engine
            .evaluate(&integer(1).call("echo", vec![]), json!({}), IndexMap::new(), options)
            .unwrap_err();
        assert!(matches!(err, FhirPathError::AsyncNotAllowed { .. }));
    }

    #[tokio::test]
    async fn test_async_function_defers_the_result() {
        let engine = FhirPathEngine::new();
        let options = EvaluationOptions::default()
            .with_user_invocation_table(user_table())
            .with_async_mode(AsyncMode::Allowed);
        let result = engine
            .evaluate(&integer(7).call("echo", vec![]), json!({}), IndexMap::new(), options)
            .unwrap();
        assert!(result.is_deferred());
        let collection = result.into_future().await.unwrap();
        assert!(matches!(collection.first(), Some(FhirPathValue::Integer(7))));
    }

    #[tokio::test]
    async fn test_always_mode_defers_synchronous_results() {
        let engine = FhirPathEngine::new();
        let options = EvaluationOptions::default().with_async_mode(AsyncMode::Always);
        let result = engine
            .evaluate(&integer(1), json!({}), IndexMap::new(), options)
            .unwrap();
        assert!(result.is_deferred());
        assert_eq!(result.into_future().await.unwrap().len(), 1);
    }

    #[test]
    fn test_compiled_expression_is_reusable() {
        let tree = ParseNode::new("EntireExpression").with_child(
            ParseNode::new("TermExpression").with_child(
                ParseNode::new("InvocationTerm").with_child(
                    ParseNode::new("MemberInvocation")
                        .with_child(ParseNode::new("Identifier").with_text("id")),
                ),
            ),
        );
        let engine = FhirPathEngine::new();
        let compiled = engine.compile(&tree).unwrap();
        for id in ["a", "b"] {
            let result = ready(compiled.evaluate(
                json!({"resourceType": "Patient", "id": id}),
                IndexMap::new(),
                EvaluationOptions::default(),
            ));
            assert!(matches!(result.first(), Some(value) if value.as_str().as_deref() == Some(id)));
        }
    }
}
