//! Evaluation context for FHIRPath
//!
//! [`EvaluationState`] is created fresh for every top-level evaluation and
//! shared by all contexts derived from it. [`EvaluationContext`] is the cheap,
//! cloneable part threaded through the tree walk: the variable scope, the
//! lambda variables (`$this`, `$index`, `$total`) and the nesting depth.

use std::sync::Arc;

use chrono::Timelike;
use futures::FutureExt;
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use serde_json::Value as JsonValue;

use super::cancellation::{CancellationToken, run_cancellable};
use super::config::AsyncMode;
use crate::core::error_code::{FP0064, FP0066};
use crate::core::{
    Collection, FhirPathError, FhirPathValue, Model, PrecisionDate, PrecisionDateTime,
    PrecisionTime, Result, SharedTraceProvider, TemporalPrecision,
};
use crate::registry::FunctionRegistry;
use crate::terminology::{CacheKey, HttpTransport, Method, ResolutionCache, TerminologyRequest};

const UCUM_URL: &str = "http://unitsofmeasure.org";
const SNOMED_URL: &str = "http://snomed.info/sct";
const LOINC_URL: &str = "http://loinc.org";
const VALUE_SET_BASE: &str = "http://hl7.org/fhir/ValueSet/";
const EXTENSION_BASE: &str = "http://hl7.org/fhir/StructureDefinition/";

/// Names resolved by the engine itself
const BUILT_IN_VARIABLES: &[&str] = &[
    "context",
    "resource",
    "rootResource",
    "ucum",
    "sct",
    "loinc",
    "terminologies",
];

struct ScopeFrame {
    name: String,
    value: Collection,
    parent: Option<Arc<ScopeFrame>>,
}

/// Persistent chain of `defineVariable` bindings
///
/// Adding a binding returns a new scope sharing its tail with the old one, so
/// snapshots handed to independent branches never observe each other.
#[derive(Clone, Default)]
pub struct VariableScope {
    head: Option<Arc<ScopeFrame>>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Collection> {
        let mut current = self.head.as_deref();
        while let Some(frame) = current {
            if frame.name == name {
                return Some(&frame.value);
            }
            current = frame.parent.as_deref();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// New scope with `name` bound on top of this one
    pub fn with(&self, name: impl Into<String>, value: Collection) -> Self {
        Self {
            head: Some(Arc::new(ScopeFrame {
                name: name.into(),
                value,
                parent: self.head.clone(),
            })),
        }
    }
}

/// Per-evaluation state shared by every derived context
pub struct EvaluationState {
    pub model: Option<Arc<Model>>,
    pub environment: IndexMap<String, Collection>,
    /// `%context`: the evaluation's input
    pub context: Collection,
    pub resource: Collection,
    pub root_resource: Collection,
    pub functions: Arc<FunctionRegistry>,
    pub user_functions: Option<Arc<FunctionRegistry>>,
    pub trace: SharedTraceProvider,
    pub resolve_internal_types: bool,
    pub terminology_url: String,
    pub fhir_server_url: Option<String>,
    pub async_mode: AsyncMode,
    pub cancellation: Option<CancellationToken>,
    pub cache: Arc<ResolutionCache>,
    pub transport: Arc<dyn HttpTransport>,
    pub max_depth: usize,
    now: OnceCell<PrecisionDateTime>,
}

impl EvaluationState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: Option<Arc<Model>>,
        environment: IndexMap<String, Collection>,
        input: Collection,
        functions: Arc<FunctionRegistry>,
        trace: SharedTraceProvider,
        terminology_url: String,
        cache: Arc<ResolutionCache>,
        transport: Arc<dyn HttpTransport>,
        max_depth: usize,
    ) -> Self {
        Self {
            model,
            environment,
            resource: input.clone(),
            root_resource: input.clone(),
            context: input,
            functions,
            user_functions: None,
            trace,
            resolve_internal_types: true,
            terminology_url,
            fhir_server_url: None,
            async_mode: AsyncMode::Off,
            cancellation: None,
            cache,
            transport,
            max_depth,
            now: OnceCell::new(),
        }
    }

    pub fn model(&self) -> Option<&Arc<Model>> {
        self.model.as_ref()
    }

    pub fn model_version(&self) -> &str {
        self.model.as_ref().map_or("", |m| m.version.as_str())
    }

    pub fn is_r5_or_later(&self) -> bool {
        self.model.as_ref().is_some_and(|m| m.is_r5_or_later())
    }

    /// The evaluation's instant, fixed on first use
    pub fn now(&self) -> PrecisionDateTime {
        self.now
            .get_or_init(|| {
                let now = chrono::Local::now().fixed_offset();
                let millis = now.nanosecond() / 1_000_000 * 1_000_000;
                PrecisionDateTime::new(
                    now.with_nanosecond(millis).unwrap_or(now),
                    TemporalPrecision::Millisecond,
                )
            })
            .clone()
    }

    pub fn today(&self) -> PrecisionDate {
        self.now().date()
    }

    pub fn time_of_day(&self) -> PrecisionTime {
        PrecisionTime::new(self.now().datetime.time(), TemporalPrecision::Millisecond)
    }

    /// Gate in front of every asynchronous function
    pub fn ensure_async_allowed(&self, function: &str) -> Result<()> {
        if self.async_mode == AsyncMode::Off {
            return Err(FhirPathError::async_not_allowed(function));
        }
        match &self.cancellation {
            Some(token) => token.check(),
            None => Ok(()),
        }
    }

    /// Issue `request` through the resolution cache
    pub async fn fetch(&self, key: CacheKey, request: TerminologyRequest) -> Result<JsonValue> {
        let transport = Arc::clone(&self.transport);
        let lookup = self.cache.get_or_fetch(key, move || {
            async move {
                match request.method {
                    Method::Get => transport.get(&request.url).await,
                    Method::Post => {
                        let body = request.body.unwrap_or(JsonValue::Null);
                        transport.post(&request.url, &body).await
                    }
                }
            }
            .boxed()
        });
        run_cancellable(self.cancellation.as_ref(), lookup).await
    }

    /// Cache key for a request against this evaluation's model
    pub fn cache_key(&self, request: &TerminologyRequest) -> CacheKey {
        CacheKey::new(self.model_version(), request.url.clone()).with_identity(request.identity())
    }

    fn built_in(&self, name: &str) -> Option<Collection> {
        let text = |s: String| Some(Collection::single(FhirPathValue::String(s)));
        match name {
            "context" => Some(self.context.clone()),
            "resource" => Some(self.resource.clone()),
            "rootResource" => Some(self.root_resource.clone()),
            "ucum" => text(UCUM_URL.to_string()),
            "sct" => text(SNOMED_URL.to_string()),
            "loinc" => text(LOINC_URL.to_string()),
            "terminologies" => Some(Collection::single(FhirPathValue::Terminologies)),
            _ => {
                if let Some(id) = name.strip_prefix("vs-") {
                    text(format!("{VALUE_SET_BASE}{id}"))
                } else if let Some(id) = name.strip_prefix("ext-") {
                    text(format!("{EXTENSION_BASE}{id}"))
                } else {
                    None
                }
            }
        }
    }
}

/// Per-node evaluation context
#[derive(Clone)]
pub struct EvaluationContext {
    state: Arc<EvaluationState>,
    scope: VariableScope,
    this: Option<Collection>,
    index: Option<i64>,
    total: Option<Collection>,
    depth: usize,
}

impl EvaluationContext {
    pub fn new(state: Arc<EvaluationState>) -> Self {
        Self {
            state,
            scope: VariableScope::new(),
            this: None,
            index: None,
            total: None,
            depth: 0,
        }
    }

    pub fn state(&self) -> &Arc<EvaluationState> {
        &self.state
    }

    pub fn model(&self) -> Option<&Arc<Model>> {
        self.state.model.as_ref()
    }

    /// `$this`; the evaluation input outside of lambdas
    pub fn this(&self) -> Collection {
        self.this
            .clone()
            .unwrap_or_else(|| self.state.context.clone())
    }

    pub fn index(&self) -> Option<i64> {
        self.index
    }

    pub fn total(&self) -> Option<&Collection> {
        self.total.as_ref()
    }

    /// Child context for one lambda iteration
    pub fn with_focus(&self, item: FhirPathValue, index: usize) -> Self {
        let mut child = self.clone();
        child.this = Some(Collection::single(item));
        child.index = i64::try_from(index).ok();
        child
    }

    pub fn with_total(mut self, total: Collection) -> Self {
        self.total = Some(total);
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Enter one level of nesting, failing beyond the configured limit
    pub fn descend(&mut self) -> Result<()> {
        if self.depth >= self.state.max_depth {
            return Err(FhirPathError::evaluation_error(
                FP0066,
                format!("Expression nesting exceeds the limit of {}", self.state.max_depth),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn is_defined(&self, name: &str) -> bool {
        self.scope.contains(name)
            || self.state.environment.contains_key(name)
            || BUILT_IN_VARIABLES.contains(&name)
            || name.starts_with("vs-")
            || name.starts_with("ext-")
    }

    /// Bind `name` for everything evaluated later in the same chain
    pub fn define_variable(&mut self, name: &str, value: Collection) -> Result<()> {
        if self.is_defined(name) {
            return Err(FhirPathError::evaluation_error(
                FP0064,
                format!("Variable %{name} already defined"),
            ));
        }
        self.scope = self.scope.with(name, value);
        Ok(())
    }

    /// Read `%name`: scope, then caller environment, then built-ins
    pub fn variable(&self, name: &str) -> Result<Collection> {
        if let Some(value) = self.scope.get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.state.environment.get(name) {
            return Ok(value.clone());
        }
        self.state
            .built_in(name)
            .ok_or_else(|| FhirPathError::undefined_variable(name))
    }

    pub fn trace(&self, name: &str, values: &Collection) {
        self.state.trace.trace(name, values);
    }
}
