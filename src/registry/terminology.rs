//! `%terminologies` functions
//!
//! These are called on the `%terminologies` handle, e.g.
//! `%terminologies.expand('http://hl7.org/fhir/ValueSet/administrative-gender')`.
//! Unlike `memberOf()`, any failure to reach the server or a non-success
//! response fails the evaluation.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::{FunctionCategory, FunctionContext, FunctionRegistry, ParameterKind};
use crate::core::error_code::{FP0051, FP0053, FP0201};
use crate::core::{Collection, FhirPathError, FhirPathValue, Result, ValueNode};
use crate::register_function;
use crate::terminology::{Coded, Target, TerminologyRequest, Terminologies};

/// Checks the input is `%terminologies` and returns the request builder
fn terminologies(ctx: &FunctionContext<'_>) -> Result<Terminologies> {
    match ctx.input.singleton(&format!("{}()", ctx.name))? {
        Some(FhirPathValue::Terminologies) => {}
        _ => {
            return Err(FhirPathError::type_error(
                FP0051,
                format!("{}() can only be invoked on %terminologies", ctx.name),
            ));
        }
    }
    let state = ctx.context.state();
    if state.terminology_url.is_empty() {
        return Err(FhirPathError::external(
            FP0201,
            format!("{}() needs a terminology server URL", ctx.name),
            None,
        ));
    }
    Ok(Terminologies::new(state.terminology_url.clone(), state.is_r5_or_later()))
}

fn single_argument<'a>(ctx: &FunctionContext<'a>, index: usize, what: &str) -> Result<Option<FhirPathValue>> {
    let argument = ctx.arg_collection(index);
    Ok(argument
        .singleton(&format!("{}() {what}", ctx.name))?
        .map(FhirPathValue::to_primitive))
}

fn target_argument(ctx: &FunctionContext<'_>, index: usize) -> Result<Option<Target>> {
    Ok(match single_argument(ctx, index, "target")? {
        Some(value) => Some(Target::from_value(&value).ok_or_else(|| {
            FhirPathError::type_error(FP0053, format!("{}() expects a URL or a resource", ctx.name))
        })?),
        None => None,
    })
}

fn coded_argument(ctx: &FunctionContext<'_>, index: usize) -> Result<Option<Coded>> {
    Ok(match single_argument(ctx, index, "coded value")? {
        Some(value) => Some(Coded::from_value(&value).ok_or_else(|| {
            FhirPathError::type_error(
                FP0053,
                format!("{}() expects a code, Coding or CodeableConcept", ctx.name),
            )
        })?),
        None => None,
    })
}

/// Send `request` through the cache and wrap the response as a document node
async fn send(ctx: &FunctionContext<'_>, request: TerminologyRequest) -> Result<Collection> {
    let state = Arc::clone(ctx.context.state());
    let key = state.cache_key(&request);
    log::debug!("{}(): {:?} {}", ctx.name, request.method, request.url);
    let response = state.fetch(key, request).await?;
    Ok(Collection::single(FhirPathValue::Node(ValueNode::root(
        response,
        state.model().cloned(),
    ))))
}

fn expand<'a>(ctx: &'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> {
    async move {
        let tx = terminologies(ctx)?;
        let Some(value_set) = target_argument(ctx, 0)? else {
            return Ok(Collection::empty());
        };
        let request = tx.expand(&value_set, ctx.arg_string(1).as_deref())?;
        send(ctx, request).await
    }
    .boxed()
}

fn lookup<'a>(ctx: &'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> {
    async move {
        let tx = terminologies(ctx)?;
        let Some(coded) = coded_argument(ctx, 0)? else {
            return Ok(Collection::empty());
        };
        let request = tx.lookup(&coded, ctx.arg_string(1).as_deref())?;
        send(ctx, request).await
    }
    .boxed()
}

fn validate_vs<'a>(ctx: &'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> {
    async move {
        let tx = terminologies(ctx)?;
        let (Some(value_set), Some(coded)) = (target_argument(ctx, 0)?, coded_argument(ctx, 1)?) else {
            return Ok(Collection::empty());
        };
        let request = tx.validate_vs(&value_set, &coded, ctx.arg_string(2).as_deref())?;
        send(ctx, request).await
    }
    .boxed()
}

fn validate_cs<'a>(ctx: &'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> {
    async move {
        let tx = terminologies(ctx)?;
        let (Some(code_system), Some(coded)) = (target_argument(ctx, 0)?, coded_argument(ctx, 1)?) else {
            return Ok(Collection::empty());
        };
        let request = tx.validate_cs(&code_system, &coded, ctx.arg_string(2).as_deref())?;
        send(ctx, request).await
    }
    .boxed()
}

fn subsumes<'a>(ctx: &'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> {
    async move {
        let tx = terminologies(ctx)?;
        let system = ctx.arg_string(0).unwrap_or_default();
        let (Some(a), Some(b)) = (coded_argument(ctx, 1)?, coded_argument(ctx, 2)?) else {
            return Ok(Collection::empty());
        };
        let request = tx.subsumes(&system, &a, &b, ctx.arg_string(3).as_deref())?;
        send(ctx, request).await
    }
    .boxed()
}

fn translate<'a>(ctx: &'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> {
    async move {
        let tx = terminologies(ctx)?;
        let (Some(concept_map), Some(coded)) = (target_argument(ctx, 0)?, coded_argument(ctx, 1)?) else {
            return Ok(Collection::empty());
        };
        let request = tx.translate(&concept_map, &coded, ctx.arg_string(2).as_deref())?;
        send(ctx, request).await
    }
    .boxed()
}

impl FunctionRegistry {
    pub fn register_terminology_functions(&self) -> Result<()> {
        register_function!(
            self,
            async "expand",
            category: FunctionCategory::Terminology,
            description: "Expands a value set",
            parameters: ["valueSet": ParameterKind::AnyAtRoot => "Value set URL or resource"],
            optional: ["params": ParameterKind::String => "Extra operation parameters (name=value&...)"],
            return_type: "ValueSet",
            examples: ["%terminologies.expand('http://hl7.org/fhir/ValueSet/administrative-gender')"],
            implementation: expand
        )?;

        register_function!(
            self,
            async "lookup",
            category: FunctionCategory::Terminology,
            description: "Looks up the details of a Coding",
            parameters: ["coded": ParameterKind::AnyAtRoot => "Coding to look up"],
            optional: ["params": ParameterKind::String => "Extra operation parameters (name=value&...)"],
            return_type: "Parameters",
            examples: ["%terminologies.lookup(%resource.code.coding.first())"],
            implementation: lookup
        )?;

        register_function!(
            self,
            async "validateVS",
            category: FunctionCategory::Terminology,
            description: "Validates a code against a value set",
            parameters: [
                "valueSet": ParameterKind::AnyAtRoot => "Value set URL or resource",
                "coded": ParameterKind::AnyAtRoot => "Code, Coding or CodeableConcept"
            ],
            optional: ["params": ParameterKind::String => "Extra operation parameters (name=value&...)"],
            return_type: "Parameters",
            examples: ["%terminologies.validateVS('http://hl7.org/fhir/ValueSet/observation-status', 'final')"],
            implementation: validate_vs
        )?;

        register_function!(
            self,
            async "validateCS",
            category: FunctionCategory::Terminology,
            description: "Validates a code against a code system",
            parameters: [
                "codeSystem": ParameterKind::AnyAtRoot => "Code system URL or resource",
                "coded": ParameterKind::AnyAtRoot => "Code, Coding or CodeableConcept"
            ],
            optional: ["params": ParameterKind::String => "Extra operation parameters (name=value&...)"],
            return_type: "Parameters",
            examples: ["%terminologies.validateCS('http://loinc.org', %resource.code.coding.first())"],
            implementation: validate_cs
        )?;

        register_function!(
            self,
            async "subsumes",
            category: FunctionCategory::Terminology,
            description: "Tests the subsumption relationship between two codes or Codings",
            parameters: [
                "system": ParameterKind::String => "Code system URL",
                "codeA": ParameterKind::AnyAtRoot => "First code or Coding",
                "codeB": ParameterKind::AnyAtRoot => "Second code or Coding"
            ],
            optional: ["params": ParameterKind::String => "Extra operation parameters (name=value&...)"],
            return_type: "code",
            examples: ["%terminologies.subsumes(%sct, '235856003', '3738000')"],
            implementation: subsumes
        )?;

        register_function!(
            self,
            async "translate",
            category: FunctionCategory::Terminology,
            description: "Translates a code using a concept map",
            parameters: [
                "conceptMap": ParameterKind::AnyAtRoot => "Concept map URL or resource",
                "coded": ParameterKind::AnyAtRoot => "Code, Coding or CodeableConcept"
            ],
            optional: ["params": ParameterKind::String => "Extra operation parameters (name=value&...)"],
            return_type: "Parameters",
            examples: ["%terminologies.translate('http://hl7.org/fhir/ConceptMap/cm-address-use-v2', 'home')"],
            implementation: translate
        )?;

        Ok(())
    }
}
