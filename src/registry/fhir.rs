//! FHIR-specific function registrations
//!
//! `resolve()`, `memberOf()`, `weight()` and `ordinal()` may reach the network
//! and are registered as asynchronous functions. They are best effort: a
//! failed lookup is logged and contributes nothing to the result.

use std::str::FromStr;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use super::{FunctionCategory, FunctionContext, FunctionRegistry, ParameterKind};
use crate::core::value::decimal_from_json;
use crate::core::{Collection, FhirPathValue, Result, ValueNode};
use crate::evaluator::{EvaluationState, Navigator};
use crate::register_function;
use crate::terminology::terminologies::boolean_parameter;
use crate::terminology::{CacheKey, Coded, Method, Target, TerminologyRequest, Terminologies};

const ORDINAL_VALUE_EXTENSION: &str = "http://hl7.org/fhir/StructureDefinition/ordinalValue";
const ITEM_WEIGHT_EXTENSION: &str = "http://hl7.org/fhir/StructureDefinition/itemWeight";
const ITEM_WEIGHT_PROPERTY: &str = "itemWeight";

fn text<'v>(value: &'v JsonValue, key: &str) -> Option<&'v str> {
    value.get(key).and_then(JsonValue::as_str)
}

fn wrap_resource(state: &EvaluationState, resource: JsonValue) -> FhirPathValue {
    FhirPathValue::Node(ValueNode::root(resource, state.model().cloned()))
}

// ---------------- resolve() ----------------

/// Reference text of a Reference element, a canonical or a plain string
fn reference_text(value: &FhirPathValue) -> Option<String> {
    match value {
        FhirPathValue::String(s) => Some(s.clone()),
        FhirPathValue::Node(node) => match node.data() {
            JsonValue::String(s) => Some(s.clone()),
            data => text(data, "reference").map(str::to_string),
        },
        _ => None,
    }
}

/// `#id` against the `contained` list of every enclosing resource, innermost first
fn find_contained(item: &FhirPathValue, state: &EvaluationState, id: &str) -> Option<JsonValue> {
    let mut containers: Vec<JsonValue> = Vec::new();
    if let FhirPathValue::Node(node) = item {
        let mut current = Some(Arc::clone(node));
        while let Some(node) = current {
            if node.resource_type().is_some() {
                containers.push(node.data().clone());
            }
            current = node.parent().cloned();
        }
    }
    containers.extend(state.resource.iter().filter_map(|r| r.as_node()).map(|n| n.data().clone()));

    for container in containers {
        if id.is_empty() {
            return Some(container);
        }
        let found = container
            .get("contained")
            .and_then(JsonValue::as_array)
            .and_then(|contained| contained.iter().find(|r| text(r, "id") == Some(id)));
        if let Some(found) = found {
            return Some(found.clone());
        }
    }
    None
}

/// Match against Bundle entries by `fullUrl` or `Type/id`
fn find_in_bundle(state: &EvaluationState, reference: &str) -> Option<JsonValue> {
    let bundles = state.root_resource.iter().chain(state.resource.iter());
    for bundle in bundles.filter_map(FhirPathValue::as_node) {
        let Some(entries) = bundle.data().get("entry").and_then(JsonValue::as_array) else {
            continue;
        };
        for entry in entries {
            let Some(resource) = entry.get("resource") else {
                continue;
            };
            let full_url = text(entry, "fullUrl");
            let relative = match (text(resource, "resourceType"), text(resource, "id")) {
                (Some(rt), Some(id)) => Some(format!("{rt}/{id}")),
                _ => None,
            };
            if full_url == Some(reference) || relative.as_deref() == Some(reference) {
                return Some(resource.clone());
            }
        }
    }
    None
}

/// Request fetching `reference` from the FHIR server
///
/// Canonical references to resource types supporting the `url` search
/// parameter become a search; everything else is a direct read.
fn server_request(state: &EvaluationState, server: &str, reference: &str) -> Option<(TerminologyRequest, bool)> {
    let server = server.trim_end_matches('/');
    let get = |url: String| TerminologyRequest {
        method: Method::Get,
        url,
        body: None,
    };
    if !reference.contains("://") {
        return Some((get(format!("{server}/{reference}")), false));
    }
    let (canonical, version) = match reference.split_once('|') {
        Some((canonical, version)) => (canonical, Some(version)),
        None => (reference, None),
    };
    let resource_type = canonical.rsplit('/').nth(1)?;
    let searchable = state.model().is_some_and(|m| m.has_url_param(resource_type));
    if searchable {
        let mut url = url::Url::parse(&format!("{server}/{resource_type}")).ok()?;
        url.query_pairs_mut().append_pair("url", canonical);
        if let Some(version) = version {
            url.query_pairs_mut().append_pair("version", version);
        }
        return Some((get(url.to_string()), true));
    }
    Some((get(reference.to_string()), false))
}

async fn fetch_reference(state: &EvaluationState, reference: &str) -> Result<Option<JsonValue>> {
    let Some(server) = state.fhir_server_url.as_deref() else {
        return Ok(None);
    };
    let Some((request, is_search)) = server_request(state, server, reference) else {
        return Ok(None);
    };
    let key = CacheKey::new(state.model_version(), request.url.clone()).with_identity(reference);
    log::debug!("resolve(): fetching {}", request.url);
    match state.fetch(key, request).await {
        Ok(resource) if is_search => Ok(resource
            .get("entry")
            .and_then(JsonValue::as_array)
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get("resource"))
            .cloned()),
        Ok(resource) => Ok(Some(resource)),
        Err(e) if e.is_cancellation() => Err(e),
        Err(e) => {
            log::warn!("resolve(): could not fetch '{reference}': {e}");
            Ok(None)
        }
    }
}

async fn resolve_one(item: &FhirPathValue, state: &EvaluationState) -> Result<Option<JsonValue>> {
    let Some(reference) = reference_text(item) else {
        return Ok(None);
    };
    if let Some(id) = reference.strip_prefix('#') {
        return Ok(find_contained(item, state, id));
    }
    match find_in_bundle(state, &reference) {
        Some(resource) => Ok(Some(resource)),
        None => fetch_reference(state, &reference).await,
    }
}

fn resolve_references<'a>(ctx: &'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> {
    async move {
        let state = Arc::clone(ctx.context.state());
        // All lookups are in flight together; join_all keeps input order.
        let found = join_all(ctx.input.iter().map(|item| resolve_one(item, &state))).await;
        let mut resolved = Collection::empty();
        for resource in found {
            if let Some(resource) = resource? {
                resolved.push(wrap_resource(&state, resource));
            }
        }
        Ok(resolved)
    }
    .boxed()
}

// ---------------- memberOf() ----------------

fn member_of<'a>(ctx: &'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> {
    async move {
        let (Some(item), Some(value_set)) = (ctx.input.singleton("memberOf()")?, ctx.arg_string(0)) else {
            return Ok(Collection::empty());
        };
        let Some(coded) = Coded::from_value(&item.to_primitive()) else {
            return Ok(Collection::empty());
        };
        let state = Arc::clone(ctx.context.state());
        let terminologies = Terminologies::new(state.terminology_url.clone(), state.is_r5_or_later());
        let request = match terminologies.validate_vs(&Target::Url(value_set.clone()), &coded, None) {
            Ok(request) => request,
            Err(e) => {
                log::warn!("memberOf(): {e}");
                return Ok(Collection::empty());
            }
        };
        let (system, code) = coded.system_and_code();
        let key = state.cache_key(&request).with_identity(value_set.as_str()).with_code(system, code);
        match state.fetch(key, request).await {
            Ok(response) => Ok(Collection::from(
                boolean_parameter(&response, "result").map(FhirPathValue::Boolean),
            )),
            Err(e) if e.is_cancellation() => Err(e),
            Err(e) => {
                log::warn!("memberOf('{value_set}') failed: {e}");
                Ok(Collection::empty())
            }
        }
    }
    .boxed()
}

// ---------------- weight() / ordinal() ----------------

struct ScoreSource {
    extensions: Vec<String>,
    property: String,
}

impl ScoreSource {
    fn for_state(state: &EvaluationState) -> Self {
        let r5 = state.is_r5_or_later();
        let configured = state.model().and_then(|m| m.score.clone()).unwrap_or_default();
        let extensions = if configured.extension_uri.is_empty() {
            let default = if r5 { ITEM_WEIGHT_EXTENSION } else { ORDINAL_VALUE_EXTENSION };
            vec![default.to_string()]
        } else {
            configured.extension_uri
        };
        Self {
            extensions,
            property: configured
                .property_uri
                .unwrap_or_else(|| ITEM_WEIGHT_PROPERTY.to_string()),
        }
    }

    /// Score held in one of the configured extensions of `element`
    fn from_extensions(&self, element: &JsonValue) -> Option<Decimal> {
        element
            .get("extension")?
            .as_array()?
            .iter()
            .filter(|ext| text(ext, "url").is_some_and(|url| self.extensions.iter().any(|e| e == url)))
            .find_map(number_value)
    }
}

fn number_value(holder: &JsonValue) -> Option<Decimal> {
    ["valueDecimal", "valueInteger"]
        .iter()
        .find_map(|key| holder.get(*key))
        .and_then(|v| match v {
            JsonValue::Number(n) => decimal_from_json(n),
            JsonValue::String(s) => Decimal::from_str(s).ok(),
            _ => None,
        })
}

/// The coding an input item stands for: a Coding itself, or the Coding around a `code`
fn coding_of(item: &FhirPathValue) -> Option<JsonValue> {
    let node = item.as_node()?;
    match node.data() {
        JsonValue::Object(map) if map.contains_key("code") => Some(node.data().clone()),
        JsonValue::String(_) => node
            .parent()
            .filter(|parent| parent.data().get("code").is_some())
            .map(|parent| parent.data().clone()),
        _ => None,
    }
}

fn same_coding(a: &JsonValue, b: &JsonValue) -> bool {
    text(a, "code") == text(b, "code") && (text(a, "system").is_none() || text(a, "system") == text(b, "system"))
}

/// Score attached to a matching answer option or value set concept anywhere in `questionnaire`
fn questionnaire_score(source: &ScoreSource, questionnaire: &JsonValue, coding: &JsonValue) -> Option<Decimal> {
    match questionnaire {
        JsonValue::Object(map) => {
            if let Some(option) = map.get("valueCoding").filter(|option| same_coding(coding, option)) {
                if let Some(score) = source.from_extensions(questionnaire).or_else(|| source.from_extensions(option)) {
                    return Some(score);
                }
            }
            if map.contains_key("code") && text(questionnaire, "code") == text(coding, "code") {
                if let Some(score) = source.from_extensions(questionnaire) {
                    return Some(score);
                }
            }
            map.values().find_map(|child| questionnaire_score(source, child, coding))
        }
        JsonValue::Array(items) => items.iter().find_map(|child| questionnaire_score(source, child, coding)),
        _ => None,
    }
}

/// Score property value out of a `$lookup` response
fn lookup_score(response: &JsonValue, property: &str) -> Option<Decimal> {
    response
        .get("parameter")?
        .as_array()?
        .iter()
        .filter(|p| text(p, "name") == Some("property"))
        .filter_map(|p| p.get("part").and_then(JsonValue::as_array))
        .find(|parts| {
            parts
                .iter()
                .any(|part| text(part, "name") == Some("code") && text(part, "valueCode") == Some(property))
        })
        .and_then(|parts| {
            parts
                .iter()
                .find(|part| text(part, "name") == Some("value"))
                .and_then(number_value)
        })
}

async fn terminology_score(
    state: &EvaluationState,
    source: &ScoreSource,
    coding: &JsonValue,
) -> Result<Option<Decimal>> {
    if text(coding, "system").is_none() {
        return Ok(None);
    }
    let terminologies = Terminologies::new(state.terminology_url.clone(), state.is_r5_or_later());
    let params = format!("property={}", source.property);
    let Ok(request) = terminologies.lookup(&Coded::Coding(coding.clone()), Some(&params)) else {
        return Ok(None);
    };
    let key = state
        .cache_key(&request)
        .with_code(text(coding, "system").unwrap_or_default(), text(coding, "code").unwrap_or_default());
    match state.fetch(key, request).await {
        Ok(response) => Ok(lookup_score(&response, &source.property)),
        Err(e) if e.is_cancellation() => Err(e),
        Err(e) => {
            log::warn!("weight(): $lookup failed: {e}");
            Ok(None)
        }
    }
}

/// Score of one input item, reaching the terminology server only as a last resort
async fn item_score(
    item: &FhirPathValue,
    state: &EvaluationState,
    source: &ScoreSource,
    questionnaire: Option<&JsonValue>,
) -> Result<Option<Decimal>> {
    let Some(coding) = coding_of(item) else {
        return Ok(None);
    };
    let local = source
        .from_extensions(&coding)
        .or_else(|| questionnaire.and_then(|q| questionnaire_score(source, q, &coding)))
        .or_else(|| {
            let contained = item
                .as_node()
                .and_then(|n| n.enclosing_resource())
                .and_then(|r| r.data().get("contained").cloned())?;
            questionnaire_score(source, &contained, &coding)
        });
    if local.is_some() {
        return Ok(local);
    }
    if let Some(token) = &state.cancellation {
        token.check()?;
    }
    terminology_score(state, source, &coding).await
}

fn weights<'a>(ctx: &'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> {
    async move {
        let state = Arc::clone(ctx.context.state());
        let source = ScoreSource::for_state(&state);
        let questionnaire = ctx
            .context
            .variable("questionnaire")
            .ok()
            .and_then(|q| q.first().and_then(FhirPathValue::as_node).map(|n| n.data().clone()));

        let lookups = ctx
            .input
            .iter()
            .map(|item| item_score(item, &state, &source, questionnaire.as_ref()));
        let mut scores = Collection::empty();
        for score in join_all(lookups).await {
            if let Some(score) = score? {
                scores.push(FhirPathValue::Decimal(score));
            }
        }
        Ok(scores)
    }
    .boxed()
}

// ---------------- extension(), hasValue(), getValue() ----------------

impl FunctionRegistry {
    /// Register FHIR-specific functions (extensions, primitive values, references, scores)
    pub fn register_fhir_functions(&self) -> Result<()> {
        register_function!(
            self,
            sync "extension",
            category: FunctionCategory::Fhir,
            description: "Extensions of the input with the given URL",
            parameters: ["url": ParameterKind::String => "Extension URL to filter by"],
            return_type: "Collection",
            examples: ["Patient.extension('http://hl7.org/fhir/StructureDefinition/patient-nationality')"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let Some(url) = ctx.arg_string(0) else {
                    return Ok(Collection::empty());
                };
                let extensions = Navigator::new(ctx.model()).navigate(ctx.input, "extension");
                Ok(extensions
                    .into_iter()
                    .filter(|ext| ext.as_node().is_some_and(|n| text(n.data(), "url") == Some(url.as_str())))
                    .collect())
            }
        )?;

        register_function!(
            self,
            sync "hasValue",
            category: FunctionCategory::Fhir,
            description: "Returns true if the input is a single primitive carrying a value",
            parameters: [],
            return_type: "Boolean",
            examples: ["Patient.birthDate.hasValue()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                let has_value = ctx.input.len() == 1
                    && match &ctx.input[0] {
                        FhirPathValue::Node(node) => node.has_primitive_value(),
                        _ => true,
                    };
                Ok(Collection::single(FhirPathValue::Boolean(has_value)))
            }
        )?;

        register_function!(
            self,
            sync "getValue",
            category: FunctionCategory::Fhir,
            description: "The System value of a single primitive, empty otherwise",
            parameters: [],
            return_type: "Any",
            examples: ["Patient.birthDate.getValue()"],
            implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                if ctx.input.len() != 1 {
                    return Ok(Collection::empty());
                }
                Ok(match &ctx.input[0] {
                    FhirPathValue::Node(node) if !node.has_primitive_value() => Collection::empty(),
                    item => Collection::single(item.to_primitive()),
                })
            }
        )?;

        register_function!(
            self,
            async "resolve",
            category: FunctionCategory::Fhir,
            description: "Resolves references to contained resources, Bundle entries or resources on the FHIR server",
            parameters: [],
            optional: [],
            return_type: "Resource",
            examples: ["Observation.subject.resolve()"],
            implementation: resolve_references
        )?;

        register_function!(
            self,
            async "memberOf",
            category: FunctionCategory::Fhir,
            description: "Whether the input code, Coding or CodeableConcept is in the value set",
            parameters: ["valueSet": ParameterKind::String => "Value set URL"],
            optional: [],
            return_type: "Boolean",
            examples: ["Observation.code.memberOf('http://hl7.org/fhir/ValueSet/observation-vitalsignresult')"],
            implementation: member_of
        )?;

        register_function!(
            self,
            async "weight",
            category: FunctionCategory::Fhir,
            description: "Scores of the input codings from extensions, the questionnaire or the terminology server",
            parameters: [],
            optional: [],
            return_type: "Decimal",
            examples: ["QuestionnaireResponse.item.answer.value.weight()"],
            implementation: weights
        )?;

        register_function!(
            self,
            async "ordinal",
            category: FunctionCategory::Fhir,
            description: "Alias of weight()",
            parameters: [],
            optional: [],
            return_type: "Decimal",
            examples: ["QuestionnaireResponse.item.answer.value.ordinal()"],
            implementation: weights
        )?;

        Ok(())
    }
}
