//! Request shapes for the terminology operations behind `%terminologies`
//!
//! Each operation turns FHIRPath arguments into either a GET with query
//! parameters or a POST of a FHIR `Parameters` resource. Parameter names for
//! `$translate` differ between R4 and R5.

use serde_json::{Map, Value, json};
use url::Url;

use crate::core::error_code::{FP0053, FP0200};
use crate::core::{FhirPathError, FhirPathValue, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A fully built terminology request
#[derive(Debug, Clone, PartialEq)]
pub struct TerminologyRequest {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

impl TerminologyRequest {
    fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url: url.to_string(),
            body: None,
        }
    }

    fn post(url: Url, parameters: Vec<Value>) -> Self {
        Self {
            method: Method::Post,
            url: url.to_string(),
            body: Some(json!({"resourceType": "Parameters", "parameter": parameters})),
        }
    }

    /// Stable text identifying the request for cache keys
    pub fn identity(&self) -> String {
        match &self.body {
            Some(body) => format!("{} {}", self.url, body),
            None => self.url.clone(),
        }
    }
}

/// A coded argument in one of the shapes the operations accept
#[derive(Debug, Clone, PartialEq)]
pub enum Coded {
    Code(String),
    Coding(Value),
    CodeableConcept(Value),
}

impl Coded {
    /// Classify a FHIRPath value; `None` for anything that is not coded
    pub fn from_value(value: &FhirPathValue) -> Option<Self> {
        match value {
            FhirPathValue::String(code) => Some(Self::Code(code.clone())),
            FhirPathValue::Node(node) => match node.data() {
                Value::String(code) => Some(Self::Code(code.clone())),
                Value::Object(map) if map.contains_key("coding") => {
                    Some(Self::CodeableConcept(node.data().clone()))
                }
                Value::Object(map) if map.contains_key("code") => Some(Self::Coding(node.data().clone())),
                _ => None,
            },
            _ => None,
        }
    }

    /// `(system, code)` of a code or coding
    pub fn system_and_code(&self) -> (String, String) {
        match self {
            Self::Code(code) => (String::new(), code.clone()),
            Self::Coding(coding) => (
                text(coding, "system").unwrap_or_default(),
                text(coding, "code").unwrap_or_default(),
            ),
            Self::CodeableConcept(concept) => (String::new(), concept.to_string()),
        }
    }
}

/// Value-set or code-system argument: a canonical URL or an inline resource
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Url(String),
    Resource(Value),
}

impl Target {
    pub fn from_value(value: &FhirPathValue) -> Option<Self> {
        match value {
            FhirPathValue::String(url) => Some(Self::Url(url.clone())),
            FhirPathValue::Node(node) => match node.data() {
                Value::String(url) => Some(Self::Url(url.clone())),
                Value::Object(_) => Some(Self::Resource(node.data().clone())),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn identity(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::Resource(resource) => text(resource, "url")
                .or_else(|| text(resource, "id"))
                .unwrap_or_else(|| resource.to_string()),
        }
    }
}

fn text(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parameter(name: &str, kind: &str, value: Value) -> Value {
    let mut entry = Map::new();
    entry.insert("name".to_string(), Value::String(name.to_string()));
    entry.insert(kind.to_string(), value);
    Value::Object(entry)
}

/// Parse the `params` argument (`name=value&name=value`)
pub fn parse_extra_params(params: Option<&str>) -> Vec<(String, String)> {
    params
        .map(|p| {
            url::form_urlencoded::parse(p.trim_start_matches('?').as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect()
        })
        .unwrap_or_default()
}

/// Builder for terminology operation requests against one server
#[derive(Debug, Clone)]
pub struct Terminologies {
    base_url: String,
    r5: bool,
}

impl Terminologies {
    pub fn new(base_url: impl Into<String>, r5: bool) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            r5,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}/{path}", self.base_url)).map_err(|e| {
            FhirPathError::external(
                FP0200,
                format!("Invalid terminology server URL '{}': {e}", self.base_url),
                Some(self.base_url.clone()),
            )
        })
    }

    fn with_query(&self, path: &str, pairs: &[(&str, &str)], extra: &[(String, String)]) -> Result<Url> {
        let mut url = self.endpoint(path)?;
        {
            let mut query = url.query_pairs_mut();
            for (name, value) in pairs {
                if !value.is_empty() {
                    query.append_pair(name, value);
                }
            }
            for (name, value) in extra {
                query.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn extra_parameters(extra: &[(String, String)]) -> Vec<Value> {
        extra
            .iter()
            .map(|(name, value)| parameter(name, "valueString", Value::String(value.clone())))
            .collect()
    }

    fn coded_parameters(coded: &Coded, code_name: &str, coding_name: &str, concept_name: &str) -> Vec<Value> {
        match coded {
            Coded::Code(code) => vec![parameter(code_name, "valueCode", Value::String(code.clone()))],
            Coded::Coding(coding) => vec![parameter(coding_name, "valueCoding", coding.clone())],
            Coded::CodeableConcept(concept) => {
                vec![parameter(concept_name, "valueCodeableConcept", concept.clone())]
            }
        }
    }

    /// `ValueSet/$expand`
    pub fn expand(&self, value_set: &Target, params: Option<&str>) -> Result<TerminologyRequest> {
        let extra = parse_extra_params(params);
        match value_set {
            Target::Url(url) => Ok(TerminologyRequest::get(self.with_query(
                "ValueSet/$expand",
                &[("url", url)],
                &extra,
            )?)),
            Target::Resource(resource) => {
                let mut parameters = vec![json!({"name": "valueSet", "resource": resource})];
                parameters.extend(Self::extra_parameters(&extra));
                Ok(TerminologyRequest::post(self.endpoint("ValueSet/$expand")?, parameters))
            }
        }
    }

    /// `CodeSystem/$lookup`
    pub fn lookup(&self, coded: &Coded, params: Option<&str>) -> Result<TerminologyRequest> {
        let mut parameters = match coded {
            Coded::Coding(coding) => vec![parameter("coding", "valueCoding", coding.clone())],
            other => {
                return Err(FhirPathError::type_error(
                    FP0053,
                    format!("lookup() expects a Coding, got {other:?}"),
                ));
            }
        };
        parameters.extend(Self::extra_parameters(&parse_extra_params(params)));
        Ok(TerminologyRequest::post(self.endpoint("CodeSystem/$lookup")?, parameters))
    }

    /// `ValueSet/$validate-code`
    pub fn validate_vs(&self, value_set: &Target, coded: &Coded, params: Option<&str>) -> Result<TerminologyRequest> {
        self.validate("ValueSet/$validate-code", "valueSet", value_set, coded, params)
    }

    /// `CodeSystem/$validate-code`
    pub fn validate_cs(&self, code_system: &Target, coded: &Coded, params: Option<&str>) -> Result<TerminologyRequest> {
        self.validate("CodeSystem/$validate-code", "codeSystem", code_system, coded, params)
    }

    fn validate(
        &self,
        path: &str,
        resource_name: &str,
        target: &Target,
        coded: &Coded,
        params: Option<&str>,
    ) -> Result<TerminologyRequest> {
        let extra = parse_extra_params(params);
        match (target, coded) {
            (Target::Url(url), Coded::Code(code)) => Ok(TerminologyRequest::get(self.with_query(
                path,
                &[("url", url), ("code", code)],
                &extra,
            )?)),
            (Target::Url(url), Coded::Coding(coding)) => {
                let system = text(coding, "system").unwrap_or_default();
                let code = text(coding, "code").unwrap_or_default();
                let version = text(coding, "version").unwrap_or_default();
                Ok(TerminologyRequest::get(self.with_query(
                    path,
                    &[("url", url), ("code", &code), ("system", &system), ("systemVersion", &version)],
                    &extra,
                )?))
            }
            (target, coded) => {
                let mut parameters = match target {
                    Target::Url(url) => vec![parameter("url", "valueUri", Value::String(url.clone()))],
                    Target::Resource(resource) => vec![json!({"name": resource_name, "resource": resource})],
                };
                parameters.extend(Self::coded_parameters(coded, "code", "coding", "codeableConcept"));
                parameters.extend(Self::extra_parameters(&extra));
                Ok(TerminologyRequest::post(self.endpoint(path)?, parameters))
            }
        }
    }

    /// `CodeSystem/$subsumes`
    pub fn subsumes(
        &self,
        system: &str,
        code_a: &Coded,
        code_b: &Coded,
        params: Option<&str>,
    ) -> Result<TerminologyRequest> {
        let extra = parse_extra_params(params);
        match (code_a, code_b) {
            (Coded::Code(a), Coded::Code(b)) => Ok(TerminologyRequest::get(self.with_query(
                "CodeSystem/$subsumes",
                &[("system", system), ("codeA", a), ("codeB", b)],
                &extra,
            )?)),
            (Coded::Coding(a), Coded::Coding(b)) => {
                let mut parameters = vec![
                    parameter("codingA", "valueCoding", a.clone()),
                    parameter("codingB", "valueCoding", b.clone()),
                ];
                if !system.is_empty() {
                    parameters.push(parameter("system", "valueUri", Value::String(system.to_string())));
                }
                parameters.extend(Self::extra_parameters(&extra));
                Ok(TerminologyRequest::post(self.endpoint("CodeSystem/$subsumes")?, parameters))
            }
            _ => Err(FhirPathError::type_error(
                FP0053,
                "subsumes() expects two codes or two Codings",
            )),
        }
    }

    /// `ConceptMap/$translate`
    ///
    /// Translation is posted to the ConceptMap operation endpoint rather than
    /// `CodeSystem/$translate`, which servers do not define. R5 servers get the
    /// `source*`/`target*` parameter names.
    pub fn translate(&self, concept_map: &Target, coded: &Coded, params: Option<&str>) -> Result<TerminologyRequest> {
        let mut parameters = match concept_map {
            Target::Url(url) => vec![parameter("url", "valueUri", Value::String(url.clone()))],
            Target::Resource(resource) => vec![json!({"name": "conceptMap", "resource": resource})],
        };
        let (code, coding, concept) = if self.r5 {
            ("sourceCode", "sourceCoding", "sourceCodeableConcept")
        } else {
            ("code", "coding", "codeableConcept")
        };
        parameters.extend(Self::coded_parameters(coded, code, coding, concept));
        for (name, value) in parse_extra_params(params) {
            let name = match (self.r5, name.as_str()) {
                (true, "source") => "sourceScope".to_string(),
                (true, "target") => "targetScope".to_string(),
                (true, "system") => "sourceSystem".to_string(),
                _ => name,
            };
            parameters.push(parameter(&name, "valueString", Value::String(value)));
        }
        Ok(TerminologyRequest::post(self.endpoint("ConceptMap/$translate")?, parameters))
    }
}

/// `valueBoolean` of the named output parameter
pub fn boolean_parameter(parameters: &Value, name: &str) -> Option<bool> {
    parameters
        .get("parameter")?
        .as_array()?
        .iter()
        .find(|p| p.get("name").and_then(Value::as_str) == Some(name))?
        .get("valueBoolean")?
        .as_bool()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn coding() -> Coded {
        Coded::Coding(json!({"system": "http://loinc.org", "code": "8867-4"}))
    }

    #[test]
    fn test_expand_by_url_is_a_get() {
        let tx = Terminologies::new("https://tx.example.org/r4/", false);
        let request = tx
            .expand(&Target::Url("http://hl7.org/fhir/ValueSet/administrative-gender".into()), Some("count=5"))
            .unwrap();
        assert_eq!(request.method, Method::Get);
        assert_eq!(
            request.url,
            "https://tx.example.org/r4/ValueSet/$expand?url=http%3A%2F%2Fhl7.org%2Ffhir%2FValueSet%2Fadministrative-gender&count=5"
        );
    }

    #[test]
    fn test_validate_with_concept_posts_parameters() {
        let tx = Terminologies::new("https://tx.example.org/r4", false);
        let concept = Coded::CodeableConcept(json!({"coding": [{"code": "a"}]}));
        let request = tx.validate_vs(&Target::Url("http://vs".into()), &concept, None).unwrap();
        assert_eq!(request.method, Method::Post);
        let body = request.body.unwrap();
        assert_eq!(body["parameter"][0], json!({"name": "url", "valueUri": "http://vs"}));
        assert_eq!(body["parameter"][1]["name"], "codeableConcept");
    }

    #[test]
    fn test_translate_parameter_names_follow_version() {
        let map = Target::Url("http://cm".into());
        let r4 = Terminologies::new("https://tx", false).translate(&map, &coding(), Some("target=http://vs")).unwrap();
        let r5 = Terminologies::new("https://tx", true).translate(&map, &coding(), Some("target=http://vs")).unwrap();
        assert_eq!(r4.url, "https://tx/ConceptMap/$translate");
        assert_eq!(r4.body.as_ref().unwrap()["parameter"][1]["name"], "coding");
        assert_eq!(r4.body.as_ref().unwrap()["parameter"][2]["name"], "target");
        assert_eq!(r5.body.as_ref().unwrap()["parameter"][1]["name"], "sourceCoding");
        assert_eq!(r5.body.as_ref().unwrap()["parameter"][2]["name"], "targetScope");
    }

    #[test]
    fn test_boolean_parameter() {
        let response = json!({"resourceType": "Parameters", "parameter": [{"name": "result", "valueBoolean": true}]});
        assert_eq!(boolean_parameter(&response, "result"), Some(true));
        assert_eq!(boolean_parameter(&response, "message"), None);
    }
}
