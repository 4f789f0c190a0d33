//! Asynchronous functions against a scripted terminology server

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockTransport, SlowServer, booleans, init_logging, strings};
use fhirpath_engine::ast::builder::*;
use fhirpath_engine::core::error_code::FP0200;
use fhirpath_engine::{
    AsyncMode, CancellationToken, Collection, EvaluationOptions, ExpressionNode, FhirPathEngine, FhirPathError,
    FhirPathValue, HttpTransport, Result, ValueNode,
};
use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

const MARITAL_STATUS_VS: &str = "http://hl7.org/fhir/ValueSet/marital-status";

fn patient() -> Value {
    json!({
        "resourceType": "Patient",
        "id": "example",
        "maritalStatus": {
            "coding": [{"system": "http://terminology.hl7.org/CodeSystem/v3-MaritalStatus", "code": "M"}]
        }
    })
}

fn validate_code_response(result: bool) -> Value {
    json!({
        "resourceType": "Parameters",
        "parameter": [{"name": "result", "valueBoolean": result}]
    })
}

fn member_of() -> ExpressionNode {
    path("Patient.maritalStatus.coding").call("memberOf", vec![string(MARITAL_STATUS_VS)])
}

fn allowed() -> EvaluationOptions {
    EvaluationOptions::default().with_async_mode(AsyncMode::Allowed)
}

fn engine_with(transport: Arc<MockTransport>) -> FhirPathEngine {
    FhirPathEngine::new().with_transport(transport as Arc<dyn HttpTransport>)
}

async fn evaluate(
    engine: &FhirPathEngine,
    expr: &ExpressionNode,
    resource: Value,
    options: EvaluationOptions,
) -> Result<Collection> {
    init_logging();
    engine
        .evaluate(expr, resource, IndexMap::new(), options)?
        .into_future()
        .await
}

#[tokio::test]
async fn test_async_function_rejected_when_mode_is_off() {
    let transport = MockTransport::new(|_, _| Ok(validate_code_response(true)));
    let engine = engine_with(transport.clone());
    let err = engine
        .evaluate(&member_of(), patient(), IndexMap::new(), EvaluationOptions::default())
        .err()
        .expect("memberOf must not run synchronously");
    assert!(matches!(err, FhirPathError::AsyncNotAllowed { ref function } if function == "memberOf"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_terminologies_rejected_when_mode_is_off() {
    let engine = engine_with(MockTransport::failing());
    let expr = var("terminologies").call("expand", vec![string(MARITAL_STATUS_VS)]);
    let err = engine
        .evaluate(&expr, patient(), IndexMap::new(), EvaluationOptions::default())
        .err()
        .expect("expand must not run synchronously");
    assert!(matches!(err, FhirPathError::AsyncNotAllowed { ref function } if function == "expand"));
}

#[tokio::test]
async fn test_member_of_defers_and_reads_result_parameter() {
    let transport = MockTransport::new(|_, _| Ok(validate_code_response(true)));
    let engine = engine_with(transport.clone());

    let result = engine
        .evaluate(&member_of(), patient(), IndexMap::new(), allowed())
        .unwrap();
    assert!(result.is_deferred());
    let values = result.into_future().await.unwrap();

    assert_eq!(booleans(&values), vec![true]);
    let urls = transport.urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].contains("ValueSet/$validate-code"), "{}", urls[0]);
    assert!(urls[0].contains("code=M"), "{}", urls[0]);
}

#[tokio::test]
async fn test_member_of_answers_repeat_questions_from_cache() {
    let transport = MockTransport::new(|_, _| Ok(validate_code_response(false)));
    let engine = engine_with(transport.clone());

    for _ in 0..3 {
        let values = evaluate(&engine, &member_of(), patient(), allowed()).await.unwrap();
        assert_eq!(booleans(&values), vec![false]);
    }
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_member_of_failure_yields_empty() {
    let engine = engine_with(MockTransport::failing());
    let values = evaluate(&engine, &member_of(), patient(), allowed()).await.unwrap();
    assert!(values.is_empty());
}

#[tokio::test]
async fn test_weight_falls_back_to_code_system_lookup() {
    let transport = MockTransport::new(|url, body| {
        assert!(url.ends_with("CodeSystem/$lookup"), "{url}");
        assert!(body.is_some());
        Ok(json!({
            "resourceType": "Parameters",
            "parameter": [
                {"name": "display", "valueString": "Moderate"},
                {"name": "property", "part": [
                    {"name": "code", "valueCode": "itemWeight"},
                    {"name": "value", "valueDecimal": 2.5}
                ]}
            ]
        }))
    });
    let engine = engine_with(transport.clone());
    let observation = json!({
        "resourceType": "Observation",
        "code": {"coding": [{"system": "http://loinc.org", "code": "LA6569-3"}]}
    });
    let expr = path("Observation.code.coding").call("weight", vec![]);

    for _ in 0..2 {
        let values = evaluate(&engine, &expr, observation.clone(), allowed()).await.unwrap();
        assert!(
            matches!(values.first(), Some(FhirPathValue::Decimal(d)) if d.to_string() == "2.5"),
            "{values:?}"
        );
    }
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_weight_prefers_extension_on_the_coding() {
    let transport = MockTransport::new(|_, _| Ok(json!({})));
    let engine = engine_with(transport.clone());
    let observation = json!({
        "resourceType": "Observation",
        "code": {"coding": [{
            "system": "http://loinc.org",
            "code": "LA6569-3",
            "extension": [{"url": "http://hl7.org/fhir/StructureDefinition/ordinalValue", "valueDecimal": 4}]
        }]}
    });
    let expr = path("Observation.code.coding").call("ordinal", vec![]);
    let values = evaluate(&engine, &expr, observation, allowed()).await.unwrap();
    assert!(matches!(values.first(), Some(FhirPathValue::Decimal(d)) if d.to_string() == "4"));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_terminologies_expand_returns_the_expansion() {
    let transport = MockTransport::new(|url, _| {
        assert!(url.contains("ValueSet/$expand"), "{url}");
        Ok(json!({
            "resourceType": "ValueSet",
            "expansion": {"contains": [
                {"system": "http://hl7.org/fhir/administrative-gender", "code": "male"},
                {"system": "http://hl7.org/fhir/administrative-gender", "code": "female"}
            ]}
        }))
    });
    let engine = engine_with(transport);
    let expr = var("terminologies")
        .call(
            "expand",
            vec![string("http://hl7.org/fhir/ValueSet/administrative-gender")],
        )
        .member("expansion")
        .member("contains")
        .member("code");
    let codes = evaluate(&engine, &expr, patient(), allowed()).await.unwrap();
    assert_eq!(strings(&codes), vec!["male", "female"]);
}

#[tokio::test]
async fn test_terminologies_failure_fails_the_evaluation() {
    let engine = engine_with(MockTransport::failing());
    let expr = var("terminologies").call("expand", vec![string(MARITAL_STATUS_VS)]);
    let err = evaluate(&engine, &expr, patient(), allowed()).await.unwrap_err();
    assert_eq!(err.error_code(), FP0200);
}

#[tokio::test]
async fn test_resolve_contained_reference() {
    let transport = MockTransport::new(|_, _| Ok(json!({})));
    let engine = engine_with(transport.clone());
    let observation = json!({
        "resourceType": "Observation",
        "contained": [{"resourceType": "Patient", "id": "p1", "gender": "female"}],
        "subject": {"reference": "#p1"}
    });
    let expr = path("Observation.subject").call("resolve", vec![]).member("gender");
    let values = evaluate(&engine, &expr, observation, allowed()).await.unwrap();
    assert_eq!(strings(&values), vec!["female"]);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_cancelling_a_deferred_evaluation() {
    let transport = MockTransport::new(|_, _| Ok(validate_code_response(true)));
    let engine = engine_with(transport.clone());
    let token = CancellationToken::new();

    let result = engine
        .evaluate(
            &member_of(),
            patient(),
            IndexMap::new(),
            allowed().with_cancellation(token.clone()),
        )
        .unwrap();
    assert!(result.is_deferred());
    token.cancel();

    let err = result.into_future().await.unwrap_err();
    assert!(err.is_cancellation(), "{err}");
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_always_mode_defers_synchronous_results() {
    let engine = engine_with(MockTransport::failing());
    let options = EvaluationOptions::default().with_async_mode(AsyncMode::Always);
    let result = engine
        .evaluate(&path("Patient.id"), patient(), IndexMap::new(), options)
        .unwrap();
    assert!(result.is_deferred());
    assert_eq!(strings(&result.into_future().await.unwrap()), vec!["example"]);
}

#[tokio::test]
async fn test_resolve_bundle_entries_by_relative_and_full_url() {
    let transport = MockTransport::new(|_, _| Ok(json!({})));
    let engine = engine_with(transport.clone());
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [
            {
                "fullUrl": "http://example.org/fhir/Observation/o1",
                "resource": {"resourceType": "Observation", "id": "o1", "subject": {"reference": "Patient/p1"}}
            },
            {
                "fullUrl": "http://example.org/fhir/Observation/o2",
                "resource": {
                    "resourceType": "Observation",
                    "id": "o2",
                    "subject": {"reference": "http://example.org/fhir/Patient/p2"}
                }
            },
            {
                "fullUrl": "http://example.org/fhir/Patient/p1",
                "resource": {"resourceType": "Patient", "id": "p1", "gender": "female"}
            },
            {
                "fullUrl": "http://example.org/fhir/Patient/p2",
                "resource": {"resourceType": "Patient", "id": "p2", "gender": "male"}
            }
        ]
    });
    let expr = path("Bundle.entry.resource.subject").call("resolve", vec![]).member("gender");
    let values = evaluate(&engine, &expr, bundle, allowed()).await.unwrap();
    assert_eq!(strings(&values), vec!["female", "male"]);
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_resolve_reads_from_the_fhir_server() {
    let transport = MockTransport::new(|url, _| {
        assert_eq!(url, "https://fhir.example.org/Patient/42");
        Ok(json!({"resourceType": "Patient", "id": "42", "gender": "male"}))
    });
    let engine = engine_with(transport.clone());
    let observation = json!({"resourceType": "Observation", "subject": {"reference": "Patient/42"}});
    let expr = path("Observation.subject").call("resolve", vec![]).member("gender");
    let options = allowed().with_fhir_server_url("https://fhir.example.org/");
    let values = evaluate(&engine, &expr, observation, options).await.unwrap();
    assert_eq!(strings(&values), vec!["male"]);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_resolve_without_a_server_yields_empty() {
    let transport = MockTransport::new(|_, _| Ok(json!({})));
    let engine = engine_with(transport.clone());
    let observation = json!({"resourceType": "Observation", "subject": {"reference": "Patient/42"}});
    let expr = path("Observation.subject").call("resolve", vec![]);
    let values = evaluate(&engine, &expr, observation, allowed()).await.unwrap();
    assert!(values.is_empty());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_resolve_fetches_concurrently_in_input_order() {
    let server = SlowServer::new(Duration::from_millis(50));
    let engine = FhirPathEngine::new().with_transport(server.clone() as Arc<dyn HttpTransport>);
    let group = json!({
        "resourceType": "Group",
        "member": [
            {"entity": {"reference": "Patient/1"}},
            {"entity": {"reference": "Patient/2"}},
            {"entity": {"reference": "Patient/3"}}
        ]
    });
    let expr = path("Group.member.entity").call("resolve", vec![]).member("id");
    let options = allowed().with_fhir_server_url("https://fhir.example.org");
    let values = evaluate(&engine, &expr, group, options).await.unwrap();
    assert_eq!(strings(&values), vec!["1", "2", "3"]);
    assert!(server.max_in_flight() > 1, "max in flight: {}", server.max_in_flight());
}

#[tokio::test]
async fn test_weight_from_the_questionnaire_variable() {
    let transport = MockTransport::new(|_, _| Ok(json!({})));
    let engine = engine_with(transport.clone());
    let questionnaire = json!({
        "resourceType": "Questionnaire",
        "item": [{
            "linkId": "q1",
            "type": "choice",
            "answerOption": [
                {
                    "extension": [{"url": "http://hl7.org/fhir/StructureDefinition/ordinalValue", "valueDecimal": 1}],
                    "valueCoding": {"system": "http://loinc.org", "code": "LA6568-5"}
                },
                {
                    "extension": [{"url": "http://hl7.org/fhir/StructureDefinition/ordinalValue", "valueDecimal": 3}],
                    "valueCoding": {"system": "http://loinc.org", "code": "LA6570-1"}
                }
            ]
        }]
    });
    let response = json!({
        "resourceType": "QuestionnaireResponse",
        "item": [{
            "linkId": "q1",
            "answer": [{"valueCoding": {"system": "http://loinc.org", "code": "LA6570-1"}}]
        }]
    });
    let mut environment = IndexMap::new();
    environment.insert(
        "questionnaire".to_string(),
        Collection::single(FhirPathValue::Node(ValueNode::root(questionnaire, None))),
    );
    let expr = path("QuestionnaireResponse.item.answer.valueCoding").call("weight", vec![]);

    init_logging();
    let values = engine
        .evaluate(&expr, response, environment, allowed())
        .unwrap()
        .into_future()
        .await
        .unwrap();
    assert!(
        matches!(values.first(), Some(FhirPathValue::Decimal(d)) if d.to_string() == "3"),
        "{values:?}"
    );
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn test_terminologies_lookup_posts_the_coding() {
    let transport = MockTransport::new(|url, body| {
        assert!(url.ends_with("CodeSystem/$lookup"), "{url}");
        let body = body.expect("lookup is a POST");
        assert_eq!(
            body["parameter"][0],
            json!({"name": "coding", "valueCoding": {"system": "http://loinc.org", "code": "8867-4"}})
        );
        Ok(json!({
            "resourceType": "Parameters",
            "parameter": [{"name": "display", "valueString": "Heart rate"}]
        }))
    });
    let engine = engine_with(transport);
    let observation = json!({
        "resourceType": "Observation",
        "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}]}
    });
    let coding = var("resource").member("code").member("coding").call("first", vec![]);
    let expr = var("terminologies")
        .call("lookup", vec![coding])
        .member("parameter")
        .member("valueString");
    let values = evaluate(&engine, &expr, observation, allowed()).await.unwrap();
    assert_eq!(strings(&values), vec!["Heart rate"]);
}

#[tokio::test]
async fn test_terminologies_validate_vs_with_a_code() {
    let transport = MockTransport::new(|url, body| {
        assert!(url.contains("ValueSet/$validate-code?"), "{url}");
        assert!(url.contains("code=final"), "{url}");
        assert!(body.is_none());
        Ok(validate_code_response(true))
    });
    let engine = engine_with(transport.clone());
    let expr = var("terminologies")
        .call(
            "validateVS",
            vec![string("http://hl7.org/fhir/ValueSet/observation-status"), string("final")],
        )
        .member("parameter")
        .member("valueBoolean");
    let values = evaluate(&engine, &expr, patient(), allowed()).await.unwrap();
    assert_eq!(booleans(&values), vec![true]);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn test_terminologies_validate_cs_with_a_coding() {
    let transport = MockTransport::new(|url, _| {
        assert!(url.contains("CodeSystem/$validate-code?"), "{url}");
        assert!(url.contains("code=M"), "{url}");
        assert!(url.contains("system=http%3A%2F%2Fterminology.hl7.org"), "{url}");
        Ok(validate_code_response(false))
    });
    let engine = engine_with(transport);
    let coding = var("resource").member("maritalStatus").member("coding").call("first", vec![]);
    let expr = var("terminologies")
        .call(
            "validateCS",
            vec![string("http://terminology.hl7.org/CodeSystem/v3-MaritalStatus"), coding],
        )
        .member("parameter")
        .member("valueBoolean");
    let values = evaluate(&engine, &expr, patient(), allowed()).await.unwrap();
    assert_eq!(booleans(&values), vec![false]);
}

#[tokio::test]
async fn test_terminologies_subsumes_two_codes() {
    let transport = MockTransport::new(|url, _| {
        assert!(url.contains("CodeSystem/$subsumes?"), "{url}");
        assert!(url.contains("codeA=235856003"), "{url}");
        assert!(url.contains("codeB=3738000"), "{url}");
        Ok(json!({
            "resourceType": "Parameters",
            "parameter": [{"name": "outcome", "valueCode": "subsumes"}]
        }))
    });
    let engine = engine_with(transport);
    let expr = var("terminologies")
        .call(
            "subsumes",
            vec![string("http://snomed.info/sct"), string("235856003"), string("3738000")],
        )
        .member("parameter")
        .member("valueCode");
    let values = evaluate(&engine, &expr, patient(), allowed()).await.unwrap();
    assert_eq!(strings(&values), vec!["subsumes"]);
}

#[tokio::test]
async fn test_terminologies_translate_posts_to_the_concept_map() {
    let transport = MockTransport::new(|url, body| {
        assert!(url.ends_with("ConceptMap/$translate"), "{url}");
        let body = body.expect("translate is a POST");
        assert_eq!(
            body["parameter"][0],
            json!({"name": "url", "valueUri": "http://hl7.org/fhir/ConceptMap/cm-address-use-v2"})
        );
        assert_eq!(body["parameter"][1], json!({"name": "code", "valueCode": "home"}));
        Ok(json!({
            "resourceType": "Parameters",
            "parameter": [
                {"name": "result", "valueBoolean": true},
                {"name": "match", "part": [
                    {"name": "concept", "valueCoding": {"system": "http://terminology.hl7.org/CodeSystem/v2-0190", "code": "H"}}
                ]}
            ]
        }))
    });
    let engine = engine_with(transport);
    let expr = var("terminologies")
        .call(
            "translate",
            vec![string("http://hl7.org/fhir/ConceptMap/cm-address-use-v2"), string("home")],
        )
        .member("parameter")
        .member("part")
        .member("valueCoding")
        .member("code");
    let values = evaluate(&engine, &expr, patient(), allowed()).await.unwrap();
    assert_eq!(strings(&values), vec!["H"]);
}
