//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fhirpath_engine::core::error_code::FP0200;
use fhirpath_engine::{
    Collection, EvaluationOptions, ExpressionNode, FhirPathEngine, FhirPathError, FhirPathValue, HttpTransport, Result,
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;

type Responder = Box<dyn Fn(&str, Option<&Value>) -> Result<Value> + Send + Sync>;

/// Transport answering from a closure and recording every request
pub struct MockTransport {
    responder: Responder,
    calls: AtomicUsize,
    urls: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(responder: impl Fn(&str, Option<&Value>) -> Result<Value> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        })
    }

    /// Transport whose every request fails like an unreachable server
    pub fn failing() -> Arc<Self> {
        Self::new(|url, _| {
            Err(FhirPathError::external(
                FP0200,
                "connection refused",
                Some(url.to_string()),
            ))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    fn record(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(url.to_string());
        (self.responder)(url, body)
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, url: &str) -> Result<Value> {
        self.record(url, None)
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        self.record(url, Some(body))
    }
}

/// FHIR server that answers reads after a delay and tracks how many overlap
pub struct SlowServer {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SlowServer {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for SlowServer {
    /// Echoes `{server}/{Type}/{id}` back as a resource of that type and id
    async fn get(&self, url: &str) -> Result<Value> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut segments = url.rsplit('/');
        let id = segments.next().unwrap_or_default();
        let resource_type = segments.next().unwrap_or_default();
        Ok(serde_json::json!({"resourceType": resource_type, "id": id}))
    }

    async fn post(&self, url: &str, _body: &Value) -> Result<Value> {
        Err(FhirPathError::external(FP0200, "reads only", Some(url.to_string())))
    }
}

/// Route library logging to the test harness; later calls are no-ops
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Evaluate synchronously with default options
pub fn eval(expr: &ExpressionNode, resource: Value) -> Result<Collection> {
    eval_with(&FhirPathEngine::new(), expr, resource, EvaluationOptions::default())
}

pub fn eval_with(
    engine: &FhirPathEngine,
    expr: &ExpressionNode,
    resource: Value,
    options: EvaluationOptions,
) -> Result<Collection> {
    init_logging();
    let result = engine.evaluate(expr, resource, IndexMap::new(), options)?;
    Ok(result.ready().expect("evaluation should complete synchronously"))
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

pub fn integers(collection: &Collection) -> Vec<i64> {
    collection
        .iter()
        .filter_map(|v| match v.to_primitive() {
            FhirPathValue::Integer(i) => Some(i),
            _ => None,
        })
        .collect()
}
