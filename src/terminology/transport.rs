//! HTTP transport for terminology and FHIR server requests

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::error_code::FP0200;
use crate::core::{FhirPathError, Result};

const FHIR_JSON: &str = "application/fhir+json";

/// Issues JSON requests against a FHIR (terminology) server
///
/// The engine only needs GET and POST of JSON bodies; tests substitute a
/// recording implementation.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<Value>;

    async fn post(&self, url: &str, body: &Value) -> Result<Value>;
}

/// `reqwest`-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to a default HTTP client: {e}");
                reqwest::Client::new()
            });
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn read(url: &str, response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            return Err(FhirPathError::external(
                FP0200,
                format!("Terminology server error: {status}"),
                Some(url.to_string()),
            ));
        }
        response.json().await.map_err(|e| {
            FhirPathError::external(
                FP0200,
                format!("Failed to parse response: {e}"),
                Some(url.to_string()),
            )
        })
    }

    fn unreachable(url: &str, e: reqwest::Error) -> FhirPathError {
        FhirPathError::external(
            FP0200,
            format!("Failed to contact server: {e}"),
            Some(url.to_string()),
        )
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<Value> {
        log::debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(|e| Self::unreachable(url, e))?;
        Self::read(url, response).await
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        log::debug!("POST {url}");
        let response = self
            .client
            .post(url)
            .header(reqwest::header::ACCEPT, FHIR_JSON)
            .header(reqwest::header::CONTENT_TYPE, FHIR_JSON)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| Self::unreachable(url, e))?;
        Self::read(url, response).await
    }
}
