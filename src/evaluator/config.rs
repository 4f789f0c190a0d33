//! Engine and per-evaluation configuration
//!
//! [`EngineConfig`] is fixed for the lifetime of a [`FhirPathEngine`](super::FhirPathEngine);
//! [`EvaluationOptions`] is supplied with every `evaluate` call.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::cancellation::CancellationToken;
use crate::core::{SharedTraceProvider, TraceFn};
use crate::registry::FunctionRegistry;

/// Engine configuration for FhirPathEngine
///
/// # Examples
///
/// ```rust
/// use fhirpath_engine::evaluator::EngineConfig;
///
/// let config = EngineConfig::default()
///     .with_max_recursion_depth(256)
///     .with_terminology_url("https://tx.example.org/r4");
/// assert_eq!(config.max_recursion_depth, 256);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Terminology server used when an evaluation names none. Default: "https://tx.fhir.org/r4"
    pub default_terminology_url: String,

    /// Lifetime of resolution cache entries, in seconds. Default: 3600
    pub cache_ttl_secs: u64,

    /// Nesting limit for the tree walk. Default: 512
    pub max_recursion_depth: usize,

    /// Timeout for a single HTTP request, in milliseconds. Default: 30000
    pub request_timeout_ms: u64,
}

impl EngineConfig {
    /// Create new configuration with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `FHIRPATH_TERMINOLOGY_URL` and `FHIRPATH_CACHE_TTL_SECS`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("FHIRPATH_TERMINOLOGY_URL") {
            if !url.trim().is_empty() {
                config.default_terminology_url = url.trim().to_string();
            }
        }
        if let Ok(ttl) = std::env::var("FHIRPATH_CACHE_TTL_SECS") {
            match ttl.trim().parse() {
                Ok(secs) => config.cache_ttl_secs = secs,
                Err(_) => log::warn!("Ignoring invalid FHIRPATH_CACHE_TTL_SECS value '{ttl}'"),
            }
        }
        config
    }

    /// Set default terminology server URL
    pub fn with_terminology_url(mut self, url: impl Into<String>) -> Self {
        self.default_terminology_url = url.into();
        self
    }

    /// Set resolution cache time-to-live
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Set maximum recursion depth
    pub fn with_max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    /// Set HTTP request timeout in milliseconds
    pub fn with_request_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_terminology_url: "https://tx.fhir.org/r4".to_string(),
            cache_ttl_secs: 3600,
            max_recursion_depth: 512,
            request_timeout_ms: 30_000,
        }
    }
}

/// Whether asynchronous functions may run and how results are wrapped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncMode {
    /// Reaching an asynchronous function is an error
    #[default]
    Off,
    /// The result is deferred only when an asynchronous function ran
    Allowed,
    /// The result is always deferred
    Always,
}

/// Options for a single evaluation
#[derive(Clone)]
pub struct EvaluationOptions {
    /// Render date/time and quantity results as strings. Default: true
    pub resolve_internal_types: bool,
    /// Receives the values passed through `trace()`
    pub trace_fn: Option<TraceFn>,
    /// Sink used when no `trace_fn` is given
    pub trace_provider: Option<SharedTraceProvider>,
    /// Caller functions; entries shadow built-ins of the same name
    pub user_invocation_table: Option<Arc<FunctionRegistry>>,
    /// Terminology server for `memberOf`, `weight` and `%terminologies`
    pub terminology_url: Option<String>,
    /// FHIR server that `resolve()` fetches references from
    pub fhir_server_url: Option<String>,
    pub async_mode: AsyncMode,
    pub cancellation: Option<CancellationToken>,
}

impl EvaluationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_async_mode(mut self, mode: AsyncMode) -> Self {
        self.async_mode = mode;
        self
    }

    pub fn with_resolve_internal_types(mut self, resolve: bool) -> Self {
        self.resolve_internal_types = resolve;
        self
    }

    pub fn with_trace_fn(mut self, trace_fn: TraceFn) -> Self {
        self.trace_fn = Some(trace_fn);
        self
    }

    pub fn with_trace_provider(mut self, provider: SharedTraceProvider) -> Self {
        self.trace_provider = Some(provider);
        self
    }

    pub fn with_user_invocation_table(mut self, table: Arc<FunctionRegistry>) -> Self {
        self.user_invocation_table = Some(table);
        self
    }

    pub fn with_terminology_url(mut self, url: impl Into<String>) -> Self {
        self.terminology_url = Some(url.into());
        self
    }

    pub fn with_fhir_server_url(mut self, url: impl Into<String>) -> Self {
        self.fhir_server_url = Some(url.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            resolve_internal_types: true,
            trace_fn: None,
            trace_provider: None,
            user_invocation_table: None,
            terminology_url: None,
            fhir_server_url: None,
            async_mode: AsyncMode::Off,
            cancellation: None,
        }
    }
}

impl fmt::Debug for EvaluationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationOptions")
            .field("resolve_internal_types", &self.resolve_internal_types)
            .field("trace_fn", &self.trace_fn.is_some())
            .field("user_invocation_table", &self.user_invocation_table.is_some())
            .field("terminology_url", &self.terminology_url)
            .field("fhir_server_url", &self.fhir_server_url)
            .field("async_mode", &self.async_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_terminology_url, "https://tx.fhir.org/r4");
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.max_recursion_depth, 512);

        let options = EvaluationOptions::default();
        assert!(options.resolve_internal_types);
        assert_eq!(options.async_mode, AsyncMode::Off);
    }

    #[test]
    fn test_config_deserializes_partially() {
        let config: EngineConfig = serde_json::from_str(r#"{"cache_ttl_secs": 60}"#).unwrap();
        assert_eq!(config.cache_ttl_secs, 60);
        assert_eq!(config.request_timeout_ms, 30_000);

        let mode: AsyncMode = serde_json::from_str("\"always\"").unwrap();
        assert_eq!(mode, AsyncMode::Always);
    }
}
