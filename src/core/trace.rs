//! Trace sinks for the `trace()` function
//!
//! - Default: log lines through the `log` facade
//! - Collecting: keep lines in memory (tests, servers)
//! - Callback: hand values to a caller-supplied closure (`trace_fn` option)

use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::types::Collection;

/// Receives the values passed through `trace(name)`
pub trait TraceProvider: Send + Sync {
    fn trace(&self, name: &str, values: &Collection);
}

/// Emits one `log::info!` line per call
#[derive(Debug, Default)]
pub struct LogTraceProvider;

impl TraceProvider for LogTraceProvider {
    fn trace(&self, name: &str, values: &Collection) {
        log::info!("TRACE[{}]: {}", name, values.describe());
    }
}

/// Keeps trace lines in memory
#[derive(Debug, Default)]
pub struct CollectingTraceProvider {
    traces: Mutex<Vec<String>>,
}

impl CollectingTraceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect_traces(&self) -> Vec<String> {
        self.traces.lock().clone()
    }

    pub fn clear_traces(&self) {
        self.traces.lock().clear();
    }
}

impl TraceProvider for CollectingTraceProvider {
    fn trace(&self, name: &str, values: &Collection) {
        self.traces
            .lock()
            .push(format!("TRACE[{}]: {}", name, values.describe()));
    }
}

/// Callback signature of the `trace_fn` option
pub type TraceFn = Arc<dyn Fn(&str, &Collection) + Send + Sync>;

struct CallbackTraceProvider(TraceFn);

impl TraceProvider for CallbackTraceProvider {
    fn trace(&self, name: &str, values: &Collection) {
        (self.0)(name, values);
    }
}

/// Convenience type for Arc<dyn TraceProvider>
pub type SharedTraceProvider = Arc<dyn TraceProvider>;

pub fn callback_provider(callback: TraceFn) -> SharedTraceProvider {
    Arc::new(CallbackTraceProvider(callback))
}

pub fn log_provider() -> SharedTraceProvider {
    Arc::new(LogTraceProvider)
}
