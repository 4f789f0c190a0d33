//! FHIRPath evaluation
//!
//! The engine entry point, the per-call context and the tree walker with its
//! macros, member navigation and operator implementations.

pub mod cancellation;
pub mod config;
pub mod context;
pub mod engine;
pub mod evaluator;
pub mod lambda;
pub mod navigator;
pub mod operations;
pub mod result;

pub use cancellation::CancellationToken;
pub use config::{AsyncMode, EngineConfig, EvaluationOptions};
pub use context::{EvaluationContext, EvaluationState, VariableScope};
pub use engine::{CompiledExpression, FhirPathEngine};
pub use evaluator::evaluate_node;
pub use navigator::Navigator;
pub use result::EvaluationResult;
