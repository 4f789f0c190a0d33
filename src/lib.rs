// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! FHIRPath evaluation engine in Rust
//!
//! Evaluates FHIRPath expression trees produced by an external parser against
//! FHIR resources given as JSON. Evaluation is synchronous until an
//! asynchronous function (terminology calls, reference resolution) is reached,
//! at which point the result is handed back as a future.
//!
//! ```rust
//! use fhirpath_engine::ast::builder::*;
//! use fhirpath_engine::{BinaryOperator, EvaluationOptions, FhirPathEngine};
//! use indexmap::IndexMap;
//! use serde_json::json;
//!
//! let engine = FhirPathEngine::new();
//! let patient = json!({
//!     "resourceType": "Patient",
//!     "name": [{"use": "official", "given": ["Ann"]}, {"use": "nickname", "given": ["Annie"]}]
//! });
//! let expr = path("Patient.name")
//!     .call("where", vec![binary(BinaryOperator::Equal, ident("use"), string("official"))])
//!     .member("given");
//! let given = engine
//!     .evaluate(&expr, patient, IndexMap::new(), EvaluationOptions::default())?
//!     .ready()
//!     .unwrap_or_default();
//! assert_eq!(given.len(), 1);
//! # Ok::<(), fhirpath_engine::FhirPathError>(())
//! ```

pub mod ast;
pub mod core;
pub mod evaluator;
pub mod registry;
pub mod terminology;

pub use crate::ast::{BinaryOperator, ExpressionNode, LiteralValue, ParseNode};
pub use crate::core::{Collection, FhirPathError, FhirPathValue, Model, Result, TypeInfo, ValueNode};
pub use crate::evaluator::{
    AsyncMode, CancellationToken, CompiledExpression, EngineConfig, EvaluationOptions, EvaluationResult,
    FhirPathEngine,
};
pub use crate::registry::{FunctionRegistry, create_standard_registry};
pub use crate::terminology::{HttpTransport, ReqwestTransport};
