//! Core value model: errors, values, collections, types and units

pub mod error;
pub mod error_code;
pub mod model;
pub mod node;
pub mod quantity;
pub mod temporal;
pub mod trace;
pub mod type_info;
pub mod types;
pub mod value;

pub use error::{ErrorSite, FhirPathError, Result, SourceLocation};
pub use error_code::ErrorCode;
pub use model::{Model, ScoreConfig};
pub use node::{PathStep, ValueNode};
pub use quantity::Quantity;
pub use temporal::{CalendarUnit, PrecisionDate, PrecisionDateTime, PrecisionTime, TemporalPrecision};
pub use trace::{CollectingTraceProvider, SharedTraceProvider, TraceFn, TraceProvider};
pub use type_info::{TypeInfo, TypeNamespace, TypeSpecifier};
pub use types::Collection;
pub use value::FhirPathValue;
