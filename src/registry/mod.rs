//! FHIRPath function registry
//!
//! Built-in and caller-supplied functions share one registry type with
//! separate synchronous and asynchronous tables. Every entry carries
//! [`FunctionMetadata`]; the evaluator checks arity and evaluates arguments
//! according to the declared [`ParameterKind`]s before calling the function.
//! Lambda-taking functions (`where`, `select`, ...) are not registry entries;
//! the evaluator handles them directly.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;

use crate::core::error_code::{FP0051, FP0054};
use crate::core::{Collection, FhirPathError, FhirPathValue, Model, Result, TypeSpecifier};
use crate::evaluator::EvaluationContext;

pub mod aggregate;
pub mod builder;
pub mod combining;
pub mod conversion;
pub mod datetime;
pub mod defaults;
pub mod existence;
pub mod fhir;
pub mod math;
pub mod navigation;
pub mod string;
pub mod subsetting;
pub mod terminology;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use builder::FunctionBuilder;
pub use defaults::create_standard_registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCategory {
    Existence,
    Subsetting,
    Combining,
    Conversion,
    String,
    Math,
    DateTime,
    Navigation,
    Type,
    Aggregate,
    Utility,
    Fhir,
    Terminology,
    User,
}

/// How an argument expression is turned into a value before the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    /// Any collection, evaluated on the invocation's input
    Any,
    /// Any collection, evaluated on `$this` (set operations)
    AnyAtRoot,
    /// A bare identifier, passed by name
    Identifier,
    /// A type name (`ofType(Patient)`)
    TypeSpecifier,
    /// A singleton Integer
    Integer,
    /// A singleton Integer or Decimal
    Number,
    /// A singleton Boolean
    Boolean,
    /// A singleton String
    String,
}

#[derive(Debug, Clone)]
pub struct ParameterMetadata {
    pub name: String,
    pub kind: ParameterKind,
    pub is_optional: bool,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct FunctionMetadata {
    pub name: String,
    pub category: FunctionCategory,
    pub description: String,
    pub parameters: Vec<ParameterMetadata>,
    pub return_type: Option<String>,
    pub is_async: bool,
    pub examples: Vec<String>,
}

impl FunctionMetadata {
    /// Number of required parameters
    pub fn min_arity(&self) -> usize {
        self.parameters.iter().filter(|p| !p.is_optional).count()
    }

    pub fn max_arity(&self) -> usize {
        self.parameters.len()
    }

    pub fn accepts_arity(&self, count: usize) -> bool {
        (self.min_arity()..=self.max_arity()).contains(&count)
    }
}

/// An evaluated argument
#[derive(Debug, Clone)]
pub enum FunctionArgument {
    Collection(Collection),
    /// Singleton of the declared primitive kind; `None` when the argument was empty
    Value(Option<FhirPathValue>),
    Name(String),
    Type(TypeSpecifier),
}

/// Function execution context
pub struct FunctionContext<'a> {
    pub name: &'a str,
    pub input: &'a Collection,
    pub arguments: &'a [FunctionArgument],
    pub context: &'a EvaluationContext,
}

impl<'a> FunctionContext<'a> {
    pub fn model(&self) -> Option<&'a Arc<Model>> {
        self.context.model()
    }

    pub fn argument(&self, index: usize) -> Option<&'a FunctionArgument> {
        self.arguments.get(index)
    }

    /// Argument as a collection, empty when absent
    pub fn arg_collection(&self, index: usize) -> Collection {
        match self.argument(index) {
            Some(FunctionArgument::Collection(collection)) => collection.clone(),
            Some(FunctionArgument::Value(value)) => Collection::from(value.clone()),
            _ => Collection::empty(),
        }
    }

    pub fn arg_value(&self, index: usize) -> Option<&'a FhirPathValue> {
        match self.argument(index) {
            Some(FunctionArgument::Value(value)) => value.as_ref(),
            Some(FunctionArgument::Collection(collection)) => collection.first(),
            _ => None,
        }
    }

    pub fn arg_integer(&self, index: usize) -> Option<i64> {
        match self.arg_value(index) {
            Some(FhirPathValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn arg_number(&self, index: usize) -> Option<Decimal> {
        match self.arg_value(index) {
            Some(FhirPathValue::Integer(i)) => Some(Decimal::from(*i)),
            Some(FhirPathValue::Decimal(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn arg_string(&self, index: usize) -> Option<String> {
        self.arg_value(index).and_then(FhirPathValue::as_str)
    }

    pub fn arg_boolean(&self, index: usize) -> Option<bool> {
        match self.arg_value(index) {
            Some(FhirPathValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn arg_type(&self, index: usize) -> Option<&'a TypeSpecifier> {
        match self.argument(index) {
            Some(FunctionArgument::Type(specifier)) => Some(specifier),
            _ => None,
        }
    }

    pub fn arg_name(&self, index: usize) -> Option<&'a str> {
        match self.argument(index) {
            Some(FunctionArgument::Name(name)) => Some(name),
            _ => None,
        }
    }

    /// The input as at most one item, converted to a System value
    pub fn input_singleton(&self) -> Result<Option<FhirPathValue>> {
        Ok(self
            .input
            .singleton(&format!("{}()", self.name))?
            .map(FhirPathValue::to_primitive))
    }

    /// The input as at most one string
    pub fn input_string(&self) -> Result<Option<String>> {
        match self.input_singleton()? {
            None => Ok(None),
            Some(FhirPathValue::String(s)) => Ok(Some(s)),
            Some(other) => Err(FhirPathError::type_error(
                FP0051,
                format!("{}() expects a String input, got {}", self.name, other.type_name()),
            )),
        }
    }
}

/// Sync function signature
pub type SyncFunction = Arc<dyn Fn(&FunctionContext<'_>) -> Result<Collection> + Send + Sync>;

/// Async function signature
pub type AsyncFunction =
    Arc<dyn for<'a> Fn(&'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> + Send + Sync>;

/// Either kind of registered function
#[derive(Clone)]
pub enum RegisteredFunction {
    Sync(SyncFunction),
    Async(AsyncFunction),
}

/// Thread-safe function registry with metadata support
#[derive(Default)]
pub struct FunctionRegistry {
    sync_functions: RwLock<FxHashMap<String, (SyncFunction, FunctionMetadata)>>,
    async_functions: RwLock<FxHashMap<String, (AsyncFunction, FunctionMetadata)>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_unregistered(&self, name: &str) -> Result<()> {
        if self.sync_functions.read().contains_key(name) || self.async_functions.read().contains_key(name) {
            return Err(FhirPathError::evaluation_error(
                FP0054,
                format!("Function '{name}' is already registered"),
            ));
        }
        Ok(())
    }

    pub fn register_sync_function(
        &self,
        name: impl Into<String>,
        function: SyncFunction,
        metadata: FunctionMetadata,
    ) -> Result<()> {
        let name = name.into();
        self.ensure_unregistered(&name)?;
        self.sync_functions.write().insert(name, (function, metadata));
        Ok(())
    }

    pub fn register_async_function(
        &self,
        name: impl Into<String>,
        function: AsyncFunction,
        metadata: FunctionMetadata,
    ) -> Result<()> {
        let name = name.into();
        self.ensure_unregistered(&name)?;
        self.async_functions.write().insert(name, (function, metadata));
        Ok(())
    }

    pub fn get_sync_function(&self, name: &str) -> Option<(SyncFunction, FunctionMetadata)> {
        self.sync_functions.read().get(name).cloned()
    }

    pub fn get_async_function(&self, name: &str) -> Option<(AsyncFunction, FunctionMetadata)> {
        self.async_functions.read().get(name).cloned()
    }

    /// Look up a function in either table
    pub fn get_function(&self, name: &str) -> Option<(RegisteredFunction, FunctionMetadata)> {
        if let Some((function, metadata)) = self.get_sync_function(name) {
            return Some((RegisteredFunction::Sync(function), metadata));
        }
        self.get_async_function(name)
            .map(|(function, metadata)| (RegisteredFunction::Async(function), metadata))
    }

    pub fn is_function_async(&self, name: &str) -> Option<bool> {
        if self.sync_functions.read().contains_key(name) {
            Some(false)
        } else if self.async_functions.read().contains_key(name) {
            Some(true)
        } else {
            None
        }
    }

    pub fn get_function_metadata(&self, name: &str) -> Option<FunctionMetadata> {
        self.get_function(name).map(|(_, metadata)| metadata)
    }

    pub fn list_functions(&self) -> Vec<FunctionMetadata> {
        let mut functions: Vec<FunctionMetadata> = self
            .sync_functions
            .read()
            .values()
            .map(|(_, metadata)| metadata.clone())
            .collect();
        functions.extend(self.async_functions.read().values().map(|(_, metadata)| metadata.clone()));
        functions.sort_by(|a, b| a.name.cmp(&b.name));
        functions
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("sync_functions", &self.sync_functions.read().len())
            .field("async_functions", &self.async_functions.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register_function;

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let registry = FunctionRegistry::new();
        let register = |registry: &FunctionRegistry| {
            register_function!(
                registry,
                sync "double",
                category: FunctionCategory::User,
                description: "Doubles an integer",
                parameters: [],
                return_type: "Integer",
                examples: ["2.double()"],
                implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
                    Ok(match ctx.input_singleton()? {
                        Some(FhirPathValue::Integer(i)) => Collection::single(FhirPathValue::Integer(i * 2)),
                        _ => Collection::empty(),
                    })
                }
            )
        };
        register(&registry).unwrap();
        assert_eq!(register(&registry).unwrap_err().error_code(), FP0054);
        assert_eq!(registry.is_function_async("double"), Some(false));
        assert_eq!(registry.list_functions().len(), 1);
    }

    #[test]
    fn test_arity_bounds() {
        let registry = create_standard_registry();
        let substring = registry.get_function_metadata("substring").unwrap();
        assert!(substring.accepts_arity(1));
        assert!(substring.accepts_arity(2));
        assert!(!substring.accepts_arity(0));
        assert_eq!(registry.is_function_async("memberOf"), Some(true));
    }
}
