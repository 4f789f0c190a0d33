//! Function builder pattern for easy registration

use std::sync::Arc;

use futures::future::BoxFuture;

use super::{
    AsyncFunction, FunctionCategory, FunctionContext, FunctionMetadata, FunctionRegistry,
    ParameterKind, ParameterMetadata, SyncFunction,
};
use crate::core::{Collection, Result};

pub struct FunctionBuilder {
    name: String,
    category: FunctionCategory,
    description: String,
    parameters: Vec<ParameterMetadata>,
    return_type: Option<String>,
    examples: Vec<String>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, category: FunctionCategory) -> Self {
        Self {
            name: name.into(),
            category,
            description: String::new(),
            parameters: Vec::new(),
            return_type: None,
            examples: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parameter(
        mut self,
        name: impl Into<String>,
        kind: ParameterKind,
        is_optional: bool,
        description: impl Into<String>,
    ) -> Self {
        self.parameters.push(ParameterMetadata {
            name: name.into(),
            kind,
            is_optional,
            description: description.into(),
        });
        self
    }

    pub fn return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = Some(return_type.into());
        self
    }

    pub fn example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    fn metadata(self, is_async: bool) -> (String, FunctionMetadata) {
        let metadata = FunctionMetadata {
            name: self.name.clone(),
            category: self.category,
            description: self.description,
            parameters: self.parameters,
            return_type: self.return_type,
            is_async,
            examples: self.examples,
        };
        (self.name, metadata)
    }

    pub fn register_sync(self, registry: &FunctionRegistry, function: SyncFunction) -> Result<()> {
        let (name, metadata) = self.metadata(false);
        registry.register_sync_function(name, function, metadata)
    }

    pub fn register_async(self, registry: &FunctionRegistry, function: AsyncFunction) -> Result<()> {
        let (name, metadata) = self.metadata(true);
        registry.register_async_function(name, function, metadata)
    }
}

/// Box a closure as a [`SyncFunction`]
pub fn sync_fn<F>(function: F) -> SyncFunction
where
    F: Fn(&FunctionContext<'_>) -> Result<Collection> + Send + Sync + 'static,
{
    Arc::new(function)
}

/// Box a function item as an [`AsyncFunction`]
pub fn async_fn<F>(function: F) -> AsyncFunction
where
    F: for<'a> Fn(&'a FunctionContext<'a>) -> BoxFuture<'a, Result<Collection>> + Send + Sync + 'static,
{
    Arc::new(function)
}

/// Convenience macro for function registration
///
/// ```
/// use fhirpath_engine::core::{Collection, FhirPathValue, Result};
/// use fhirpath_engine::register_function;
/// use fhirpath_engine::registry::{FunctionCategory, FunctionContext, FunctionRegistry, ParameterKind};
///
/// let registry = FunctionRegistry::new();
/// register_function!(
///     &registry,
///     sync "repeatText",
///     category: FunctionCategory::User,
///     description: "Repeats the input string",
///     parameters: ["times": ParameterKind::Integer => "Number of copies"],
///     optional: ["separator": ParameterKind::String => "Text placed between copies"],
///     return_type: "String",
///     examples: ["'ab'.repeatText(2)"],
///     implementation: |ctx: &FunctionContext<'_>| -> Result<Collection> {
///         let (Some(text), Some(times)) = (ctx.input_string()?, ctx.arg_integer(0)) else {
///             return Ok(Collection::empty());
///         };
///         let separator = ctx.arg_string(1).unwrap_or_default();
///         let copies = vec![text; times.max(0) as usize];
///         Ok(Collection::single(FhirPathValue::String(copies.join(&separator))))
///     }
/// )
/// .unwrap();
/// assert!(registry.get_function_metadata("repeatText").unwrap().accepts_arity(2));
/// ```
#[macro_export]
macro_rules! register_function {
    (
        $registry:expr,
        $mode:ident $name:literal,
        category: $category:expr,
        description: $desc:literal,
        parameters: [$($param_name:literal : $param_kind:expr => $param_desc:literal),* $(,)?],
        return_type: $return_type:expr,
        examples: [$($example:literal),* $(,)?],
        implementation: $impl:expr
    ) => {
        $crate::register_function!(
            $registry,
            $mode $name,
            category: $category,
            description: $desc,
            parameters: [$($param_name : $param_kind => $param_desc),*],
            optional: [],
            return_type: $return_type,
            examples: [$($example),*],
            implementation: $impl
        )
    };

    (
        $registry:expr,
        sync $name:literal,
        category: $category:expr,
        description: $desc:literal,
        parameters: [$($param_name:literal : $param_kind:expr => $param_desc:literal),* $(,)?],
        optional: [$($opt_name:literal : $opt_kind:expr => $opt_desc:literal),* $(,)?],
        return_type: $return_type:expr,
        examples: [$($example:literal),* $(,)?],
        implementation: $impl:expr
    ) => {
        {
            #[allow(unused_mut)]
            let mut builder = $crate::registry::builder::FunctionBuilder::new($name, $category)
                .description($desc)
                .return_type($return_type);
            $(
                builder = builder.parameter($param_name, $param_kind, false, $param_desc);
            )*
            $(
                builder = builder.parameter($opt_name, $opt_kind, true, $opt_desc);
            )*
            $(
                builder = builder.example($example);
            )*
            builder.register_sync($registry, $crate::registry::builder::sync_fn($impl))
        }
    };

    (
        $registry:expr,
        async $name:literal,
        category: $category:expr,
        description: $desc:literal,
        parameters: [$($param_name:literal : $param_kind:expr => $param_desc:literal),* $(,)?],
        optional: [$($opt_name:literal : $opt_kind:expr => $opt_desc:literal),* $(,)?],
        return_type: $return_type:expr,
        examples: [$($example:literal),* $(,)?],
        implementation: $impl:expr
    ) => {
        {
            #[allow(unused_mut)]
            let mut builder = $crate::registry::builder::FunctionBuilder::new($name, $category)
                .description($desc)
                .return_type($return_type);
            $(
                builder = builder.parameter($param_name, $param_kind, false, $param_desc);
            )*
            $(
                builder = builder.parameter($opt_name, $opt_kind, true, $opt_desc);
            )*
            $(
                builder = builder.example($example);
            )*
            builder.register_async($registry, $crate::registry::builder::async_fn($impl))
        }
    };
}
