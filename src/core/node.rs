//! Document elements wrapped with their schema path and provenance
//!
//! A [`ValueNode`] is what member navigation produces: the raw JSON value,
//! the schema path used for type lookups (`Patient.name.given`), the full
//! element path with array indices (`Patient.name[0].given[1]`), a link to
//! the node it was reached from, and the `_field` sibling object carrying
//! primitive extensions.

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::core::model::Model;
use crate::core::type_info::TypeInfo;

/// One navigation step: a field name and, for array members, the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub field: String,
    pub index: Option<usize>,
}

impl PathStep {
    pub fn field(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            index: None,
        }
    }

    pub fn indexed(field: impl Into<String>, index: usize) -> Self {
        Self {
            field: field.into(),
            index: Some(index),
        }
    }
}

/// A document value reached by navigation
pub struct ValueNode {
    data: JsonValue,
    /// Schema path without indices, used for model lookups
    path: Option<String>,
    /// Element path with `[n]` index steps
    full_path: String,
    /// Node this one was navigated from; never mutated through
    parent: Option<Arc<ValueNode>>,
    /// Declared model type (`date`, `HumanName`, or a choice suffix type)
    fhir_node_data_type: Option<String>,
    /// Sibling `_field` object holding `id`/`extension` of a primitive
    sibling: Option<JsonValue>,
    model: Option<Arc<Model>>,
}

impl ValueNode {
    /// Build a node reached from `parent` through `step`
    pub fn make(
        data: JsonValue,
        parent: Option<Arc<ValueNode>>,
        step: Option<PathStep>,
        path: Option<String>,
        sibling: Option<JsonValue>,
        declared_type: Option<String>,
        model: Option<Arc<Model>>,
    ) -> Arc<Self> {
        let full_path = match (&parent, &step) {
            (Some(parent), Some(step)) => {
                let mut full = format!("{}.{}", parent.full_path, step.field);
                if let Some(index) = step.index {
                    full.push_str(&format!("[{index}]"));
                }
                full
            }
            (None, Some(step)) => match step.index {
                Some(index) => format!("{}[{index}]", step.field),
                None => step.field.clone(),
            },
            _ => path.clone().unwrap_or_default(),
        };
        // Embedded resources restart the schema path at their own type.
        let resource_type = data
            .get("resourceType")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let (path, declared_type) = match resource_type {
            Some(resource_type) => (Some(resource_type.clone()), Some(resource_type)),
            None => (path, declared_type),
        };
        Arc::new(Self {
            data,
            path,
            full_path,
            parent,
            fhir_node_data_type: declared_type,
            sibling,
            model,
        })
    }

    /// Root node for a document; resources are rooted at their `resourceType`
    pub fn root(data: JsonValue, model: Option<Arc<Model>>) -> Arc<Self> {
        let path = data
            .get("resourceType")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        Self::make(data, None, None, path, None, None, model)
    }

    pub fn data(&self) -> &JsonValue {
        &self.data
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    pub fn parent(&self) -> Option<&Arc<ValueNode>> {
        self.parent.as_ref()
    }

    pub fn sibling(&self) -> Option<&JsonValue> {
        self.sibling.as_ref()
    }

    pub fn model(&self) -> Option<&Arc<Model>> {
        self.model.as_ref()
    }

    pub fn declared_type(&self) -> Option<&str> {
        self.fhir_node_data_type.as_deref()
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.data.get("resourceType").and_then(JsonValue::as_str)
    }

    /// Whether a primitive carries an actual value (not just extensions)
    pub fn has_primitive_value(&self) -> bool {
        matches!(
            self.data,
            JsonValue::Bool(_) | JsonValue::Number(_) | JsonValue::String(_)
        )
    }

    /// Nearest ancestor (or self) that is a resource
    pub fn enclosing_resource(self: &Arc<Self>) -> Option<Arc<ValueNode>> {
        let mut current = Some(Arc::clone(self));
        while let Some(node) = current {
            if node.resource_type().is_some() {
                return Some(node);
            }
            current = node.parent.clone();
        }
        None
    }

    /// Outermost ancestor
    pub fn root_node(self: &Arc<Self>) -> Arc<ValueNode> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent.clone() {
            current = parent;
        }
        current
    }

    /// Resolve the node's FHIRPath type
    pub fn type_info(&self) -> TypeInfo {
        if let Some(declared) = &self.fhir_node_data_type {
            return TypeInfo::model(declared.clone());
        }
        match &self.data {
            JsonValue::Bool(_) => TypeInfo::system("Boolean"),
            JsonValue::Number(n) if n.is_i64() || n.is_u64() => TypeInfo::system("Integer"),
            JsonValue::Number(_) => TypeInfo::system("Decimal"),
            JsonValue::String(_) => TypeInfo::system("String"),
            _ => match self.path.as_deref().filter(|p| !p.contains('.')) {
                Some(path) if self.model.is_some() => TypeInfo::model(path),
                _ => TypeInfo::model("Element"),
            },
        }
    }
}

impl fmt::Debug for ValueNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueNode")
            .field("path", &self.full_path)
            .field("type", &self.fhir_node_data_type)
            .field("data", &self.data)
            .finish()
    }
}
