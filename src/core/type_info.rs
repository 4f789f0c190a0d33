//! FHIRPath type descriptors
//!
//! Every value has a [`TypeInfo`]: a namespace (`System` for the language's
//! own primitives, `FHIR` for model types) and a name. Type tests walk the
//! model's parent map, and model primitives also answer to their System
//! counterpart so `Observation.value is String` holds for a `valueString`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::model::Model;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeNamespace {
    System,
    Model,
}

impl TypeNamespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "System",
            Self::Model => "FHIR",
        }
    }

    fn matches(&self, qualifier: &str) -> bool {
        self.as_str() == qualifier
    }
}

impl fmt::Display for TypeNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A possibly-qualified type name as written in `is`, `as` and `ofType`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeSpecifier {
    pub namespace: Option<String>,
    pub name: String,
}

impl TypeSpecifier {
    /// Parse `Name`, `FHIR.Name` or `` System.`Name` ``
    pub fn parse(text: &str) -> Self {
        let cleaned: String = text.chars().filter(|c| *c != '`').collect();
        match cleaned.split_once('.') {
            Some((namespace, name)) if namespace == "System" || namespace == "FHIR" => Self {
                namespace: Some(namespace.to_string()),
                name: name.to_string(),
            },
            _ => Self {
                namespace: None,
                name: cleaned,
            },
        }
    }
}

impl fmt::Display for TypeSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Runtime type of a value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeInfo {
    pub namespace: TypeNamespace,
    pub name: String,
}

impl TypeInfo {
    pub fn system(name: impl Into<String>) -> Self {
        Self {
            namespace: TypeNamespace::System,
            name: name.into(),
        }
    }

    pub fn model(name: impl Into<String>) -> Self {
        Self {
            namespace: TypeNamespace::Model,
            name: name.into(),
        }
    }

    /// System type a model primitive maps onto, if it is one
    pub fn system_equivalent(&self) -> Option<&'static str> {
        if self.namespace == TypeNamespace::System {
            return None;
        }
        system_type_for_primitive(&self.name)
    }

    /// Exact or ancestor match against a type specifier
    pub fn is(&self, candidate: &TypeSpecifier, model: Option<&Model>) -> bool {
        let qualifier = candidate.namespace.as_deref();
        let accepts = |namespace: TypeNamespace| qualifier.is_none_or(|q| namespace.matches(q));

        match self.namespace {
            TypeNamespace::System => accepts(TypeNamespace::System) && self.name == candidate.name,
            TypeNamespace::Model => {
                if accepts(TypeNamespace::Model) {
                    let mut current = Some(self.name.as_str());
                    let mut hops = 0;
                    while let Some(name) = current {
                        if name == candidate.name {
                            return true;
                        }
                        hops += 1;
                        current = if hops > 64 {
                            None
                        } else {
                            model.and_then(|m| m.parent_type(name))
                        };
                    }
                }
                accepts(TypeNamespace::System)
                    && self.system_equivalent() == Some(candidate.name.as_str())
            }
        }
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// FHIR primitive type name to System type name
pub fn system_type_for_primitive(name: &str) -> Option<&'static str> {
    match name {
        "boolean" => Some("Boolean"),
        "integer" | "positiveInt" | "unsignedInt" | "integer64" => Some("Integer"),
        "decimal" => Some("Decimal"),
        "date" => Some("Date"),
        "dateTime" | "instant" => Some("DateTime"),
        "time" => Some("Time"),
        "string" | "code" | "id" | "markdown" | "uri" | "url" | "canonical" | "oid" | "uuid"
        | "base64Binary" | "xhtml" => Some("String"),
        _ => None,
    }
}

/// Model type named by a choice-type suffix (`String` -> `string`, `Quantity` -> `Quantity`)
pub fn type_for_choice_suffix(suffix: &str) -> String {
    let mut chars = suffix.chars();
    let lowered = match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect::<String>(),
        None => return String::new(),
    };
    if system_type_for_primitive(&lowered).is_some() {
        lowered
    } else {
        suffix.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> Model {
        Model::new("r4")
            .with_parent_type("code", "string")
            .with_parent_type("string", "PrimitiveType")
            .with_parent_type("Patient", "DomainResource")
            .with_parent_type("DomainResource", "Resource")
    }

    #[test]
    fn test_ancestor_match() {
        let model = model();
        let code = TypeInfo::model("code");
        assert!(code.is(&TypeSpecifier::parse("string"), Some(&model)));
        assert!(code.is(&TypeSpecifier::parse("FHIR.string"), Some(&model)));
        assert!(!code.is(&TypeSpecifier::parse("boolean"), Some(&model)));

        let patient = TypeInfo::model("Patient");
        assert!(patient.is(&TypeSpecifier::parse("Resource"), Some(&model)));
        assert!(!patient.is(&TypeSpecifier::parse("System.Resource"), Some(&model)));
    }

    #[test]
    fn test_model_primitive_answers_to_system_type() {
        let string = TypeInfo::model("string");
        assert!(string.is(&TypeSpecifier::parse("String"), None));
        assert!(string.is(&TypeSpecifier::parse("System.String"), None));
        assert!(!string.is(&TypeSpecifier::parse("FHIR.String"), None));
    }

    #[test]
    fn test_system_types_have_no_ancestors() {
        let integer = TypeInfo::system("Integer");
        assert!(integer.is(&TypeSpecifier::parse("Integer"), None));
        assert!(!integer.is(&TypeSpecifier::parse("Decimal"), None));
        assert!(!integer.is(&TypeSpecifier::parse("FHIR.Integer"), None));
    }

    #[test]
    fn test_choice_suffix_types() {
        assert_eq!(type_for_choice_suffix("String"), "string");
        assert_eq!(type_for_choice_suffix("DateTime"), "dateTime");
        assert_eq!(type_for_choice_suffix("Quantity"), "Quantity");
        assert_eq!(type_for_choice_suffix("CodeableConcept"), "CodeableConcept");
    }
}
