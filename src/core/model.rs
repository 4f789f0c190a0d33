//! Schema metadata describing a document dialect
//!
//! The engine never ships schema data of its own; callers load a [`Model`]
//! (typically generated from FHIR StructureDefinitions) and hand it to the
//! engine. All maps use the JSON field names of the generated model files.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// URIs used by `weight()`/`ordinal()` to find item scores
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreConfig {
    /// CodeSystem concept property holding the score
    #[serde(rename = "propertyURI", default)]
    pub property_uri: Option<String>,
    /// Extensions on a coding or answer option holding the score
    #[serde(rename = "extensionURI", default)]
    pub extension_uri: Vec<String>,
}

/// Type and path metadata for one model version
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Model version label (`r4`, `r5`, ...)
    #[serde(default)]
    pub version: String,
    /// Polymorphic paths and their allowed type suffixes (`Observation.value` -> `Quantity`, `String`, ...)
    #[serde(default)]
    pub choice_type_paths: FxHashMap<String, Vec<String>>,
    /// Paths whose definition lives at another path (`Questionnaire.item.item` -> `Questionnaire.item`)
    #[serde(default)]
    pub paths_defined_elsewhere: FxHashMap<String, String>,
    #[serde(default, rename = "type2Parent")]
    pub type_to_parent: FxHashMap<String, String>,
    #[serde(default, rename = "path2Type")]
    pub path_to_type: FxHashMap<String, String>,
    /// Resource types that support the `url` search parameter
    #[serde(default)]
    pub resources_with_url_param: Option<FxHashSet<String>>,
    #[serde(default)]
    pub score: Option<ScoreConfig>,
}

impl Model {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn with_choice_type_path(
        mut self,
        path: impl Into<String>,
        suffixes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.choice_type_paths
            .insert(path.into(), suffixes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_path_type(mut self, path: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.path_to_type.insert(path.into(), type_name.into());
        self
    }

    pub fn with_parent_type(mut self, type_name: impl Into<String>, parent: impl Into<String>) -> Self {
        self.type_to_parent.insert(type_name.into(), parent.into());
        self
    }

    pub fn with_path_defined_elsewhere(
        mut self,
        path: impl Into<String>,
        canonical: impl Into<String>,
    ) -> Self {
        self.paths_defined_elsewhere.insert(path.into(), canonical.into());
        self
    }

    pub fn with_score(mut self, score: ScoreConfig) -> Self {
        self.score = Some(score);
        self
    }

    /// Canonical path for type lookups
    pub fn canonical_path<'a>(&'a self, path: &'a str) -> &'a str {
        self.paths_defined_elsewhere
            .get(path)
            .map(String::as_str)
            .unwrap_or(path)
    }

    pub fn choice_types(&self, path: &str) -> Option<&[String]> {
        self.choice_type_paths.get(path).map(Vec::as_slice)
    }

    pub fn path_type(&self, path: &str) -> Option<&str> {
        self.path_to_type.get(path).map(String::as_str)
    }

    pub fn parent_type(&self, type_name: &str) -> Option<&str> {
        self.type_to_parent.get(type_name).map(String::as_str)
    }

    /// Whether `name` is a type this model knows about
    pub fn is_known_type(&self, name: &str) -> bool {
        self.type_to_parent.contains_key(name)
            || self.type_to_parent.values().any(|parent| parent == name)
    }

    pub fn has_url_param(&self, resource_type: &str) -> bool {
        self.resources_with_url_param
            .as_ref()
            .is_some_and(|types| types.contains(resource_type))
    }

    /// R5 renamed several terminology operation parameters
    pub fn is_r5_or_later(&self) -> bool {
        let version = self.version.to_ascii_lowercase();
        version.starts_with("r5") || version.starts_with("r6")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_model_deserializes_generated_field_names() {
        let model: Model = serde_json::from_value(json!({
            "version": "r4",
            "choiceTypePaths": {"Observation.value": ["Quantity", "String"]},
            "pathsDefinedElsewhere": {"Questionnaire.item.item": "Questionnaire.item"},
            "type2Parent": {"Patient": "DomainResource", "DomainResource": "Resource"},
            "path2Type": {"Patient.birthDate": "date"},
            "resourcesWithUrlParam": ["ValueSet", "CodeSystem"],
            "score": {"propertyURI": "http://hl7.org/fhir/concept-properties#itemWeight",
                      "extensionURI": ["http://hl7.org/fhir/StructureDefinition/itemWeight"]}
        }))
        .unwrap();

        assert_eq!(model.choice_types("Observation.value").unwrap().len(), 2);
        assert_eq!(model.canonical_path("Questionnaire.item.item"), "Questionnaire.item");
        assert_eq!(model.parent_type("Patient"), Some("DomainResource"));
        assert_eq!(model.path_type("Patient.birthDate"), Some("date"));
        assert!(model.has_url_param("ValueSet"));
        assert!(model.is_known_type("Resource"));
        assert!(!model.is_r5_or_later());
        assert_eq!(model.score.unwrap().extension_uri.len(), 1);
    }
}
