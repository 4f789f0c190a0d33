//! Member navigation over document nodes
//!
//! Handles:
//! - Field access, flattening array-valued fields one level
//! - Choice types (`value` finding `valueString` or `valueQuantity`)
//! - Primitive extensions held in the `_field` sibling
//! - The capitalised type-filter form (`Observation.value.Quantity`, `Bundle.entry.resource.Patient`)
//! - `children()` and `descendants()`

use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::core::type_info::type_for_choice_suffix;
use crate::core::{Collection, FhirPathValue, Model, PathStep, TypeSpecifier, ValueNode};

/// Navigates document nodes with the help of an optional schema model
pub struct Navigator<'a> {
    model: Option<&'a Arc<Model>>,
}

impl<'a> Navigator<'a> {
    pub fn new(model: Option<&'a Arc<Model>>) -> Self {
        Self { model }
    }

    fn is_type_name(&self, name: &str) -> bool {
        name.starts_with(|c: char| c.is_ascii_uppercase())
            && self.model.is_some_and(|m| m.is_known_type(name))
    }

    /// Resolve `name` against every item of `input`
    pub fn navigate(&self, input: &Collection, name: &str) -> Collection {
        if self.is_type_name(name) {
            let specifier = TypeSpecifier::parse(name);
            let model = self.model.map(Arc::as_ref);
            return input
                .iter()
                .filter(|item| item.type_info().is(&specifier, model))
                .cloned()
                .collect();
        }
        let mut result = Collection::empty();
        for item in input {
            match item {
                FhirPathValue::Node(node) if node.resource_type() == Some(name) => {
                    result.push(item.clone());
                }
                FhirPathValue::Node(node) => result.extend(self.member(node, name).into()),
                FhirPathValue::TypeInfo(info) => match name {
                    "name" => result.push(FhirPathValue::String(info.name.clone())),
                    "namespace" => result.push(FhirPathValue::String(info.namespace.as_str().to_string())),
                    _ => {}
                },
                _ => {}
            }
        }
        result
    }

    /// Schema path of the child `name`, preferring one the model knows
    fn child_path(&self, node: &ValueNode, name: &str) -> Option<String> {
        let mut candidates = Vec::new();
        if let Some(path) = node.path() {
            candidates.push(format!("{path}.{name}"));
        }
        if let Some(declared) = node.declared_type() {
            candidates.push(format!("{declared}.{name}"));
        }
        let Some(model) = self.model else {
            return candidates.into_iter().next();
        };
        let canonical: Vec<String> = candidates
            .iter()
            .map(|c| model.canonical_path(c).to_string())
            .collect();
        canonical
            .iter()
            .find(|p| model.path_type(p).is_some() || model.choice_types(p).is_some())
            .or_else(|| canonical.first())
            .cloned()
    }

    fn member(&self, node: &Arc<ValueNode>, name: &str) -> Vec<FhirPathValue> {
        let JsonValue::Object(map) = node.data() else {
            // `id` and `extension` of a primitive live in its sibling
            return match node.sibling().and_then(|s| s.get(name)) {
                Some(value) => self.wrap(node, name, Some(value), None, None, None),
                None => Vec::new(),
            };
        };
        let path = self.child_path(node, name);

        if let (Some(model), Some(path)) = (self.model, path.as_deref()) {
            if let Some(suffixes) = model.choice_types(path) {
                for suffix in suffixes {
                    let field = format!("{name}{suffix}");
                    let value = map.get(&field);
                    let sibling = map.get(&format!("_{field}"));
                    if value.is_some() || sibling.is_some() {
                        let declared = type_for_choice_suffix(suffix);
                        return self.wrap(node, &field, value, sibling, Some(path), Some(declared));
                    }
                }
                return Vec::new();
            }
        }

        let declared = match (self.model, path.as_deref()) {
            (Some(model), Some(path)) => model.path_type(path).map(str::to_string),
            _ => None,
        };
        self.wrap(
            node,
            name,
            map.get(name),
            map.get(&format!("_{name}")),
            path.as_deref(),
            declared,
        )
    }

    /// Wrap a field's value (and its `_field` sibling) as child nodes
    fn wrap(
        &self,
        parent: &Arc<ValueNode>,
        field: &str,
        value: Option<&JsonValue>,
        sibling: Option<&JsonValue>,
        path: Option<&str>,
        declared: Option<String>,
    ) -> Vec<FhirPathValue> {
        let make = |data: JsonValue, step: PathStep, sibling: Option<JsonValue>| {
            FhirPathValue::Node(ValueNode::make(
                data,
                Some(Arc::clone(parent)),
                Some(step),
                path.map(str::to_string),
                sibling,
                declared.clone(),
                self.model.cloned(),
            ))
        };
        match (value, sibling) {
            (Some(JsonValue::Array(items)), sibling) => {
                let siblings = sibling.and_then(JsonValue::as_array);
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, item)| {
                        let extra = siblings.and_then(|s| s.get(i)).filter(|s| !s.is_null()).cloned();
                        if item.is_null() && extra.is_none() {
                            None
                        } else {
                            Some(make(item.clone(), PathStep::indexed(field, i), extra))
                        }
                    })
                    .collect()
            }
            (Some(JsonValue::Null) | None, Some(JsonValue::Array(extras))) => extras
                .iter()
                .enumerate()
                .filter(|(_, extra)| !extra.is_null())
                .map(|(i, extra)| make(JsonValue::Null, PathStep::indexed(field, i), Some(extra.clone())))
                .collect(),
            (Some(JsonValue::Null) | None, Some(extra)) => {
                vec![make(JsonValue::Null, PathStep::field(field), Some(extra.clone()))]
            }
            (Some(JsonValue::Null) | None, None) => Vec::new(),
            (Some(item), sibling) => vec![make(item.clone(), PathStep::field(field), sibling.cloned())],
        }
    }

    /// Split `valueString` into `value` and `String` when the model lists the suffix
    fn choice_key(&self, node: &ValueNode, key: &str) -> Option<(String, String)> {
        let model = self.model?;
        let split = key.find(|c: char| c.is_ascii_uppercase())?;
        let (base, suffix) = key.split_at(split);
        let path = self.child_path(node, base)?;
        let suffixes = model.choice_types(&path)?;
        suffixes.iter().any(|s| s == suffix).then(|| (path, suffix.to_string()))
    }

    /// All direct child nodes of every item
    pub fn children(&self, input: &Collection) -> Collection {
        let mut result = Collection::empty();
        for item in input {
            let FhirPathValue::Node(node) = item else {
                continue;
            };
            let JsonValue::Object(map) = node.data() else {
                continue;
            };
            for key in map.keys() {
                if key == "resourceType" {
                    continue;
                }
                let field = match key.strip_prefix('_') {
                    Some(field) if map.contains_key(field) => continue,
                    Some(field) => field,
                    None => key.as_str(),
                };
                let value = map.get(field);
                let sibling = map.get(&format!("_{field}"));
                let children = match self.choice_key(node, field) {
                    Some((path, suffix)) => self.wrap(
                        node,
                        field,
                        value,
                        sibling,
                        Some(&path),
                        Some(type_for_choice_suffix(&suffix)),
                    ),
                    None => {
                        let path = self.child_path(node, field);
                        let declared = match (self.model, path.as_deref()) {
                            (Some(model), Some(path)) => model.path_type(path).map(str::to_string),
                            _ => None,
                        };
                        self.wrap(node, field, value, sibling, path.as_deref(), declared)
                    }
                };
                for child in children {
                    result.push(child);
                }
            }
        }
        result
    }

    /// Breadth-first expansion of all nested child nodes
    pub fn descendants(&self, input: &Collection) -> Collection {
        let mut result = Collection::empty();
        let mut frontier = self.children(input);
        while !frontier.is_empty() {
            let next = self.children(&frontier);
            result.extend(frontier);
            frontier = next;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TypeInfo;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn observation_model() -> Arc<Model> {
        Arc::new(
            Model::new("r4")
                .with_choice_type_path("Observation.value", ["Quantity", "String"])
                .with_path_type("Observation.status", "code")
                .with_path_type("Patient.birthDate", "date")
                .with_parent_type("Observation", "DomainResource")
                .with_parent_type("Patient", "DomainResource")
                .with_parent_type("DomainResource", "Resource"),
        )
    }

    fn root(data: JsonValue, model: &Arc<Model>) -> Collection {
        Collection::single(FhirPathValue::Node(ValueNode::root(data, Some(Arc::clone(model)))))
    }

    #[test]
    fn test_choice_type_resolves_suffix() {
        let model = observation_model();
        let input = root(json!({"resourceType": "Observation", "valueString": "high"}), &model);
        let navigator = Navigator::new(Some(&model));
        let value = navigator.navigate(&input, "value");
        assert_eq!(value.len(), 1);
        assert_eq!(value[0].type_info(), TypeInfo::model("string"));
        assert_eq!(value[0].element_path().as_deref(), Some("Observation.valueString"));
        assert!(matches!(value[0].to_primitive(), FhirPathValue::String(s) if s == "high"));
    }

    #[test]
    fn test_arrays_flatten_and_carry_indices() {
        let model = observation_model();
        let input = root(json!({"resourceType": "Patient", "name": [{"given": ["a", "b"]}, {"given": ["c"]}]}), &model);
        let navigator = Navigator::new(Some(&model));
        let given = navigator.navigate(&navigator.navigate(&input, "name"), "given");
        assert_eq!(given.len(), 3);
        assert_eq!(given[2].element_path().as_deref(), Some("Patient.name[1].given[0]"));
    }

    #[test]
    fn test_primitive_extensions() {
        let model = observation_model();
        let input = root(
            json!({
                "resourceType": "Patient",
                "_birthDate": {"extension": [{"url": "http://example.org/x", "valueString": "unknown"}]}
            }),
            &model,
        );
        let navigator = Navigator::new(Some(&model));
        let birth_date = navigator.navigate(&input, "birthDate");
        assert_eq!(birth_date.len(), 1);
        let extension = navigator.navigate(&birth_date, "extension");
        assert_eq!(extension.len(), 1);
    }

    #[test]
    fn test_capitalised_name_filters_by_type() {
        let model = observation_model();
        let input = root(json!({"resourceType": "Patient"}), &model);
        let navigator = Navigator::new(Some(&model));
        assert_eq!(navigator.navigate(&input, "Patient").len(), 1);
        assert_eq!(navigator.navigate(&input, "Resource").len(), 1);
        assert!(navigator.navigate(&input, "Observation").is_empty());
    }

    #[test]
    fn test_children_and_descendants() {
        let input = Collection::single(FhirPathValue::Node(ValueNode::root(
            json!({"resourceType": "Patient", "name": [{"given": ["a"]}], "active": true}),
            None,
        )));
        let navigator = Navigator::new(None);
        assert_eq!(navigator.children(&input).len(), 2);
        assert_eq!(navigator.descendants(&input).len(), 3);
    }
}
