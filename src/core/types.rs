//! The collection type every expression evaluates to

use std::ops::Index;

use serde_json::Value as JsonValue;

use crate::core::error_code::{FP0051, FP0052};
use crate::core::value::FhirPathValue;
use crate::core::{FhirPathError, Result};

/// Ordered sequence of values; absence of a value is an empty collection
#[derive(Debug, Clone, Default)]
pub struct Collection(Vec<FhirPathValue>);

impl Collection {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn single(value: FhirPathValue) -> Self {
        Self(vec![value])
    }

    pub fn from_values(values: Vec<FhirPathValue>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&FhirPathValue> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&FhirPathValue> {
        self.0.last()
    }

    pub fn get(&self, index: usize) -> Option<&FhirPathValue> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FhirPathValue> {
        self.0.iter()
    }

    pub fn push(&mut self, value: FhirPathValue) {
        self.0.push(value);
    }

    pub fn extend(&mut self, other: Collection) {
        self.0.extend(other.0);
    }

    pub fn as_slice(&self) -> &[FhirPathValue] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<FhirPathValue> {
        self.0
    }

    /// At most one item, raising a descriptive error otherwise
    pub fn singleton(&self, what: &str) -> Result<Option<&FhirPathValue>> {
        match self.0.len() {
            0 => Ok(None),
            1 => Ok(self.0.first()),
            n => Err(FhirPathError::type_error(
                FP0052,
                format!("{what} expects a single item but the collection has {n}: {}", self.describe()),
            )
            .with_path(self.0.first().and_then(FhirPathValue::element_path))),
        }
    }

    /// Singleton evaluation of collections in a boolean context
    ///
    /// A lone boolean is itself, any other lone item counts as `true`.
    pub fn to_boolean(&self, what: &str) -> Result<Option<bool>> {
        match self.singleton(what)? {
            None => Ok(None),
            Some(value) => match value.to_primitive() {
                FhirPathValue::Boolean(b) => Ok(Some(b)),
                _ => Ok(Some(true)),
            },
        }
    }

    /// Like [`Collection::to_boolean`] but rejects non-boolean items
    pub fn to_strict_boolean(&self, what: &str) -> Result<Option<bool>> {
        match self.singleton(what)? {
            None => Ok(None),
            Some(value) => match value.to_primitive() {
                FhirPathValue::Boolean(b) => Ok(Some(b)),
                other => Err(FhirPathError::type_error(
                    FP0051,
                    format!("{what} expects a Boolean but got {}", other.type_name()),
                )),
            },
        }
    }

    /// Short rendering for diagnostics
    pub fn describe(&self) -> String {
        let items: Vec<String> = self.0.iter().take(5).map(|v| v.to_string()).collect();
        let more = if self.0.len() > 5 { ", ..." } else { "" };
        format!("[{}{more}]", items.join(", "))
    }

    /// JSON array of the items
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(self.0.iter().map(FhirPathValue::to_json).collect())
    }
}

impl Index<usize> for Collection {
    type Output = FhirPathValue;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

impl IntoIterator for Collection {
    type Item = FhirPathValue;
    type IntoIter = std::vec::IntoIter<FhirPathValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Collection {
    type Item = &'a FhirPathValue;
    type IntoIter = std::slice::Iter<'a, FhirPathValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl FromIterator<FhirPathValue> for Collection {
    fn from_iter<I: IntoIterator<Item = FhirPathValue>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<FhirPathValue>> for Collection {
    fn from(values: Vec<FhirPathValue>) -> Self {
        Self(values)
    }
}

impl From<FhirPathValue> for Collection {
    fn from(value: FhirPathValue) -> Self {
        Self::single(value)
    }
}

impl From<Option<FhirPathValue>> for Collection {
    fn from(value: Option<FhirPathValue>) -> Self {
        value.map_or_else(Self::empty, Self::single)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singleton_rejects_many() {
        let collection = Collection::from_values(vec![1i64.into(), 2i64.into()]);
        let err = collection.singleton("substring()").unwrap_err();
        assert!(err.to_string().contains("substring() expects a single item"));
        assert!(err.to_string().contains("[1, 2]"));
    }

    #[test]
    fn test_boolean_singleton_evaluation() {
        assert_eq!(Collection::empty().to_boolean("and").unwrap(), None);
        assert_eq!(Collection::single(false.into()).to_boolean("and").unwrap(), Some(false));
        assert_eq!(Collection::single("x".into()).to_boolean("and").unwrap(), Some(true));
        assert!(Collection::single("x".into()).to_strict_boolean("not()").is_err());
    }
}
