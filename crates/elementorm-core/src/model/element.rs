//! Elements: the entities queried, cached and tracked by the engine.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::Value;

/// Identity of an element in the underlying store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub i64);

impl ElementId {
    /// Raw integer value of this id.
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ElementId {
    fn from(v: i64) -> Self {
        ElementId(v)
    }
}

impl From<i32> for ElementId {
    fn from(v: i32) -> Self {
        ElementId(v as i64)
    }
}

/// A typed element with a map of named fields.
///
/// The element type (e.g. `"Wall"`, `"Door"`) selects which provider
/// collection the element belongs to; all other data lives in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Element identity.
    pub id: ElementId,
    /// Element type name.
    pub element_type: String,
    /// Field values keyed by field name.
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Element {
    /// Create an element with no fields.
    pub fn new(id: impl Into<ElementId>, element_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            element_type: element_type.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a field value, treating a missing field as null.
    pub fn get_or_null(&self, field: &str) -> Value {
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }

    /// Resolve a field for queries.
    ///
    /// Stored fields win; otherwise `id` and `element_type` resolve to the
    /// element's identity and type.
    pub fn resolve(&self, field: &str) -> Option<Cow<'_, Value>> {
        if let Some(value) = self.fields.get(field) {
            return Some(Cow::Borrowed(value));
        }
        match field {
            "id" => Some(Cow::Owned(Value::Int(self.id.value()))),
            "element_type" => Some(Cow::Owned(Value::String(self.element_type.clone()))),
            _ => None,
        }
    }

    /// Set a field value, returning the previous value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Names of all fields in sorted order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Check if this element is of the given type.
    pub fn is_type(&self, element_type: &str) -> bool {
        self.element_type == element_type
    }

    /// Keep only the named fields.
    pub fn project(&self, fields: &[String]) -> Element {
        let kept = fields
            .iter()
            .filter_map(|name| self.fields.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        Element {
            id: self.id,
            element_type: self.element_type.clone(),
            fields: kept,
        }
    }

    /// Parse an element from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize this element as JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
