//! Target audit record shapes.

use crate::FieldValue;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Describes a kind of audit record a change entry can be mapped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetType {
    name: String,
    fields: Option<IndexSet<String>>,
}

impl TargetType {
    /// Create a target type that declares no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: None,
        }
    }

    /// Declare the fields this target type carries.
    ///
    /// Declared fields are filled from same-named entry columns when a record
    /// is materialized.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Target type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the type declares a field with this name.
    pub fn declares(&self, field: &str) -> bool {
        self.fields.as_ref().is_some_and(|f| f.contains(field))
    }

    /// Create an empty record of this type.
    pub fn instantiate(&self) -> AuditRecord {
        AuditRecord::new(self.name.clone())
    }
}

/// An instance of a target audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Name of the target type.
    pub target_type: String,
    /// Field values.
    #[serde(default)]
    pub fields: IndexMap<String, FieldValue>,
}

impl AuditRecord {
    /// Create an empty record.
    pub fn new(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            fields: IndexMap::new(),
        }
    }

    /// Set a field value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Get a field value.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}
