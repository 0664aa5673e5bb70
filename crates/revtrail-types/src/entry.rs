//! Normalized change entries.

use crate::ChangeAction;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A captured column value.
pub type FieldValue = serde_json::Value;

/// Column values keyed by name, in declaration order.
pub type FieldMap = IndexMap<String, FieldValue>;

/// Shared handle to the in-memory record a mutation originated from.
///
/// Only attached to entries when entity objects are captured. It is never
/// serialized, so nothing reaches a sink through it.
#[derive(Clone)]
pub struct RawRecord(Arc<dyn Any + Send + Sync>);

impl RawRecord {
    /// Wrap a record value.
    pub fn new<T: Any + Send + Sync>(record: T) -> Self {
        Self(Arc::new(record))
    }

    /// Wrap an already shared record.
    pub fn from_arc(record: Arc<dyn Any + Send + Sync>) -> Self {
        Self(record)
    }

    /// Borrow the record as a concrete type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Check whether the record is of type `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }
}

impl fmt::Debug for RawRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawRecord(..)")
    }
}

/// One column that differs between the original and current record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnChange {
    /// Column name.
    pub column_name: String,
    /// Value before the mutation.
    pub original_value: FieldValue,
    /// Value after the mutation.
    pub new_value: FieldValue,
}

impl ColumnChange {
    /// Create a new column change.
    pub fn new(
        column_name: impl Into<String>,
        original_value: FieldValue,
        new_value: FieldValue,
    ) -> Self {
        Self {
            column_name: column_name.into(),
            original_value,
            new_value,
        }
    }
}

/// A normalized record of one tracked mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// Table the record lives in.
    pub table: String,
    /// Optional schema qualifying the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Mutation kind.
    pub action: ChangeAction,
    /// Name of the record type.
    pub record_type: String,
    /// Key columns in declaration order.
    #[serde(default)]
    pub primary_key: FieldMap,
    /// Column values after the mutation (before it, for deletes).
    #[serde(default)]
    pub column_values: FieldMap,
    /// Column-level diff, only populated for updates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<ColumnChange>,
    /// Originating record, when entity objects are captured.
    #[serde(skip)]
    pub raw_record: Option<RawRecord>,
    /// Free-form annotations added by mapping actions.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_fields: HashMap<String, serde_json::Value>,
}

impl ChangeEntry {
    /// Create an entry with no column data.
    pub fn new(
        record_type: impl Into<String>,
        table: impl Into<String>,
        action: ChangeAction,
    ) -> Self {
        Self {
            table: table.into(),
            schema: None,
            action,
            record_type: record_type.into(),
            primary_key: FieldMap::new(),
            column_values: FieldMap::new(),
            changes: Vec::new(),
            raw_record: None,
            custom_fields: HashMap::new(),
        }
    }

    /// Set the schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Add a column value.
    pub fn with_column(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.column_values.insert(name.into(), value);
        self
    }

    /// Add a key column value.
    pub fn with_key(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.primary_key.insert(name.into(), value);
        self
    }

    /// Attach the originating record.
    pub fn with_raw_record(mut self, record: RawRecord) -> Self {
        self.raw_record = Some(record);
        self
    }

    /// Schema-qualified table name.
    pub fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema, self.table),
            None => self.table.clone(),
        }
    }

    /// Look up a captured column value.
    pub fn column(&self, name: &str) -> Option<&FieldValue> {
        self.column_values.get(name)
    }

    /// Find the diff for a column, if it changed.
    pub fn change_for(&self, name: &str) -> Option<&ColumnChange> {
        self.changes.iter().find(|c| c.column_name == name)
    }

    /// Borrow the originating record as a concrete type.
    pub fn raw<T: Any>(&self) -> Option<&T> {
        self.raw_record.as_ref().and_then(|r| r.downcast_ref::<T>())
    }

    /// Annotate the entry.
    pub fn set_custom_field(&mut self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(json) = serde_json::to_value(value) {
            self.custom_fields.insert(key.into(), json);
        }
    }

    /// Record a key value produced by the store.
    ///
    /// The key map always receives the value; the column map only does when
    /// `include_column` is set, so both hold the identical value.
    pub fn fill_key(&mut self, name: &str, value: FieldValue, include_column: bool) {
        if include_column {
            self.column_values.insert(name.to_string(), value.clone());
        }
        self.primary_key.insert(name.to_string(), value);
    }

    /// Check the action/diff invariant.
    pub fn is_consistent(&self) -> bool {
        self.action.tracks_changes() || self.changes.is_empty()
    }
}
