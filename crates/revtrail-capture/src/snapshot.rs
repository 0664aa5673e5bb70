//! Pending mutations as reported by a tracked store.

use revtrail_types::{ChangeAction, FieldValue, RawRecord};

/// Tracking state of a record in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Added,
    Modified,
    Deleted,
    Unchanged,
}

impl MutationKind {
    /// The audited action, `None` for unchanged records.
    pub fn action(&self) -> Option<ChangeAction> {
        match self {
            Self::Added => Some(ChangeAction::Insert),
            Self::Modified => Some(ChangeAction::Update),
            Self::Deleted => Some(ChangeAction::Delete),
            Self::Unchanged => None,
        }
    }
}

/// One field of a tracked record.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldState {
    /// Field name.
    pub name: String,
    /// Value when the record was loaded; `None` for added records.
    pub original: Option<FieldValue>,
    /// Value now.
    pub current: FieldValue,
    /// The store assigns the value on insert.
    pub store_generated: bool,
}

impl FieldState {
    /// A field of an added record.
    pub fn new(name: impl Into<String>, current: FieldValue) -> Self {
        Self {
            name: name.into(),
            original: None,
            current,
            store_generated: false,
        }
    }

    /// A field with a tracked original value.
    pub fn tracked(name: impl Into<String>, original: FieldValue, current: FieldValue) -> Self {
        Self {
            original: Some(original),
            ..Self::new(name, current)
        }
    }

    /// A field whose value the store assigns when the record is inserted.
    pub fn generated(name: impl Into<String>) -> Self {
        Self {
            store_generated: true,
            ..Self::new(name, FieldValue::Null)
        }
    }

    /// Whether the value differs from the original.
    pub fn is_modified(&self) -> bool {
        self.original.as_ref().is_some_and(|original| *original != self.current)
    }

    /// The value before the mutation, falling back to the current one.
    pub fn original_or_current(&self) -> &FieldValue {
        self.original.as_ref().unwrap_or(&self.current)
    }
}

/// A record the store will write on the next commit.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    /// Record type name.
    pub record_type: String,
    /// Table name.
    pub table: String,
    /// Optional schema.
    pub schema: Option<String>,
    /// Tracking state.
    pub kind: MutationKind,
    /// Fields in declaration order.
    pub fields: Vec<FieldState>,
    /// Key field names in declaration order.
    pub key_fields: Vec<String>,
    /// The in-memory record itself.
    pub record: Option<RawRecord>,
}

impl PendingMutation {
    /// Create a mutation with no fields.
    pub fn new(record_type: impl Into<String>, table: impl Into<String>, kind: MutationKind) -> Self {
        Self {
            record_type: record_type.into(),
            table: table.into(),
            schema: None,
            kind,
            fields: Vec::new(),
            key_fields: Vec::new(),
            record: None,
        }
    }

    /// Set the schema.
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Append a field.
    pub fn with_field(mut self, field: FieldState) -> Self {
        self.fields.push(field);
        self
    }

    /// Append a key field and declare it part of the key.
    pub fn with_key_field(mut self, field: FieldState) -> Self {
        self.key_fields.push(field.name.clone());
        self.fields.push(field);
        self
    }

    /// Attach the in-memory record.
    pub fn with_record(mut self, record: RawRecord) -> Self {
        self.record = Some(record);
        self
    }

    /// Look up a field.
    pub fn field(&self, name: &str) -> Option<&FieldState> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether a field is part of the key.
    pub fn is_key(&self, name: &str) -> bool {
        self.key_fields.iter().any(|k| k == name)
    }
}
