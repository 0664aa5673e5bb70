//! Audit event aggregating the entries of one unit of mutation.

use crate::{AuditRecord, ChangeEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Result of the underlying commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitResult {
    /// The commit has not run yet.
    #[default]
    Pending,
    /// The commit completed and touched this many rows.
    RowsAffected(u64),
}

/// A target record produced for an entry, with the verdict of its actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRecord {
    /// The populated record.
    pub record: AuditRecord,
    /// Whether every action accepted the record.
    pub accepted: bool,
}

/// A change entry and the target records produced from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    /// The captured change.
    #[serde(flatten)]
    pub entry: ChangeEntry,
    /// Target records, empty when no mapping matched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<MappedRecord>,
}

impl EventEntry {
    /// Wrap an entry that produced no target.
    pub fn unmapped(entry: ChangeEntry) -> Self {
        Self {
            entry,
            targets: Vec::new(),
        }
    }

    /// Whether the entry was materialized into a target record.
    pub fn is_mapped(&self) -> bool {
        !self.targets.is_empty()
    }
}

/// A complete audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Rendered event type.
    pub event_type: String,
    /// Name of the audited store.
    pub context_name: String,
    /// Database the store is connected to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Connection correlation identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    /// Transaction correlation identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    /// Who performed the mutation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Captured entries in registration order.
    pub entries: Vec<EventEntry>,
    /// Commit result.
    pub result: CommitResult,
    /// Whether the unit completed successfully.
    pub success: bool,
    /// Error message when the unit failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the unit started.
    pub started_at: DateTime<Utc>,
    /// When the unit finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Additional context data.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub custom_fields: HashMap<String, serde_json::Value>,
}

impl AuditEvent {
    /// Create an event for a unit that is just starting.
    pub fn new(event_type: impl Into<String>, context_name: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            context_name: context_name.into(),
            database: None,
            connection_id: None,
            transaction_id: None,
            actor: None,
            entries: Vec::new(),
            result: CommitResult::Pending,
            success: false,
            error_message: None,
            started_at: Utc::now(),
            ended_at: None,
            custom_fields: HashMap::new(),
        }
    }

    /// Add a custom field.
    pub fn set_custom_field(&mut self, key: impl Into<String>, value: impl Serialize) {
        if let Ok(json) = serde_json::to_value(value) {
            self.custom_fields.insert(key.into(), json);
        }
    }

    /// Mark the event failed with the given message.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.error_message = Some(message.into());
    }

    /// Stamp the end of the unit.
    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Duration of the unit in milliseconds, once it ended.
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    /// Iterate the accepted target records of every entry.
    pub fn accepted_records(&self) -> impl Iterator<Item = &AuditRecord> {
        self.entries
            .iter()
            .flat_map(|e| e.targets.iter())
            .filter(|t| t.accepted)
            .map(|t| &t.record)
    }
}
