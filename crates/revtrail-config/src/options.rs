//! Store-level audit options.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// When audit events are handed to the sink.
///
/// Parses from its snake_case name, ignoring ASCII case.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum EventCreationPolicy {
    /// Emit once, after the commit.
    #[default]
    InsertOnEnd,
    /// Emit before the commit and replace the same event afterwards.
    InsertOnStartReplaceOnEnd,
    /// Emit before the commit and insert a second event afterwards.
    InsertOnStartInsertOnEnd,
}

impl EventCreationPolicy {
    /// Whether a started event is emitted before the commit.
    pub fn emits_early(&self) -> bool {
        !matches!(self, Self::InsertOnEnd)
    }
}

/// Options controlling how a store is audited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditOptions {
    /// Keep a reference to the originating record on each entry.
    ///
    /// The record is attached as-is. Source actions and anything else reading
    /// [`ChangeEntry::raw_record`](revtrail_types::ChangeEntry::raw_record)
    /// see the live values of ignored and overridden columns, not the masked
    /// ones.
    pub include_entity_objects: bool,
    /// Event emission policy.
    pub creation_policy: EventCreationPolicy,
    /// Event type template; `{context}` and `{database}` are substituted.
    pub event_type: String,
    /// Leave transaction identifiers out of events.
    pub exclude_transaction_id: bool,
    /// Commit without capturing anything.
    pub audit_disabled: bool,
    /// Do not copy same-named entry columns into target records.
    pub ignore_matched_properties: bool,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            include_entity_objects: false,
            creation_policy: EventCreationPolicy::default(),
            event_type: "{context}:{database}".to_string(),
            exclude_transaction_id: false,
            audit_disabled: false,
            ignore_matched_properties: false,
        }
    }
}

impl AuditOptions {
    /// Render the event type for a store.
    pub fn render_event_type(&self, context: &str, database: Option<&str>) -> String {
        self.event_type
            .replace("{context}", context)
            .replace("{database}", database.unwrap_or_default())
    }
}
