//! Change entry and audit event types for Revtrail.
//!
//! These are the values that flow through the capture pipeline: normalized
//! [`ChangeEntry`] records produced from a store's pending mutations, the
//! [`AuditRecord`] instances they are mapped to, and the [`AuditEvent`] that
//! aggregates both for a single unit of mutation.

mod action;
mod entry;
mod event;
mod id;
mod record;

pub use action::ChangeAction;
pub use entry::{ChangeEntry, ColumnChange, FieldMap, FieldValue, RawRecord};
pub use event::{AuditEvent, CommitResult, EventEntry, MappedRecord};
pub use id::EventId;
pub use record::{AuditRecord, TargetType};
