//! Assembly of audit events from captured entries.

use crate::capture::CapturedEntry;
use crate::config::AuditConfiguration;
use crate::snapshot::PendingMutation;
use crate::store::{CommitOutcome, StoreInfo};
use revtrail_mapping::ActionError;
use revtrail_types::{AuditEvent, CommitResult, EventEntry};
use serde_json::Value;
use std::collections::HashMap;
use tracing::trace;

/// Builds the event for one unit: first the started form, then the
/// completed form once the commit result is known.
pub struct EventAssembler<'c> {
    config: &'c AuditConfiguration,
}

impl<'c> EventAssembler<'c> {
    /// Assemble events with the options and mapper of `config`.
    pub fn new(config: &'c AuditConfiguration) -> Self {
        Self { config }
    }

    /// Create the started event for a store.
    pub fn begin(
        &self,
        info: &StoreInfo,
        actor: Option<&str>,
        custom_fields: &HashMap<String, Value>,
    ) -> AuditEvent {
        let options = self.config.options();
        let mut event = AuditEvent::new(
            options.render_event_type(&info.context_name, info.database.as_deref()),
            info.context_name.clone(),
        );
        event.database = info.database.clone();
        event.connection_id = info.connection_id.clone();
        if !options.exclude_transaction_id {
            event.transaction_id = info.transaction_id.clone();
        }
        event.actor = actor.map(str::to_string);
        event
            .custom_fields
            .extend(custom_fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        event
    }

    /// Map every captured entry and append it to the event.
    ///
    /// Returns the snapshot index of each appended entry. When an action
    /// fails, the remaining entries are appended unmapped and the error is
    /// returned.
    pub async fn map_entries(
        &self,
        event: &mut AuditEvent,
        captured: Vec<CapturedEntry>,
    ) -> Result<Vec<usize>, ActionError> {
        let copy_matched = !self.config.options().ignore_matched_properties;
        let mapper = self.config.mapper();
        let mut sources = Vec::with_capacity(captured.len());
        let mut pending = captured.into_iter();

        while let Some(CapturedEntry { source, mut entry }) = pending.next() {
            let mapped = mapper.materialize(event, &mut entry, copy_matched).await;
            sources.push(source);
            match mapped {
                Ok(target) => event.entries.push(EventEntry {
                    entry,
                    targets: target.into_iter().collect(),
                }),
                Err(err) => {
                    event.entries.push(EventEntry::unmapped(entry));
                    event
                        .entries
                        .extend(pending.map(|c| EventEntry::unmapped(c.entry)));
                    return Err(err);
                }
            }
        }

        Ok(sources)
    }

    /// Turn the event into its completed form after a successful commit.
    pub fn complete(
        &self,
        event: &mut AuditEvent,
        sources: &[usize],
        mutations: &[PendingMutation],
        outcome: &CommitOutcome,
    ) {
        event.result = CommitResult::RowsAffected(outcome.rows_affected);
        event.success = true;
        event.error_message = None;
        self.backfill(event, sources, mutations, outcome);
        event.end();
    }

    /// Turn the event into its failed form.
    pub fn fail(&self, event: &mut AuditEvent, message: impl Into<String>) {
        event.fail(message);
        event.end();
    }

    /// Copy store-assigned values into entries and their target records.
    ///
    /// Key fields always reach the key map. The column map receives a value
    /// unless the field is ignored or overridden. Target records receive it
    /// when their type declares the field.
    pub fn backfill(
        &self,
        event: &mut AuditEvent,
        sources: &[usize],
        mutations: &[PendingMutation],
        outcome: &CommitOutcome,
    ) {
        let copy_matched = !self.config.options().ignore_matched_properties;

        for (event_entry, source) in event.entries.iter_mut().zip(sources) {
            let Some(values) = outcome.generated_keys.get(source) else {
                continue;
            };
            let mutation = mutations.get(*source);
            let settings = self.config.resolver().resolve(&event_entry.entry.record_type);
            let target = if copy_matched {
                self.config.mapper().resolve_target(&event_entry.entry)
            } else {
                None
            };

            for (name, value) in values {
                let column = settings
                    .as_deref()
                    .map_or(true, |s| !s.is_ignored(name) && s.override_for(name).is_none());
                let is_key = mutation.is_some_and(|m| m.is_key(name));

                if is_key {
                    event_entry.entry.fill_key(name, value.clone(), column);
                } else if column {
                    event_entry
                        .entry
                        .column_values
                        .insert(name.clone(), value.clone());
                }

                if let Some(target) = target.as_ref().filter(|t| t.declares(name)) {
                    for mapped in event_entry
                        .targets
                        .iter_mut()
                        .filter(|m| m.record.target_type == target.name())
                    {
                        mapped.record.set(name.clone(), value.clone());
                    }
                }
            }

            trace!(
                record_type = %event_entry.entry.record_type,
                values = values.len(),
                "back-filled generated values"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{FieldState, MutationKind};
    use crate::EntryCapturer;
    use revtrail_config::{AuditOptions, SettingsTier, TypeSettings};
    use revtrail_mapping::{ActionShape, TypeMapper};
    use revtrail_types::TargetType;
    use serde_json::json;

    fn config(options: AuditOptions) -> AuditConfiguration {
        AuditConfiguration::builder()
            .options(options)
            .global_tier(
                SettingsTier::new().with_type("User", TypeSettings::new().ignore("Password")),
            )
            .mapper(
                TypeMapper::builder()
                    .map("User", TargetType::new("UserAudit").with_fields(["Id", "Name"]))
                    .build(),
            )
            .build()
            .unwrap()
    }

    fn insert() -> Vec<PendingMutation> {
        vec![PendingMutation::new("User", "users", MutationKind::Added)
            .with_key_field(FieldState::generated("Id"))
            .with_field(FieldState::new("Name", json!("test")))
            .with_field(FieldState::new("Password", json!("secret")))]
    }

    #[test]
    fn test_begin_renders_metadata() {
        let config = config(AuditOptions {
            exclude_transaction_id: true,
            ..Default::default()
        });
        let info = StoreInfo::new("Shop")
            .with_database("main")
            .with_connection("conn-1")
            .with_transaction("tx-9");
        let mut custom = HashMap::new();
        custom.insert("tenant".to_string(), json!("acme"));

        let event = EventAssembler::new(&config).begin(&info, Some("alice"), &custom);
        assert_eq!(event.event_type, "Shop:main");
        assert_eq!(event.connection_id.as_deref(), Some("conn-1"));
        assert!(event.transaction_id.is_none());
        assert_eq!(event.actor.as_deref(), Some("alice"));
        assert_eq!(event.custom_fields["tenant"], json!("acme"));
    }

    #[tokio::test]
    async fn test_generated_key_is_backfilled() {
        let config = config(AuditOptions::default());
        let assembler = EventAssembler::new(&config);
        let mutations = insert();
        let captured = EntryCapturer::new(config.resolver(), false).capture(&mutations);

        let mut event = assembler.begin(&StoreInfo::new("Shop"), None, &HashMap::new());
        let sources = assembler.map_entries(&mut event, captured).await.unwrap();

        let before = &event.entries[0];
        assert_eq!(before.entry.column_values.len(), 1);
        assert_eq!(before.entry.column("Name"), Some(&json!("test")));
        assert!(before.targets[0].record.get("Id").is_none());

        let outcome = CommitOutcome::new(1).with_generated(0, "Id", json!(42));
        assembler.complete(&mut event, &sources, &mutations, &outcome);

        let after = &event.entries[0];
        assert_eq!(after.entry.primary_key.get("Id"), Some(&json!(42)));
        assert_eq!(after.entry.column("Id"), Some(&json!(42)));
        assert_eq!(after.entry.column("Name"), Some(&json!("test")));
        assert!(after.entry.column("Password").is_none());
        assert_eq!(after.targets[0].record.get("Id"), Some(&json!(42)));
        assert!(event.success);
        assert_eq!(event.result, CommitResult::RowsAffected(1));
        assert!(event.ended_at.is_some());
    }

    #[tokio::test]
    async fn test_backfill_skips_records_without_matched_copy() {
        let config = config(AuditOptions {
            ignore_matched_properties: true,
            ..Default::default()
        });
        let assembler = EventAssembler::new(&config);
        let mutations = insert();
        let captured = EntryCapturer::new(config.resolver(), false).capture(&mutations);

        let mut event = assembler.begin(&StoreInfo::new("Shop"), None, &HashMap::new());
        let sources = assembler.map_entries(&mut event, captured).await.unwrap();
        let outcome = CommitOutcome::new(1).with_generated(0, "Id", json!(7));
        assembler.complete(&mut event, &sources, &mutations, &outcome);

        assert_eq!(event.entries[0].entry.column("Id"), Some(&json!(7)));
        assert!(event.entries[0].targets[0].record.fields.is_empty());
    }

    #[tokio::test]
    async fn test_action_failure_keeps_every_entry() {
        let config = AuditConfiguration::builder()
            .mapper(
                TypeMapper::builder()
                    .map("User", TargetType::new("UserAudit"))
                    .with_action(
                        "User",
                        ActionShape::fallible(|_, entry, _| {
                            if entry.column("Name") == Some(&json!("bad")) {
                                Err("rejected")
                            } else {
                                Ok(true)
                            }
                        }),
                    )
                    .build(),
            )
            .build()
            .unwrap();
        let assembler = EventAssembler::new(&config);
        let mutations: Vec<_> = ["ok", "bad", "late"]
            .into_iter()
            .map(|name| {
                PendingMutation::new("User", "users", MutationKind::Added)
                    .with_field(FieldState::new("Name", json!(name)))
            })
            .collect();
        let captured = EntryCapturer::new(config.resolver(), false).capture(&mutations);

        let mut event = assembler.begin(&StoreInfo::new("Shop"), None, &HashMap::new());
        let err = assembler.map_entries(&mut event, captured).await.unwrap_err();
        assert_eq!(err.to_string(), "rejected");
        assert_eq!(event.entries.len(), 3);
        assert!(event.entries[0].is_mapped());
        assert!(!event.entries[1].is_mapped());
        assert!(!event.entries[2].is_mapped());
    }

    #[test]
    fn test_fail_marks_event() {
        let config = config(AuditOptions::default());
        let assembler = EventAssembler::new(&config);
        let mut event = assembler.begin(&StoreInfo::new("Shop"), None, &HashMap::new());
        assembler.fail(&mut event, "deadlock detected");
        assert!(!event.success);
        assert_eq!(event.error_message.as_deref(), Some("deadlock detected"));
        assert!(event.ended_at.is_some());
    }
}
