//! Conversion of pending mutations into change entries.

use crate::snapshot::PendingMutation;
use revtrail_config::{MergedTypeSettings, OverrideContext, SettingsResolver};
use revtrail_types::{ChangeAction, ChangeEntry, ColumnChange};
use tracing::trace;

/// A change entry and the position of the mutation it came from.
#[derive(Debug, Clone)]
pub struct CapturedEntry {
    /// Index into the pending snapshot.
    pub source: usize,
    /// The captured change, with masked and ignored columns applied.
    pub entry: ChangeEntry,
}

/// Builds change entries from a store's pending mutations.
pub struct EntryCapturer<'a> {
    resolver: &'a SettingsResolver,
    include_entity_objects: bool,
}

impl<'a> EntryCapturer<'a> {
    /// Capture with the settings `resolver` merges.
    ///
    /// With `include_entity_objects`, each entry also carries the unmasked
    /// originating record.
    pub fn new(resolver: &'a SettingsResolver, include_entity_objects: bool) -> Self {
        Self {
            resolver,
            include_entity_objects,
        }
    }

    /// Capture every audited mutation, keeping snapshot order.
    pub fn capture(&self, mutations: &[PendingMutation]) -> Vec<CapturedEntry> {
        mutations
            .iter()
            .enumerate()
            .filter_map(|(source, mutation)| {
                self.capture_one(mutation)
                    .map(|entry| CapturedEntry { source, entry })
            })
            .collect()
    }

    /// Capture one mutation.
    ///
    /// Returns `None` for unchanged records and for types that are not
    /// audited.
    pub fn capture_one(&self, mutation: &PendingMutation) -> Option<ChangeEntry> {
        let action = mutation.kind.action()?;
        if !self.resolver.is_included(&mutation.record_type) {
            trace!(record_type = %mutation.record_type, "type not audited");
            return None;
        }

        let settings = self.resolver.resolve(&mutation.record_type);
        let mut entry = ChangeEntry::new(&mutation.record_type, &mutation.table, action);
        entry.schema = mutation.schema.clone();

        for field in &mutation.fields {
            // Store-assigned values are unknown until the insert has run.
            let unresolved = action == ChangeAction::Insert && field.store_generated;
            let before = field.original_or_current();
            let value = match action {
                ChangeAction::Delete => before,
                _ => &field.current,
            };

            if mutation.is_key(&field.name) && !unresolved {
                entry.primary_key.insert(field.name.clone(), value.clone());
            }

            if settings.as_deref().is_some_and(|s| s.is_ignored(&field.name)) {
                continue;
            }

            let modified = action == ChangeAction::Update && field.is_modified();
            match override_value(settings.as_deref(), mutation, action, field) {
                Some(masked) => {
                    if modified {
                        entry.changes.push(ColumnChange::new(
                            field.name.clone(),
                            masked.clone(),
                            masked.clone(),
                        ));
                    }
                    entry.column_values.insert(field.name.clone(), masked);
                }
                None if unresolved => {}
                None => {
                    if modified {
                        entry.changes.push(ColumnChange::new(
                            field.name.clone(),
                            before.clone(),
                            field.current.clone(),
                        ));
                    }
                    entry.column_values.insert(field.name.clone(), value.clone());
                }
            }
        }

        // Not masked: the live record is handed over unchanged.
        if self.include_entity_objects {
            entry.raw_record = mutation.record.clone();
        }

        trace!(
            record_type = %entry.record_type,
            action = %entry.action,
            columns = entry.column_values.len(),
            changes = entry.changes.len(),
            "captured entry"
        );
        Some(entry)
    }
}

fn override_value(
    settings: Option<&MergedTypeSettings>,
    mutation: &PendingMutation,
    action: ChangeAction,
    field: &crate::snapshot::FieldState,
) -> Option<revtrail_types::FieldValue> {
    let value = settings?.override_for(&field.name)?;
    Some(value.produce(&OverrideContext {
        record_type: &mutation.record_type,
        action,
        field: &field.name,
        current: &field.current,
        original: field.original.as_ref(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{FieldState, MutationKind};
    use proptest::prelude::*;
    use revtrail_config::{CaptureMode, OverrideValue, SettingsTier, TypeSettings};
    use revtrail_types::RawRecord;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn resolver(global: SettingsTier) -> SettingsResolver {
        SettingsResolver::new(
            Arc::new(SettingsTier::new()),
            Arc::new(SettingsTier::new()),
            Arc::new(global),
        )
    }

    fn user_update(name_before: &str, name_after: &str) -> PendingMutation {
        PendingMutation::new("User", "users", MutationKind::Modified)
            .with_key_field(FieldState::tracked("Id", json!(5), json!(5)))
            .with_field(FieldState::tracked("Name", json!(name_before), json!(name_after)))
            .with_field(FieldState::tracked("Password", json!("old"), json!("new")))
            .with_field(FieldState::tracked("Email", json!("a@x"), json!("a@x")))
    }

    #[test]
    fn test_insert_with_ignored_and_generated_fields() {
        let resolver = resolver(
            SettingsTier::new().with_type("User", TypeSettings::new().ignore("Password")),
        );
        let mutation = PendingMutation::new("User", "users", MutationKind::Added)
            .with_key_field(FieldState::generated("Id"))
            .with_field(FieldState::new("Name", json!("test")))
            .with_field(FieldState::new("Password", json!("secret")));

        let entry = EntryCapturer::new(&resolver, false).capture_one(&mutation).unwrap();
        assert_eq!(entry.action, ChangeAction::Insert);
        assert_eq!(entry.column_values.len(), 1);
        assert_eq!(entry.column("Name"), Some(&json!("test")));
        assert!(entry.column("Password").is_none());
        assert!(entry.primary_key.is_empty());
        assert!(entry.changes.is_empty());
    }

    #[test]
    fn test_single_field_update_yields_one_change() {
        let resolver = resolver(SettingsTier::new());
        let entry = EntryCapturer::new(&resolver, false)
            .capture_one(
                &PendingMutation::new("User", "users", MutationKind::Modified)
                    .with_key_field(FieldState::tracked("Id", json!(5), json!(5)))
                    .with_field(FieldState::tracked("Name", json!("ann"), json!("bea")))
                    .with_field(FieldState::tracked("Email", json!("a@x"), json!("a@x"))),
            )
            .unwrap();

        assert_eq!(entry.changes.len(), 1);
        assert_eq!(entry.changes[0].column_name, "Name");
        assert_eq!(entry.changes[0].original_value, json!("ann"));
        assert_eq!(entry.changes[0].new_value, json!("bea"));
        assert_eq!(entry.primary_key.get("Id"), Some(&json!(5)));
        assert!(entry.is_consistent());
    }

    #[test]
    fn test_mask_applies_to_both_sides() {
        let resolver = resolver(SettingsTier::new().with_type(
            "User",
            TypeSettings::new().mask("Password", "***"),
        ));
        let entry = EntryCapturer::new(&resolver, false)
            .capture_one(&user_update("ann", "ann"))
            .unwrap();

        let change = entry.change_for("Password").unwrap();
        assert_eq!(change.original_value, json!("***"));
        assert_eq!(change.new_value, json!("***"));
        assert_eq!(entry.column("Password"), Some(&json!("***")));
        assert_eq!(entry.changes.len(), 1);
    }

    #[test]
    fn test_computed_override_runs_once_per_field() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let resolver = resolver(SettingsTier::new().with_type(
            "User",
            TypeSettings::new().override_field(
                "Name",
                OverrideValue::computed(move |ctx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    json!(ctx.current.as_str().map(str::len))
                }),
            ),
        ));

        let entry = EntryCapturer::new(&resolver, false)
            .capture_one(&user_update("ann", "beatrice"))
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(entry.column("Name"), Some(&json!(8)));
        let change = entry.change_for("Name").unwrap();
        assert_eq!(change.original_value, change.new_value);
    }

    #[test]
    fn test_delete_uses_original_values() {
        let resolver = resolver(SettingsTier::new());
        let mutation = PendingMutation::new("User", "users", MutationKind::Deleted)
            .with_key_field(FieldState::tracked("Id", json!(5), json!(5)))
            .with_field(FieldState::tracked("Name", json!("ann"), json!("bea")));

        let entry = EntryCapturer::new(&resolver, false).capture_one(&mutation).unwrap();
        assert_eq!(entry.action, ChangeAction::Delete);
        assert_eq!(entry.column("Name"), Some(&json!("ann")));
        assert!(entry.changes.is_empty());
    }

    #[test]
    fn test_ignored_key_stays_in_primary_key() {
        let resolver = resolver(
            SettingsTier::new().with_type("User", TypeSettings::new().ignore("Id")),
        );
        let entry = EntryCapturer::new(&resolver, false)
            .capture_one(&user_update("ann", "bo"))
            .unwrap();
        assert_eq!(entry.primary_key.get("Id"), Some(&json!(5)));
        assert!(entry.column("Id").is_none());
    }

    #[test]
    fn test_inclusion_and_order() {
        let resolver = resolver(
            SettingsTier::new()
                .with_mode(CaptureMode::OptIn)
                .include_type("User")
                .include_type("Order"),
        );
        let mutations = vec![
            PendingMutation::new("Order", "orders", MutationKind::Added),
            PendingMutation::new("Cache", "cache", MutationKind::Added),
            PendingMutation::new("User", "users", MutationKind::Unchanged),
            PendingMutation::new("User", "users", MutationKind::Deleted),
        ];

        let captured = EntryCapturer::new(&resolver, false).capture(&mutations);
        let summary: Vec<_> = captured
            .iter()
            .map(|c| (c.source, c.entry.record_type.as_str()))
            .collect();
        assert_eq!(summary, vec![(0, "Order"), (3, "User")]);
    }

    #[test]
    fn test_raw_record_only_when_included() {
        let resolver = resolver(SettingsTier::new());
        let mutation = PendingMutation::new("User", "users", MutationKind::Added)
            .with_record(RawRecord::new(String::from("live")));

        let without = EntryCapturer::new(&resolver, false).capture_one(&mutation).unwrap();
        assert!(without.raw_record.is_none());

        let with = EntryCapturer::new(&resolver, true).capture_one(&mutation).unwrap();
        assert_eq!(with.raw::<String>().map(String::as_str), Some("live"));
    }

    fn field_pairs() -> impl Strategy<Value = Vec<(i64, i64)>> {
        prop::collection::vec((0i64..3, 0i64..3), 1..8)
    }

    proptest! {
        #[test]
        fn prop_changes_list_exactly_modified_fields(pairs in field_pairs()) {
            let resolver = resolver(SettingsTier::new());
            let mut mutation = PendingMutation::new("T", "t", MutationKind::Modified);
            for (i, (before, after)) in pairs.iter().enumerate() {
                mutation = mutation.with_field(FieldState::tracked(
                    format!("F{}", i),
                    json!(before),
                    json!(after),
                ));
            }

            let entry = EntryCapturer::new(&resolver, false).capture_one(&mutation).unwrap();
            let expected: Vec<String> = pairs
                .iter()
                .enumerate()
                .filter(|(_, (b, a))| b != a)
                .map(|(i, _)| format!("F{}", i))
                .collect();
            let actual: Vec<String> = entry.changes.iter().map(|c| c.column_name.clone()).collect();
            prop_assert_eq!(actual, expected);
            prop_assert_eq!(entry.column_values.len(), pairs.len());
            for change in &entry.changes {
                prop_assert_ne!(&change.original_value, &change.new_value);
                prop_assert!(change.new_value != Value::Null);
            }
        }
    }
}
