//! Rule-based routing of change entries to target record types.

use crate::action::{ActionShape, AuditAction, ComposedAction};
use crate::error::ActionError;
use indexmap::IndexMap;
use revtrail_types::{AuditEvent, ChangeEntry, MappedRecord, TargetType};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Predicate deciding whether an explicit rule applies to an entry.
pub type EntryPredicate = Arc<dyn Fn(&ChangeEntry) -> bool + Send + Sync>;

/// Picks the target type for an entry; `None` leaves it unmapped.
pub type TargetResolver = Arc<dyn Fn(&ChangeEntry) -> Option<TargetType> + Send + Sync>;

struct ExplicitRule {
    predicate: EntryPredicate,
    resolver: TargetResolver,
    action: Option<AuditAction>,
}

#[derive(Default)]
struct ImplicitRule {
    resolver: Option<TargetResolver>,
    action: Option<AuditAction>,
}

/// How one entry will be materialized.
#[derive(Debug)]
pub struct MappingPlan<'m> {
    /// Target type the entry maps to.
    pub target: TargetType,
    /// Index of the explicit rule that matched, if any.
    pub explicit_rule: Option<usize>,
    /// Actions to run on the produced record.
    pub action: ComposedAction<'m>,
}

/// Immutable rule set mapping entries to target records.
pub struct TypeMapper {
    explicit: Vec<ExplicitRule>,
    implicit: IndexMap<String, ImplicitRule>,
    common: Option<AuditAction>,
}

impl TypeMapper {
    /// Start building a mapper.
    pub fn builder() -> TypeMapperBuilder {
        TypeMapperBuilder::default()
    }

    /// A mapper with no rules; every entry stays unmapped.
    pub fn empty() -> Self {
        Self::builder().build()
    }

    /// Whether any registered action reads originating records.
    pub fn requires_raw_record(&self) -> bool {
        self.explicit
            .iter()
            .filter_map(|rule| rule.action.as_ref())
            .chain(self.implicit.values().filter_map(|rule| rule.action.as_ref()))
            .chain(self.common.as_ref())
            .any(AuditAction::requires_raw_record)
    }

    /// Target type for an entry.
    ///
    /// Explicit rules are tried in registration order and the first matching
    /// predicate decides, even when its resolver yields nothing. Otherwise the
    /// implicit rule for the entry's record type applies.
    pub fn resolve_target(&self, entry: &ChangeEntry) -> Option<TargetType> {
        match self.matching_explicit(entry) {
            Some((_, rule)) => (rule.resolver)(entry),
            None => self.implicit_target(entry),
        }
    }

    /// Target type and actions for an entry, `None` when it stays unmapped.
    pub fn plan<'m>(&'m self, entry: &ChangeEntry) -> Option<MappingPlan<'m>> {
        let implicit = self.implicit.get(&entry.record_type);
        let explicit = self.matching_explicit(entry);

        let target = match explicit {
            Some((_, rule)) => (rule.resolver)(entry)?,
            None => self.implicit_target(entry)?,
        };

        Some(MappingPlan {
            target,
            explicit_rule: explicit.map(|(index, _)| index),
            action: ComposedAction::new(
                explicit.and_then(|(_, rule)| rule.action.as_ref()),
                implicit.and_then(|rule| rule.action.as_ref()),
                self.common.as_ref(),
            ),
        })
    }

    /// Produce the target record for an entry and run its actions.
    ///
    /// With `copy_matched`, the fresh record first receives every column the
    /// target type declares. Configuration errors leave the entry unmapped;
    /// callback errors are returned.
    pub async fn materialize(
        &self,
        event: &AuditEvent,
        entry: &mut ChangeEntry,
        copy_matched: bool,
    ) -> Result<Option<MappedRecord>, ActionError> {
        let Some(plan) = self.plan(entry) else {
            trace!(record_type = %entry.record_type, "no mapping for entry");
            return Ok(None);
        };

        let mut record = plan.target.instantiate();
        if copy_matched {
            for (name, value) in &entry.column_values {
                if plan.target.declares(name) {
                    record.set(name.clone(), value.clone());
                }
            }
        }

        match plan.action.run(event, entry, &mut record).await {
            Ok(accepted) => {
                debug!(
                    record_type = %entry.record_type,
                    target = plan.target.name(),
                    explicit_rule = ?plan.explicit_rule,
                    accepted,
                    "materialized audit record"
                );
                Ok(Some(MappedRecord { record, accepted }))
            }
            Err(err) if err.is_configuration() => {
                warn!(record_type = %entry.record_type, error = %err, "entry left unmapped");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn matching_explicit(&self, entry: &ChangeEntry) -> Option<(usize, &ExplicitRule)> {
        self.explicit
            .iter()
            .enumerate()
            .find(|(_, rule)| (rule.predicate)(entry))
    }

    fn implicit_target(&self, entry: &ChangeEntry) -> Option<TargetType> {
        self.implicit
            .get(&entry.record_type)
            .and_then(|rule| rule.resolver.as_ref())
            .and_then(|resolver| resolver(entry))
    }
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for TypeMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMapper")
            .field("explicit_rules", &self.explicit.len())
            .field("implicit_types", &self.implicit.keys().collect::<Vec<_>>())
            .field("common_action", &self.common.is_some())
            .finish()
    }
}

/// Builder for [`TypeMapper`].
#[derive(Default)]
pub struct TypeMapperBuilder {
    explicit: Vec<ExplicitRule>,
    implicit: IndexMap<String, ImplicitRule>,
    common: Option<AuditAction>,
}

impl TypeMapperBuilder {
    /// Map every entry of a record type to a fixed target type.
    pub fn map(self, record_type: impl Into<String>, target: TargetType) -> Self {
        self.map_with(record_type, move |_| Some(target.clone()))
    }

    /// Map entries of a record type through a resolver.
    pub fn map_with<F>(mut self, record_type: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(&ChangeEntry) -> Option<TargetType> + Send + Sync + 'static,
    {
        self.implicit.entry(record_type.into()).or_default().resolver = Some(Arc::new(resolver));
        self
    }

    /// Set the action for a record type's records.
    ///
    /// The action also runs when an explicit rule claimed the entry.
    pub fn with_action(mut self, record_type: impl Into<String>, action: ActionShape) -> Self {
        self.implicit.entry(record_type.into()).or_default().action = Some(action.into_action());
        self
    }

    /// Append an explicit rule with a fixed target type.
    pub fn map_explicit<P>(self, predicate: P, target: TargetType) -> Self
    where
        P: Fn(&ChangeEntry) -> bool + Send + Sync + 'static,
    {
        self.map_explicit_with(predicate, move |_| Some(target.clone()), None)
    }

    /// Append an explicit rule with a resolver and an optional action.
    pub fn map_explicit_with<P, F>(
        mut self,
        predicate: P,
        resolver: F,
        action: Option<ActionShape>,
    ) -> Self
    where
        P: Fn(&ChangeEntry) -> bool + Send + Sync + 'static,
        F: Fn(&ChangeEntry) -> Option<TargetType> + Send + Sync + 'static,
    {
        self.explicit.push(ExplicitRule {
            predicate: Arc::new(predicate),
            resolver: Arc::new(resolver),
            action: action.map(ActionShape::into_action),
        });
        self
    }

    /// Set the action run on every produced record.
    pub fn common_action(mut self, action: ActionShape) -> Self {
        self.common = Some(action.into_action());
        self
    }

    /// Freeze the rule set.
    pub fn build(self) -> TypeMapper {
        TypeMapper {
            explicit: self.explicit,
            implicit: self.implicit,
            common: self.common,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revtrail_types::{ChangeAction, RawRecord};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn entry(record_type: &str, action: ChangeAction) -> ChangeEntry {
        ChangeEntry::new(record_type, record_type.to_lowercase(), action)
            .with_key("Id", json!(1))
            .with_column("Id", json!(1))
            .with_column("Name", json!("ann"))
    }

    fn event() -> AuditEvent {
        AuditEvent::new("Shop:main", "Shop")
    }

    fn routing_mapper() -> TypeMapper {
        TypeMapper::builder()
            .map_explicit(|e| e.action == ChangeAction::Update, TargetType::new("TypeA"))
            .map("User", TargetType::new("TypeB"))
            .build()
    }

    #[test]
    fn test_explicit_rule_wins_for_updates() {
        let mapper = routing_mapper();
        let target = mapper.resolve_target(&entry("User", ChangeAction::Update));
        assert_eq!(target, Some(TargetType::new("TypeA")));
    }

    #[test]
    fn test_implicit_rule_is_fallback() {
        let mapper = routing_mapper();
        let target = mapper.resolve_target(&entry("User", ChangeAction::Insert));
        assert_eq!(target, Some(TargetType::new("TypeB")));
    }

    #[test]
    fn test_unknown_type_is_unmapped() {
        let mapper = routing_mapper();
        assert!(mapper.resolve_target(&entry("Order", ChangeAction::Insert)).is_none());
        assert!(mapper.plan(&entry("Order", ChangeAction::Delete)).is_none());
    }

    #[test]
    fn test_explicit_rules_in_registration_order() {
        let mapper = TypeMapper::builder()
            .map_explicit(|e| e.record_type == "User", TargetType::new("First"))
            .map_explicit(|_| true, TargetType::new("Second"))
            .build();
        let plan = mapper.plan(&entry("User", ChangeAction::Insert)).unwrap();
        assert_eq!(plan.target.name(), "First");
        assert_eq!(plan.explicit_rule, Some(0));

        let plan = mapper.plan(&entry("Order", ChangeAction::Insert)).unwrap();
        assert_eq!(plan.target.name(), "Second");
        assert_eq!(plan.explicit_rule, Some(1));
    }

    #[test]
    fn test_matching_explicit_rule_without_target_does_not_fall_through() {
        let mapper = TypeMapper::builder()
            .map_explicit_with(|_| true, |_| None, None)
            .map("User", TargetType::new("UserAudit"))
            .build();
        assert!(mapper.resolve_target(&entry("User", ChangeAction::Insert)).is_none());
    }

    #[test]
    fn test_requires_raw_record() {
        struct User;
        assert!(!routing_mapper().requires_raw_record());

        let mapper = TypeMapper::builder()
            .map("User", TargetType::new("UserAudit"))
            .with_action("User", ActionShape::source_function::<User, _>(|_, _| true))
            .build();
        assert!(mapper.requires_raw_record());
    }

    #[tokio::test]
    async fn test_materialize_copies_declared_columns() {
        let mapper = TypeMapper::builder()
            .map("User", TargetType::new("UserAudit").with_fields(["Id", "Name", "When"]))
            .build();
        let mut e = entry("User", ChangeAction::Insert);

        let mapped = mapper.materialize(&event(), &mut e, true).await.unwrap().unwrap();
        assert!(mapped.accepted);
        assert_eq!(mapped.record.get("Id"), Some(&json!(1)));
        assert_eq!(mapped.record.get("Name"), Some(&json!("ann")));
        assert!(mapped.record.get("When").is_none());

        let mapped = mapper.materialize(&event(), &mut e, false).await.unwrap().unwrap();
        assert!(mapped.record.fields.is_empty());
    }

    #[tokio::test]
    async fn test_all_actions_run_without_short_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (c1, c2, c3) = (calls.clone(), calls.clone(), calls.clone());

        let mapper = TypeMapper::builder()
            .map_explicit_with(
                |e| e.action == ChangeAction::Update,
                |_| Some(TargetType::new("TypeA")),
                Some(ActionShape::function(move |_, _, _| {
                    c1.fetch_add(1, Ordering::SeqCst);
                    false
                })),
            )
            .map("User", TargetType::new("TypeB"))
            .with_action(
                "User",
                ActionShape::procedure(move |_, _, record| {
                    c2.fetch_add(1, Ordering::SeqCst);
                    record.set("Implicit", true);
                }),
            )
            .common_action(ActionShape::function(move |_, entry, record| {
                c3.fetch_add(1, Ordering::SeqCst);
                record.set("Table", entry.table.clone());
                true
            }))
            .build();

        let mut e = entry("User", ChangeAction::Update);
        let mapped = mapper.materialize(&event(), &mut e, false).await.unwrap().unwrap();
        assert!(!mapped.accepted);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(mapped.record.target_type, "TypeA");
        assert_eq!(mapped.record.get("Implicit"), Some(&json!(true)));
        assert_eq!(mapped.record.get("Table"), Some(&json!("user")));

        let mut e = entry("User", ChangeAction::Insert);
        let mapped = mapper.materialize(&event(), &mut e, false).await.unwrap().unwrap();
        assert!(mapped.accepted);
        assert_eq!(mapped.record.target_type, "TypeB");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_missing_raw_record_leaves_entry_unmapped() {
        #[derive(Debug)]
        struct User {
            name: &'static str,
        }

        let mapper = TypeMapper::builder()
            .map("User", TargetType::new("UserAudit"))
            .with_action(
                "User",
                ActionShape::source_procedure::<User, _>(|user, record| {
                    record.set("Name", user.name)
                }),
            )
            .build();

        let mut without = entry("User", ChangeAction::Insert);
        assert!(mapper.materialize(&event(), &mut without, false).await.unwrap().is_none());

        let mut with = entry("User", ChangeAction::Insert)
            .with_raw_record(RawRecord::new(User { name: "bo" }));
        let mapped = mapper.materialize(&event(), &mut with, false).await.unwrap().unwrap();
        assert_eq!(mapped.record.get("Name"), Some(&json!("bo")));
    }

    #[tokio::test]
    async fn test_callback_error_propagates() {
        let mapper = TypeMapper::builder()
            .map("User", TargetType::new("UserAudit"))
            .common_action(ActionShape::fallible(|_, _, _| Err::<bool, _>("rejected by policy")))
            .build();
        let mut e = entry("User", ChangeAction::Delete);
        let err = mapper.materialize(&event(), &mut e, false).await.unwrap_err();
        assert_eq!(err.to_string(), "rejected by policy");
    }

    #[tokio::test]
    async fn test_actions_can_annotate_entry() {
        let mapper = TypeMapper::builder()
            .map("User", TargetType::new("UserAudit"))
            .common_action(ActionShape::procedure(|event, entry, _| {
                entry.set_custom_field("event_type", event.event_type.clone());
            }))
            .build();
        let mut e = entry("User", ChangeAction::Insert);
        mapper.materialize(&event(), &mut e, false).await.unwrap();
        assert_eq!(e.custom_fields.get("event_type"), Some(&json!("Shop:main")));
    }
}
