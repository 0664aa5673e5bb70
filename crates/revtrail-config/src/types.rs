//! Per-type capture settings and the tiers that hold them.

use indexmap::IndexMap;
use revtrail_types::{ChangeAction, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Whether record types are captured unless ignored, or only when included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Every type is captured unless explicitly ignored.
    #[default]
    OptOut,
    /// Only explicitly included types are captured.
    OptIn,
}

/// What an override function sees when it produces a value.
#[derive(Debug, Clone, Copy)]
pub struct OverrideContext<'a> {
    /// Record type being captured.
    pub record_type: &'a str,
    /// Mutation kind.
    pub action: ChangeAction,
    /// Field being overridden.
    pub field: &'a str,
    /// Current value of the field.
    pub current: &'a FieldValue,
    /// Original value, when the store tracked one.
    pub original: Option<&'a FieldValue>,
}

/// Function producing an overridden field value.
pub type OverrideFn = Arc<dyn Fn(&OverrideContext<'_>) -> FieldValue + Send + Sync>;

/// Predicate over record type names.
pub type TypePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Replacement for a captured field value.
#[derive(Clone)]
pub enum OverrideValue {
    /// Always the same value, typically a mask.
    Constant(FieldValue),
    /// Computed from the field being captured.
    Computed(OverrideFn),
}

impl OverrideValue {
    /// Override with a fixed value.
    pub fn constant(value: impl Into<FieldValue>) -> Self {
        Self::Constant(value.into())
    }

    /// Override with a computed value.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&OverrideContext<'_>) -> FieldValue + Send + Sync + 'static,
    {
        Self::Computed(Arc::new(f))
    }

    /// Produce the replacement value.
    pub fn produce(&self, ctx: &OverrideContext<'_>) -> FieldValue {
        match self {
            Self::Constant(value) => value.clone(),
            Self::Computed(f) => f(ctx),
        }
    }
}

impl PartialEq for OverrideValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Constant(a), Self::Constant(b)) => a == b,
            (Self::Computed(a), Self::Computed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for OverrideValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Field-level capture rules for one record type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeSettings {
    /// Fields left out of the captured values.
    pub ignored_fields: BTreeSet<String>,
    /// Fields whose captured value is replaced.
    pub override_fields: IndexMap<String, OverrideValue>,
}

impl TypeSettings {
    /// Create empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore a field.
    pub fn ignore(mut self, field: impl Into<String>) -> Self {
        self.ignored_fields.insert(field.into());
        self
    }

    /// Override a field.
    pub fn override_field(mut self, field: impl Into<String>, value: OverrideValue) -> Self {
        self.override_fields.insert(field.into(), value);
        self
    }

    /// Override a field with a constant.
    pub fn mask(self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.override_field(field, OverrideValue::constant(value))
    }
}

/// Markers a record type declares about itself.
///
/// Ignored and overridden fields only shape the captured column values.
/// When `include_entity_objects` is on, the originating record still reaches
/// source actions with its real values.
///
/// Implementations are collected into the annotation tier with
/// [`SettingsTier::register`].
pub trait Annotated {
    /// Record type name as reported by the store.
    const RECORD_TYPE: &'static str;

    /// Include the type when capturing in opt-in mode.
    fn audit_include() -> bool {
        false
    }

    /// Ignore the type when capturing in opt-out mode.
    fn audit_ignore() -> bool {
        false
    }

    /// Field-level rules declared on the type.
    fn type_settings() -> Option<TypeSettings> {
        None
    }
}

/// One configuration tier: annotation, store instance or global.
#[derive(Clone, Default)]
pub struct SettingsTier {
    types: HashMap<String, TypeSettings>,
    included_types: HashSet<String>,
    included_filter: Option<TypePredicate>,
    ignored_types: HashSet<String>,
    ignored_filter: Option<TypePredicate>,
    mode: Option<CaptureMode>,
}

impl SettingsTier {
    /// Create an empty tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set field rules for a type, replacing any previous entry.
    pub fn with_type(mut self, record_type: impl Into<String>, settings: TypeSettings) -> Self {
        self.types.insert(record_type.into(), settings);
        self
    }

    /// Mutable access to a type's rules, creating an empty entry if needed.
    pub fn type_entry(&mut self, record_type: impl Into<String>) -> &mut TypeSettings {
        self.types.entry(record_type.into()).or_default()
    }

    /// Get the rules this tier defines for a type.
    pub fn type_settings(&self, record_type: &str) -> Option<&TypeSettings> {
        self.types.get(record_type)
    }

    /// Names of the types this tier defines rules for.
    pub fn configured_types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Explicitly include a type.
    pub fn include_type(mut self, record_type: impl Into<String>) -> Self {
        self.included_types.insert(record_type.into());
        self
    }

    /// Include every type matching a predicate.
    pub fn include_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.included_filter = Some(Arc::new(f));
        self
    }

    /// Explicitly ignore a type.
    pub fn ignore_type(mut self, record_type: impl Into<String>) -> Self {
        self.ignored_types.insert(record_type.into());
        self
    }

    /// Ignore every type matching a predicate.
    pub fn ignore_filter<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.ignored_filter = Some(Arc::new(f));
        self
    }

    /// Set the capture mode.
    pub fn with_mode(mut self, mode: CaptureMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Capture mode, if this tier sets one.
    pub fn mode(&self) -> Option<CaptureMode> {
        self.mode
    }

    /// Whether this tier includes the type by set or predicate.
    pub fn includes(&self, record_type: &str) -> bool {
        self.included_types.contains(record_type)
            || self.included_filter.as_ref().is_some_and(|f| f(record_type))
    }

    /// Whether this tier ignores the type by set or predicate.
    pub fn ignores(&self, record_type: &str) -> bool {
        self.ignored_types.contains(record_type)
            || self.ignored_filter.as_ref().is_some_and(|f| f(record_type))
    }

    /// Collect the annotations a record type declares.
    pub fn register<T: Annotated>(mut self) -> Self {
        if T::audit_include() {
            self.included_types.insert(T::RECORD_TYPE.to_string());
        }
        if T::audit_ignore() {
            self.ignored_types.insert(T::RECORD_TYPE.to_string());
        }
        if let Some(settings) = T::type_settings() {
            self.types.insert(T::RECORD_TYPE.to_string(), settings);
        }
        self
    }
}

impl fmt::Debug for SettingsTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsTier")
            .field("types", &self.types)
            .field("included_types", &self.included_types)
            .field("included_filter", &self.included_filter.is_some())
            .field("ignored_types", &self.ignored_types)
            .field("ignored_filter", &self.ignored_filter.is_some())
            .field("mode", &self.mode)
            .finish()
    }
}
