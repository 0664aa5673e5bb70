//! Merging of the three settings tiers into effective per-type rules.
//!
//! Field rules merge with a fixed precedence: annotation, then store
//! instance, then global. Ignored fields are the union of every tier that
//! configures the type; for overrides, the first tier in that order to
//! define a key supplies its value.

use crate::types::{CaptureMode, OverrideValue, SettingsTier};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::trace;

/// Effective field rules for one record type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedTypeSettings {
    /// Union of every tier's ignored fields.
    pub ignored_fields: BTreeSet<String>,
    /// Highest-precedence override per field.
    pub override_fields: IndexMap<String, OverrideValue>,
}

impl MergedTypeSettings {
    /// Whether a field is left out of captured values.
    pub fn is_ignored(&self, field: &str) -> bool {
        self.ignored_fields.contains(field)
    }

    /// The override for a field, if any.
    pub fn override_for(&self, field: &str) -> Option<&OverrideValue> {
        self.override_fields.get(field)
    }
}

/// Merge the tiers' rules for a type.
///
/// Returns `None` when no tier has an entry for the type.
pub fn resolve(
    record_type: &str,
    annotation: &SettingsTier,
    instance: &SettingsTier,
    global: &SettingsTier,
) -> Option<MergedTypeSettings> {
    let defined: Vec<_> = [annotation, instance, global]
        .into_iter()
        .filter_map(|tier| tier.type_settings(record_type))
        .collect();

    if defined.is_empty() {
        return None;
    }

    let mut merged = MergedTypeSettings::default();
    for settings in defined {
        merged
            .ignored_fields
            .extend(settings.ignored_fields.iter().cloned());
        for (field, value) in &settings.override_fields {
            if !merged.override_fields.contains_key(field) {
                merged.override_fields.insert(field.clone(), value.clone());
            }
        }
    }

    Some(merged)
}

/// Resolves effective settings and inclusion for record types.
///
/// Tiers are immutable once the resolver is built; merged results are
/// cached per type.
pub struct SettingsResolver {
    annotation: Arc<SettingsTier>,
    instance: Arc<SettingsTier>,
    global: Arc<SettingsTier>,
    cache: RwLock<HashMap<String, Option<Arc<MergedTypeSettings>>>>,
}

impl SettingsResolver {
    /// Create a resolver over three tiers.
    pub fn new(
        annotation: Arc<SettingsTier>,
        instance: Arc<SettingsTier>,
        global: Arc<SettingsTier>,
    ) -> Self {
        Self {
            annotation,
            instance,
            global,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Effective settings for a type, `None` when no tier configures it.
    pub fn resolve(&self, record_type: &str) -> Option<Arc<MergedTypeSettings>> {
        if let Some(cached) = self.cache.read().get(record_type) {
            return cached.clone();
        }

        let merged = resolve(record_type, &self.annotation, &self.instance, &self.global)
            .map(Arc::new);
        trace!(record_type, configured = merged.is_some(), "resolved type settings");

        self.cache
            .write()
            .entry(record_type.to_string())
            .or_insert(merged)
            .clone()
    }

    /// Capture mode: the instance tier's, else the global tier's.
    pub fn mode(&self) -> CaptureMode {
        self.instance
            .mode()
            .or_else(|| self.global.mode())
            .unwrap_or_default()
    }

    /// Whether entries of this type are captured.
    pub fn is_included(&self, record_type: &str) -> bool {
        match self.mode() {
            CaptureMode::OptOut => {
                !(self.annotation.ignores(record_type)
                    || self.instance.ignores(record_type)
                    || self.global.ignores(record_type))
            }
            CaptureMode::OptIn => {
                self.annotation.includes(record_type)
                    || self.instance.includes(record_type)
                    || self.global.includes(record_type)
            }
        }
    }

    /// Drop cached results.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }
}

impl std::fmt::Debug for SettingsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsResolver")
            .field("annotation", &self.annotation)
            .field("instance", &self.instance)
            .field("global", &self.global)
            .finish_non_exhaustive()
    }
}
