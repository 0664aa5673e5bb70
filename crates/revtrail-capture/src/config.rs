//! Immutable audit configuration shared by coordinators.

use crate::error::AuditError;
use crate::store::AuditStoreFactory;
use revtrail_config::{Annotated, AuditFileConfig, AuditOptions, SettingsResolver, SettingsTier};
use revtrail_mapping::TypeMapper;
use std::fmt;
use std::sync::Arc;

/// Everything a coordinator needs to know about how to audit.
///
/// Built once and shared; nothing in it changes while saves run.
pub struct AuditConfiguration {
    options: AuditOptions,
    resolver: SettingsResolver,
    mapper: TypeMapper,
    audit_store: Option<Arc<dyn AuditStoreFactory>>,
}

impl AuditConfiguration {
    /// Start building a configuration.
    pub fn builder() -> AuditConfigurationBuilder {
        AuditConfigurationBuilder::default()
    }

    /// Store-level options.
    pub fn options(&self) -> &AuditOptions {
        &self.options
    }

    /// Merged view over the three settings tiers.
    pub fn resolver(&self) -> &SettingsResolver {
        &self.resolver
    }

    /// Routes entries to target types and runs their actions.
    pub fn mapper(&self) -> &TypeMapper {
        &self.mapper
    }

    /// Factory for the secondary audit store, if one is configured.
    pub fn audit_store_factory(&self) -> Option<&Arc<dyn AuditStoreFactory>> {
        self.audit_store.as_ref()
    }
}

impl fmt::Debug for AuditConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditConfiguration")
            .field("options", &self.options)
            .field("resolver", &self.resolver)
            .field("mapper", &self.mapper)
            .field("audit_store", &self.audit_store.is_some())
            .finish()
    }
}

/// Builder for [`AuditConfiguration`].
pub struct AuditConfigurationBuilder {
    options: AuditOptions,
    annotation: SettingsTier,
    instance: SettingsTier,
    global: SettingsTier,
    mapper: TypeMapper,
    audit_store: Option<Arc<dyn AuditStoreFactory>>,
}

impl Default for AuditConfigurationBuilder {
    fn default() -> Self {
        Self {
            options: AuditOptions::default(),
            annotation: SettingsTier::new(),
            instance: SettingsTier::new(),
            global: SettingsTier::new(),
            mapper: TypeMapper::empty(),
            audit_store: None,
        }
    }
}

impl AuditConfigurationBuilder {
    /// Replace the store-level options.
    pub fn options(mut self, options: AuditOptions) -> Self {
        self.options = options;
        self
    }

    /// Use the options and global tier described by a configuration file.
    pub fn file(mut self, config: &AuditFileConfig) -> Self {
        self.options = config.options.clone();
        self.global = config.global_tier();
        self
    }

    /// Settings declared by the record types themselves; highest precedence.
    pub fn annotation_tier(mut self, tier: SettingsTier) -> Self {
        self.annotation = tier;
        self
    }

    /// Add a record type's own markers to the annotation tier.
    pub fn register<T: Annotated>(mut self) -> Self {
        self.annotation = self.annotation.register::<T>();
        self
    }

    /// Settings of this store instance.
    pub fn instance_tier(mut self, tier: SettingsTier) -> Self {
        self.instance = tier;
        self
    }

    /// Process-wide settings; lowest precedence.
    pub fn global_tier(mut self, tier: SettingsTier) -> Self {
        self.global = tier;
        self
    }

    /// Mapper used for every save.
    pub fn mapper(mut self, mapper: TypeMapper) -> Self {
        self.mapper = mapper;
        self
    }

    /// Persist accepted target records through a secondary store.
    pub fn audit_store<F: AuditStoreFactory + 'static>(mut self, factory: F) -> Self {
        self.audit_store = Some(Arc::new(factory));
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<AuditConfiguration, AuditError> {
        if self.mapper.requires_raw_record() && !self.options.include_entity_objects {
            return Err(AuditError::Configuration(
                "mapping actions read originating records, but include_entity_objects is off"
                    .to_string(),
            ));
        }

        Ok(AuditConfiguration {
            options: self.options,
            resolver: SettingsResolver::new(
                Arc::new(self.annotation),
                Arc::new(self.instance),
                Arc::new(self.global),
            ),
            mapper: self.mapper,
            audit_store: self.audit_store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revtrail_config::TypeSettings;
    use revtrail_mapping::ActionShape;
    use revtrail_types::TargetType;

    struct Account;

    impl Annotated for Account {
        const RECORD_TYPE: &'static str = "Account";

        fn type_settings() -> Option<TypeSettings> {
            Some(TypeSettings::new().ignore("Secret"))
        }
    }

    #[test]
    fn test_source_actions_need_entity_objects() {
        let mapper = || {
            TypeMapper::builder()
                .map("Account", TargetType::new("AccountAudit"))
                .with_action("Account", ActionShape::source_function::<Account, _>(|_, _| true))
                .build()
        };

        let err = AuditConfiguration::builder().mapper(mapper()).build().unwrap_err();
        assert!(matches!(err, AuditError::Configuration(_)));

        let options = AuditOptions {
            include_entity_objects: true,
            ..Default::default()
        };
        assert!(AuditConfiguration::builder()
            .options(options)
            .mapper(mapper())
            .build()
            .is_ok());
    }

    #[test]
    fn test_registered_annotations_reach_resolver() {
        let config = AuditConfiguration::builder()
            .register::<Account>()
            .global_tier(SettingsTier::new().with_type("Account", TypeSettings::new().ignore("Pin")))
            .build()
            .unwrap();

        let merged = config.resolver().resolve("Account").unwrap();
        assert!(merged.is_ignored("Secret"));
        assert!(merged.is_ignored("Pin"));
        assert!(config.audit_store_factory().is_none());
    }

    #[test]
    fn test_file_sets_options_and_global_tier() {
        let mut file = AuditFileConfig::default();
        file.options.audit_disabled = true;
        file.ignored_types.push("Cache".into());

        let config = AuditConfiguration::builder().file(&file).build().unwrap();
        assert!(config.options().audit_disabled);
        assert!(!config.resolver().is_included("Cache"));
        assert!(config.resolver().is_included("Account"));
    }
}
