//! Capture settings for Revtrail.
//!
//! Field-level capture rules live in three [`SettingsTier`]s: annotations
//! declared by record types, the audited store instance, and global
//! configuration. [`SettingsResolver`] merges them per record type and
//! decides which types are captured at all. [`ConfigLoader`] reads the
//! declarative parts from a YAML file.

pub mod env;
pub mod loader;
pub mod options;
pub mod resolver;
pub mod types;

pub use env::{EnvError, Environment};
pub use loader::{AuditFileConfig, ConfigError, ConfigLoader, TypeRules};
pub use options::{AuditOptions, EventCreationPolicy};
pub use resolver::{resolve, MergedTypeSettings, SettingsResolver};
pub use types::*;
