//! Environment variable handling.

use crate::options::{AuditOptions, EventCreationPolicy};
use std::env;
use thiserror::Error;

/// Environment variable errors.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Environment variable names.
pub mod vars {
    pub const REVTRAIL_CONFIG_PATH: &str = "REVTRAIL_CONFIG_PATH";
    pub const REVTRAIL_AUDIT_DISABLED: &str = "REVTRAIL_AUDIT_DISABLED";
    pub const REVTRAIL_INCLUDE_OBJECTS: &str = "REVTRAIL_INCLUDE_OBJECTS";
    pub const REVTRAIL_CREATION_POLICY: &str = "REVTRAIL_CREATION_POLICY";
}

/// Typed access to environment variables.
pub struct Environment;

impl Environment {
    /// Get an optional string variable.
    pub fn get(var: &str) -> Option<String> {
        env::var(var).ok()
    }

    /// Get a boolean variable.
    pub fn get_bool(var: &str) -> Option<bool> {
        env::var(var).ok().map(|v| {
            matches!(v.to_lowercase().as_str(), "true" | "1" | "yes")
        })
    }

    /// Apply `REVTRAIL_*` overrides on top of loaded options.
    pub fn apply_overrides(options: &mut AuditOptions) -> Result<(), EnvError> {
        if let Some(disabled) = Self::get_bool(vars::REVTRAIL_AUDIT_DISABLED) {
            options.audit_disabled = disabled;
        }
        if let Some(include) = Self::get_bool(vars::REVTRAIL_INCLUDE_OBJECTS) {
            options.include_entity_objects = include;
        }
        if let Some(policy) = Self::get(vars::REVTRAIL_CREATION_POLICY) {
            options.creation_policy = policy.parse::<EventCreationPolicy>().map_err(|_| {
                EnvError::InvalidValue {
                    var: vars::REVTRAIL_CREATION_POLICY.to_string(),
                    message: format!("unknown creation policy `{}`", policy),
                }
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_parsing() {
        env::set_var("REVTRAIL_TEST_BOOL", "true");
        assert_eq!(Environment::get_bool("REVTRAIL_TEST_BOOL"), Some(true));
        env::set_var("REVTRAIL_TEST_BOOL", "1");
        assert_eq!(Environment::get_bool("REVTRAIL_TEST_BOOL"), Some(true));
        env::set_var("REVTRAIL_TEST_BOOL", "false");
        assert_eq!(Environment::get_bool("REVTRAIL_TEST_BOOL"), Some(false));
        env::remove_var("REVTRAIL_TEST_BOOL");
        assert_eq!(Environment::get_bool("REVTRAIL_TEST_BOOL"), None);
    }
}
