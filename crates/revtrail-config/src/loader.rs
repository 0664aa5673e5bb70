//! Configuration file loading and parsing.
//!
//! The file carries the audit options and the declarative part of the
//! global tier. Computed overrides, type predicates and mapping rules are
//! registered in code on top of what is loaded here.

use crate::env::{vars, EnvError, Environment};
use crate::options::AuditOptions;
use crate::types::{CaptureMode, SettingsTier, TypeSettings};
use indexmap::IndexMap;
use revtrail_types::FieldValue;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const ENV_PATTERN: &str = r"\$\{([^}:]+)(?::-([^}]*))?\}";

/// Config loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {source}")]
    ReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid YAML at line {}: {message}", line.map(|l| l.to_string()).unwrap_or_else(|| "unknown".to_string()))]
    ParseError { line: Option<usize>, message: String },

    #[error("validation error: {message}")]
    ValidationError { message: String },

    #[error("environment variable not found: {var}")]
    EnvVarNotFound { var: String },

    #[error(transparent)]
    Env(#[from] EnvError),
}

/// Field rules for one type as written in the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeRules {
    /// Fields left out of captured values.
    pub ignored_fields: Vec<String>,
    /// Fields replaced by a constant.
    pub masked_fields: IndexMap<String, FieldValue>,
}

impl TypeRules {
    fn to_settings(&self) -> TypeSettings {
        let mut settings = TypeSettings::new();
        for field in &self.ignored_fields {
            settings = settings.ignore(field.clone());
        }
        for (field, value) in &self.masked_fields {
            settings = settings.mask(field.clone(), value.clone());
        }
        settings
    }
}

/// Contents of an audit configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditFileConfig {
    /// Store-level options.
    pub options: AuditOptions,
    /// Capture mode for the global tier.
    pub mode: Option<CaptureMode>,
    /// Types captured in opt-in mode.
    pub included_types: Vec<String>,
    /// Types skipped in opt-out mode.
    pub ignored_types: Vec<String>,
    /// Per-type field rules.
    pub types: IndexMap<String, TypeRules>,
}

impl AuditFileConfig {
    /// Build the global tier described by the file.
    pub fn global_tier(&self) -> SettingsTier {
        let mut tier = SettingsTier::new();
        if let Some(mode) = self.mode {
            tier = tier.with_mode(mode);
        }
        for name in &self.included_types {
            tier = tier.include_type(name.clone());
        }
        for name in &self.ignored_types {
            tier = tier.ignore_type(name.clone());
        }
        for (name, rules) in &self.types {
            tier = tier.with_type(name.clone(), rules.to_settings());
        }
        tier
    }
}

/// Configuration loader.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    /// Create a loader for a config file path.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Create a loader for `REVTRAIL_CONFIG_PATH`, defaulting to `revtrail.yaml`.
    pub fn from_env() -> Self {
        Self::new(Environment::get(vars::REVTRAIL_CONFIG_PATH).unwrap_or_else(|| "revtrail.yaml".to_string()))
    }

    /// Path this loader reads.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file, returning defaults when it does not exist.
    pub fn load(&self) -> Result<AuditFileConfig, ConfigError> {
        if !self.path.exists() {
            return Ok(AuditFileConfig::default());
        }

        let contents = std::fs::read_to_string(&self.path)?;
        self.parse(&contents)
    }

    /// Load the file and apply `REVTRAIL_*` environment overrides.
    pub fn load_effective(&self) -> Result<AuditFileConfig, ConfigError> {
        let mut config = self.load()?;
        Environment::apply_overrides(&mut config.options)?;
        Ok(config)
    }

    /// Parse configuration text.
    pub fn parse(&self, contents: &str) -> Result<AuditFileConfig, ConfigError> {
        let expanded = self.expand_env_vars(contents)?;

        let config: AuditFileConfig = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::ParseError {
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;

        self.validate(&config)?;
        Ok(config)
    }

    /// Expand environment variables in the form `${VAR}` or `${VAR:-default}`.
    fn expand_env_vars(&self, content: &str) -> Result<String, ConfigError> {
        let re = regex::Regex::new(ENV_PATTERN).map_err(|e| ConfigError::ParseError {
            line: None,
            message: e.to_string(),
        })?;
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let Some(full_match) = cap.get(0) else { continue };
            let var_name = &cap[1];
            let default = cap.get(2).map(|m| m.as_str());

            let value = match std::env::var(var_name) {
                Ok(v) => v,
                Err(_) => match default {
                    Some(d) => d.to_string(),
                    None => {
                        return Err(ConfigError::EnvVarNotFound {
                            var: var_name.to_string(),
                        })
                    }
                },
            };

            result = result.replace(full_match.as_str(), &value);
        }

        Ok(result)
    }

    /// Validate configuration values.
    fn validate(&self, config: &AuditFileConfig) -> Result<(), ConfigError> {
        if config.options.event_type.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "options.event_type must not be empty".to_string(),
            });
        }

        if let Some(name) = config
            .included_types
            .iter()
            .find(|name| config.ignored_types.contains(name))
        {
            return Err(ConfigError::ValidationError {
                message: format!("type `{}` is both included and ignored", name),
            });
        }

        if config.types.keys().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::ValidationError {
                message: "type names must not be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Save configuration to the loader's path.
    pub fn save(&self, config: &AuditFileConfig) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml::to_string(config)
            .map_err(|e| ConfigError::ParseError {
                line: None,
                message: e.to_string(),
            })?;

        std::fs::write(&self.path, yaml)?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::from_env()
    }
}
