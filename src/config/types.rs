//! Configuration types for access-warden
//!
//! This module defines the configuration structure that can be loaded from
//! TOML files and/or environment variables.

use crate::access_control::flag::{SharedFlag, flag_from_env};
use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Granular access control switch
    pub permissions: PermissionsConfig,

    /// Where entries and the directory live
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Feature flag configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Whether granular access control is on (default: off, everyone allowed)
    pub enabled: bool,

    /// Environment variable re-read at evaluation time
    pub flag_env: String,

    /// How long a flag read is reused, in seconds (0 reads on every evaluation)
    pub flag_cache_secs: u64,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            flag_env: "GRANULAR_PERMISSIONS".to_string(),
            flag_cache_secs: 30,
        }
    }
}

impl PermissionsConfig {
    /// Flag accessor for the engine: `flag_env` when set, else `enabled`
    pub fn flag(&self) -> SharedFlag {
        flag_from_env(&self.flag_env, self.enabled, self.flag_cache_secs)
    }
}

/// Storage locations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file holding access entries
    pub entries_path: PathBuf,

    /// TOML file describing users, teams and resources
    pub directory_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            entries_path: default_entries_path(),
            directory_path: PathBuf::from("directory.toml"),
        }
    }
}

fn default_entries_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("access-warden").join("entries.json"))
        .unwrap_or_else(|| PathBuf::from("entries.json"))
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON structured output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(!config.permissions.enabled);
        assert_eq!(config.permissions.flag_env, "GRANULAR_PERMISSIONS");
        assert_eq!(config.permissions.flag_cache_secs, 30);
        assert_eq!(config.storage.directory_path, PathBuf::from("directory.toml"));
        assert!(config.storage.entries_path.ends_with("entries.json"));
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_deserialize_log_format() {
        let format: LogFormat = serde_json::from_str(r#""json""#).unwrap();
        assert_eq!(format, LogFormat::Json);

        let format: LogFormat = serde_json::from_str(r#""pretty""#).unwrap();
        assert_eq!(format, LogFormat::Pretty);

        assert!(serde_json::from_str::<LogFormat>(r#""xml""#).is_err());
    }
}
