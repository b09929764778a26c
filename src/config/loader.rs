//! Configuration loader with layered sources
//!
//! Loads configuration from multiple sources with the following precedence
//! (highest to lowest):
//! 1. Conventional environment variables (GRANULAR_PERMISSIONS)
//! 2. Environment variables (ACCESS_WARDEN__*)
//! 3. Configuration file (TOML)
//! 4. Default values

use crate::config::types::AppConfig;
use crate::error::ConfigError;
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

/// Default configuration file paths to check (in order)
const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "access-warden.toml",
    ".access-warden.toml",
    "~/.config/access-warden/config.toml",
    "/etc/access-warden/config.toml",
];

/// Conventional flag variable, honored regardless of `permissions.flag_env`
pub const FLAG_ENV_VAR: &str = "GRANULAR_PERMISSIONS";

/// Load configuration from a TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(toml_str, FileFormat::Toml))
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let mut app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    expand_paths(&mut app_config);
    validate_config(&app_config)?;

    Ok(app_config)
}

/// Load configuration from files and environment
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. Start with defaults (handled by serde defaults on AppConfig)

    // 2. Add configuration file
    if let Some(path) = config_path {
        // Explicit path provided - must exist
        let expanded = shellexpand::tilde(path);
        if !Path::new(expanded.as_ref()).exists() {
            return Err(ConfigError::Load(format!(
                "Configuration file not found: {}",
                path
            )));
        }
        builder = builder.add_source(File::new(&expanded, FileFormat::Toml));
    } else {
        // Try default paths (first existing one wins)
        for path in DEFAULT_CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                builder = builder.add_source(File::new(&expanded, FileFormat::Toml));
                break;
            }
        }
    }

    // 3. Add environment variables with ACCESS_WARDEN prefix
    // e.g., ACCESS_WARDEN__PERMISSIONS__ENABLED, ACCESS_WARDEN__STORAGE__ENTRIES_PATH
    // Double underscore (__) maps to nested keys (permissions.enabled)
    builder = builder.add_source(
        Environment::with_prefix("ACCESS_WARDEN")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    // 4. Handle the conventional flag variable
    if let Ok(raw) = std::env::var(FLAG_ENV_VAR) {
        let enabled = crate::access_control::flag::parse_flag(&raw).ok_or_else(|| {
            ConfigError::Invalid {
                message: format!("{} must be a boolean, got: {}", FLAG_ENV_VAR, raw),
            }
        })?;
        builder = builder
            .set_override("permissions.enabled", enabled)
            .map_err(|e| ConfigError::Load(e.to_string()))?;
    }

    // Build and deserialize
    let config = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let mut app_config: AppConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    expand_paths(&mut app_config);
    validate_config(&app_config)?;

    Ok(app_config)
}

fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(raw) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
        None => path.to_path_buf(),
    }
}

fn expand_paths(config: &mut AppConfig) {
    config.storage.entries_path = expand_path(&config.storage.entries_path);
    config.storage.directory_path = expand_path(&config.storage.directory_path);
}

/// Validate configuration values
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.permissions.flag_env.trim().is_empty() {
        return Err(ConfigError::Missing {
            field: "permissions.flag_env".to_string(),
        });
    }

    if config.storage.entries_path.as_os_str().is_empty() {
        return Err(ConfigError::Missing {
            field: "storage.entries_path".to_string(),
        });
    }

    if config.storage.directory_path.as_os_str().is_empty() {
        return Err(ConfigError::Missing {
            field: "storage.directory_path".to_string(),
        });
    }

    if tracing_subscriber::EnvFilter::try_new(&config.logging.level).is_err() {
        return Err(ConfigError::Invalid {
            message: format!("logging.level is not a valid filter: {}", config.logging.level),
        });
    }

    Ok(())
}
