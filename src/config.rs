//! Configuration for the hot-reload store.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `REKINDLE_` and use double
//! underscores to separate nested levels:
//! - `REKINDLE_CHECKING_INTERVAL=5.0` sets `checking_interval`
//! - `REKINDLE_LOGGING__DEFAULT=debug` sets `logging.default`
//! - `REKINDLE_NATIVE_WATCH=false` sets `native_watch`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Default configuration file name, looked up in the current directory.
pub const CONFIG_FILE: &str = "rekindle.toml";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Root directory against which relative artifact paths resolve.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Time budget (seconds) to check every watched path exactly once.
    #[serde(default = "default_checking_interval")]
    pub checking_interval: f64,

    /// Ordered path templates for module resolution; each contains one `?`
    /// marker replaced by the module name with `.` rewritten to `/`.
    #[serde(default = "default_module_templates")]
    pub module_templates: Vec<String>,

    /// Whether to open native directory-watch handles when available.
    #[serde(default = "default_true")]
    pub native_watch: bool,

    /// Whether absolute paths outside the root are permitted.
    #[serde(default = "default_false")]
    pub allow_external_paths: bool,

    /// Template for messages emitted through `Store::log`.
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log level configuration with per-module overrides.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Default level for all modules.
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module level overrides, e.g. `store = "debug"`.
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_checking_interval() -> f64 {
    1.0
}
fn default_module_templates() -> Vec<String> {
    vec!["?.lua".to_string(), "?/init.lua".to_string()]
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_format() -> String {
    "%d %t %m".to_string()
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            root: default_root(),
            checking_interval: default_checking_interval(),
            module_templates: default_module_templates(),
            native_watch: true,
            allow_external_paths: false,
            log_format: default_log_format(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(CONFIG_FILE))
            // Layer in environment variables with REKINDLE_ prefix
            // Use double underscore (__) to separate nested levels
            .merge(Env::prefixed("REKINDLE_").map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".") // Double underscore becomes dot
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("REKINDLE_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.root, PathBuf::from("."));
        assert_eq!(settings.checking_interval, 1.0);
        assert_eq!(settings.module_templates.len(), 2);
        assert!(settings.native_watch);
        assert!(!settings.allow_external_paths);
        assert_eq!(settings.log_format, "%d %t %m");
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rekindle.toml");

        let toml_content = r#"
checking_interval = 2.5
module_templates = ["scripts/?.lua"]
native_watch = false

[logging]
default = "info"

[logging.modules]
store = "debug"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.checking_interval, 2.5);
        assert_eq!(settings.module_templates, vec!["scripts/?.lua"]);
        assert!(!settings.native_watch);
        assert_eq!(settings.logging.default, "info");
        assert_eq!(settings.logging.modules["store"], "debug");
        // Untouched keys keep their defaults
        assert_eq!(settings.log_format, "%d %t %m");
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rekindle.toml");

        let mut settings = Settings::default();
        settings.checking_interval = 0.25;
        settings.allow_external_paths = true;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert_eq!(loaded.checking_interval, 0.25);
        assert!(loaded.allow_external_paths);
    }

    #[test]
    fn test_env_override() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rekindle.toml");

        fs::write(
            &config_path,
            "checking_interval = 2.0\nnative_watch = true\n",
        )
        .unwrap();

        // Environment variables should override the config file. Keys here
        // are ones no sibling test asserts a conflicting value for, since
        // the process environment is shared across test threads.
        unsafe {
            std::env::set_var("REKINDLE_ALLOW_EXTERNAL_PATHS", "true");
            std::env::set_var("REKINDLE_NATIVE_WATCH", "false");
        }

        let settings = Settings::load_from(&config_path).unwrap();
        // Env beats file; file beats defaults.
        assert!(settings.allow_external_paths);
        assert!(!settings.native_watch);
        assert_eq!(settings.checking_interval, 2.0);

        unsafe {
            std::env::remove_var("REKINDLE_ALLOW_EXTERNAL_PATHS");
            std::env::remove_var("REKINDLE_NATIVE_WATCH");
        }
    }
}
