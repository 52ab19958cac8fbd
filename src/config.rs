//! Runner configuration using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (optional; missing files are skipped)
//! 2. Environment variables prefixed with `RO_SCRIPT_`
//!
//! Every field has a default, so an empty configuration is valid.
//!
//! # Example
//! ```no_run
//! use ro_script::config::RunnerConfig;
//!
//! # fn main() -> Result<(), ro_script::error::ConfigError> {
//! let config = RunnerConfig::load_from("ro-script.toml")?;
//! println!("debug mode: {}", config.debug_mode);
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable prefix, e.g. `RO_SCRIPT_DEBUG_MODE=true`
pub const ENV_PREFIX: &str = "RO_SCRIPT_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Settings shared by every runner an application builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Short-circuit every wait (dry run)
    #[serde(default)]
    pub debug_mode: bool,
    /// How often a background-task wait checks for its result
    #[serde(default = "default_thread_poll_interval")]
    pub thread_poll_interval_ms: u64,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_thread_poll_interval() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            debug_mode: false,
            thread_poll_interval_ms: default_thread_poll_interval(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl RunnerConfig {
    /// Load defaults overridden by environment variables only.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(Self::figment())
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX)),
        )
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default())).merge(Env::prefixed(ENV_PREFIX))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if !VALID_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LEVELS.join(", ")
            ));
        }

        if !VALID_FORMATS.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.log_format,
                VALID_FORMATS.join(", ")
            ));
        }

        if self.thread_poll_interval_ms == 0 {
            return Err("thread_poll_interval_ms must be greater than 0".to_string());
        }

        Ok(())
    }

    /// `thread_poll_interval_ms` as a `Duration`.
    pub fn thread_poll_interval(&self) -> Duration {
        Duration::from_millis(self.thread_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = RunnerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.thread_poll_interval(), Duration::from_millis(100));
        assert!(!config.debug_mode);
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "debug_mode = true\nthread_poll_interval_ms = 25\nlog_format = \"json\""
        )
        .unwrap();

        let config = RunnerConfig::load_from(file.path()).unwrap();
        assert!(config.debug_mode);
        assert_eq!(config.thread_poll_interval_ms, 25);
        assert_eq!(config.log_format, "json");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.thread_poll_interval_ms, 100);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = RunnerConfig {
            log_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.log_format = "xml".to_string();
        assert!(config.validate().is_err());

        config.log_format = "compact".to_string();
        config.thread_poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_file_reports_validation_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "thread_poll_interval_ms = 0").unwrap();

        let err = RunnerConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
