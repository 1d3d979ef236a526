//! Configuration module.
//!
//! Typed settings that map onto the YAML configuration file, with loading,
//! defaulting, and validation, in the same style as a conventional
//! ports-and-adapters daemon's config layer.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Absolute, existing local directory under which all relative paths
    /// are interpreted.
    pub sync_root: PathBuf,
    /// Consecutive-failure budget before an entry is marked `FAILED`.
    /// Range 1…100, default 3; out-of-range values are clamped silently.
    pub max_retries: u32,
    /// Periodic local-reconcile timer interval, seconds. Range 5…3600,
    /// default 30.
    pub cloud_check_interval_sec: u64,
    /// Periodic pull timer interval, seconds. Range 5…3600, default 60.
    pub refresh_interval_sec: u64,
    /// Base URL of the cloud REST adapter.
    pub base_url: String,
    /// Path to the sync index database file.
    pub index_db_path: PathBuf,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("dmirror");
        Self {
            sync_root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("CloudDrive"),
            max_retries: 3,
            cloud_check_interval_sec: 30,
            refresh_interval_sec: 60,
            base_url: "https://cloud-api.example.com/v1".to_string(),
            index_db_path: data_dir.join("sync_index.db"),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    /// Loads settings from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut settings: Settings = serde_yaml::from_str(&content)?;
        settings.clamp_ranges();
        Ok(settings)
    }

    /// Tries to load from `path`; falls back to [`Settings::default`] on any
    /// error (missing file, parse failure).
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file,
    /// typically `$XDG_CONFIG_HOME/dmirror/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("dmirror")
            .join("config.yaml")
    }

    /// Clamps `max_retries`, `cloud_check_interval_sec`, and
    /// `refresh_interval_sec` into their documented ranges, silently
    /// discarding out-of-range input rather than rejecting it.
    pub fn clamp_ranges(&mut self) {
        self.max_retries = self.max_retries.clamp(1, 100);
        self.cloud_check_interval_sec = self.cloud_check_interval_sec.clamp(5, 3600);
        self.refresh_interval_sec = self.refresh_interval_sec.clamp(5, 3600);
    }

    /// Validates fields that cannot be silently repaired by clamping.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        if self.base_url.is_empty() {
            errors.push(ValidationError {
                field: "base_url".into(),
                message: "must not be empty".into(),
            });
        }

        let root_str = self.sync_root.to_string_lossy();
        if !root_str.starts_with('~') && !self.sync_root.is_absolute() {
            errors.push(ValidationError {
                field: "sync_root".into(),
                message: format!("must be absolute: {}", self.sync_root.display()),
            });
        }

        errors
    }
}

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"logging.level"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let settings = Settings::default();
        assert!(settings.validate().is_empty());
    }

    #[test]
    fn clamp_ranges_enforces_bounds() {
        let mut settings = Settings::default();
        settings.max_retries = 0;
        settings.cloud_check_interval_sec = 1;
        settings.refresh_interval_sec = 999_999;
        settings.clamp_ranges();

        assert_eq!(settings.max_retries, 1);
        assert_eq!(settings.cloud_check_interval_sec, 5);
        assert_eq!(settings.refresh_interval_sec, 3600);
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let mut settings = Settings::default();
        settings.logging.level = "verbose".to_string();
        let errors = settings.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "logging.level");
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let settings = Settings::load_or_default(Path::new("/nonexistent/config.yaml"));
        assert_eq!(settings.max_retries, 3);
    }
}
