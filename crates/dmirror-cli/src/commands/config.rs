//! Config command - view and manage dmirror configuration
//!
//! Provides the `dmirror config` CLI command which:
//! 1. Shows the current configuration (YAML or JSON)
//! 2. Sets individual configuration values via dot-notation keys
//! 3. Validates the configuration file and reports errors

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g., "max_retries")
        key: String,
        /// New value
        value: String,
    },
    /// Validate configuration file
    Validate,
}

impl ConfigCommand {
    /// Execute the config command
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(format).await,
            ConfigCommand::Set { key, value } => self.execute_set(key, value, format).await,
            ConfigCommand::Validate => self.execute_validate(format).await,
        }
    }

    /// Show current configuration
    async fn execute_show(&self, format: OutputFormat) -> Result<()> {
        use dmirror_core::config::Settings;

        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let config_path = Settings::default_path();
        let settings = Settings::load_or_default(&config_path);

        info!(config_path = %config_path.display(), "showing configuration");

        if matches!(format, OutputFormat::Json) {
            let json = serde_json::to_value(&settings)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            formatter.success(&format!("Configuration ({})", config_path.display()));
            formatter.info("");

            let yaml = serde_yaml::to_string(&settings)
                .context("Failed to serialize configuration to YAML")?;

            for line in yaml.lines() {
                formatter.info(line);
            }
        }

        Ok(())
    }

    /// Set a configuration value using dot-notation
    async fn execute_set(&self, key: &str, value: &str, format: OutputFormat) -> Result<()> {
        use dmirror_core::config::Settings;

        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let config_path = Settings::default_path();
        let mut settings = Settings::load_or_default(&config_path);

        info!(key = %key, value = %value, "setting configuration value");

        match apply_config_value(&mut settings, key, value) {
            Ok(()) => {
                settings.clamp_ranges();
                let errors: Vec<String> = settings.validate().iter().map(|e| e.to_string()).collect();

                if !errors.is_empty() {
                    if matches!(format, OutputFormat::Json) {
                        formatter.print_json(&serde_json::json!({
                            "success": false,
                            "key": key,
                            "value": value,
                            "errors": errors,
                        }));
                    } else {
                        formatter.error(&format!(
                            "Invalid value for '{}': {}",
                            key,
                            errors.join("; ")
                        ));
                    }
                    return Ok(());
                }

                if let Some(parent) = config_path.parent() {
                    std::fs::create_dir_all(parent)
                        .context("Failed to create configuration directory")?;
                }

                let yaml = serde_yaml::to_string(&settings)
                    .context("Failed to serialize configuration")?;
                std::fs::write(&config_path, &yaml)
                    .context("Failed to write configuration file")?;

                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&serde_json::json!({
                        "success": true,
                        "key": key,
                        "value": value,
                        "config_path": config_path.display().to_string(),
                    }));
                } else {
                    formatter.success(&format!("Set {} = {}", key, value));
                    formatter.info(&format!("Saved to {}", config_path.display()));
                }
            }
            Err(e) => {
                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&serde_json::json!({
                        "success": false,
                        "key": key,
                        "value": value,
                        "error": e.to_string(),
                    }));
                } else {
                    formatter.error(&format!("Failed to set '{}': {}", key, e));
                    formatter.info("");
                    formatter.info("Supported keys:");
                    formatter.info("  sync_root                   - Local sync root directory");
                    formatter.info("  max_retries                 - Consecutive failures before FAILED (1-100)");
                    formatter.info("  cloud_check_interval_sec    - Local-reconcile timer, seconds (5-3600)");
                    formatter.info("  refresh_interval_sec        - Periodic pull timer, seconds (5-3600)");
                    formatter.info("  base_url                    - Cloud REST API base URL");
                    formatter.info("  index_db_path               - Sync index database file path");
                    formatter.info("  logging.level               - trace|debug|info|warn|error");
                }
            }
        }

        Ok(())
    }

    /// Validate configuration file
    async fn execute_validate(&self, format: OutputFormat) -> Result<()> {
        use dmirror_core::config::Settings;

        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let config_path = Settings::default_path();

        let settings = match Settings::load(&config_path) {
            Ok(settings) => settings,
            Err(e) => {
                if !config_path.exists() {
                    if matches!(format, OutputFormat::Json) {
                        formatter.print_json(&serde_json::json!({
                            "valid": false,
                            "config_path": config_path.display().to_string(),
                            "errors": ["Configuration file not found. Using defaults."],
                        }));
                    } else {
                        formatter.info(&format!(
                            "Configuration file not found at {}",
                            config_path.display()
                        ));
                        formatter
                            .info("Using default configuration. Run 'dmirror config set <key> <value>' to create one.");
                    }
                    return Ok(());
                }

                if matches!(format, OutputFormat::Json) {
                    formatter.print_json(&serde_json::json!({
                        "valid": false,
                        "config_path": config_path.display().to_string(),
                        "errors": [format!("Failed to parse configuration: {}", e)],
                    }));
                } else {
                    formatter.error(&format!("Failed to parse configuration: {}", e));
                    formatter.info(&format!("File: {}", config_path.display()));
                }
                return Ok(());
            }
        };

        info!(config_path = %config_path.display(), "validating configuration");

        let errors = settings.validate();

        if matches!(format, OutputFormat::Json) {
            let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            formatter.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": config_path.display().to_string(),
                "errors": error_strings,
            }));
        } else if errors.is_empty() {
            formatter.success("Configuration is valid");
            formatter.info(&format!("File: {}", config_path.display()));
        } else {
            formatter.error(&format!(
                "Configuration has {} error{}:",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" }
            ));
            formatter.info(&format!("File: {}", config_path.display()));
            formatter.info("");
            for error in &errors {
                formatter.info(&format!("  {} - {}", error.field, error.message));
            }
        }

        Ok(())
    }
}

/// Applies a dot-notation key/value pair to a `Settings` struct.
///
/// Supported keys: `sync_root`, `max_retries`, `cloud_check_interval_sec`,
/// `refresh_interval_sec`, `base_url`, `index_db_path`, `logging.level`.
fn apply_config_value(settings: &mut dmirror_core::config::Settings, key: &str, value: &str) -> Result<()> {
    match key {
        "sync_root" => {
            settings.sync_root = PathBuf::from(value);
        }
        "max_retries" => {
            settings.max_retries = value
                .parse::<u32>()
                .context("Expected a positive integer for max_retries")?;
        }
        "cloud_check_interval_sec" => {
            settings.cloud_check_interval_sec = value
                .parse::<u64>()
                .context("Expected a positive integer for cloud_check_interval_sec")?;
        }
        "refresh_interval_sec" => {
            settings.refresh_interval_sec = value
                .parse::<u64>()
                .context("Expected a positive integer for refresh_interval_sec")?;
        }
        "base_url" => {
            settings.base_url = value.to_string();
        }
        "index_db_path" => {
            settings.index_db_path = PathBuf::from(value);
        }
        "logging.level" => {
            settings.logging.level = value.to_string();
        }
        _ => {
            anyhow::bail!("Unknown configuration key: '{}'", key);
        }
    }

    Ok(())
}
