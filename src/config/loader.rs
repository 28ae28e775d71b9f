//! Configuration Loader
//!
//! Environment-aware configuration loading built on the `config` crate:
//! base file, environment overlay file, then `COURIER__`-prefixed
//! environment variables.

use super::error::{ConfigResult, ConfigurationError};
use super::CourierConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

static GLOBAL_CONFIG: OnceLock<Arc<ConfigManager>> = OnceLock::new();

const SENSITIVE_PATTERNS: [&str; 6] = ["password", "secret", "key", "token", "credential", "auth"];

/// Loaded, validated, immutable configuration
#[derive(Debug)]
pub struct ConfigManager {
    config: CourierConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Process-wide configuration, loaded on first access
    pub fn global() -> ConfigResult<Arc<ConfigManager>> {
        if let Some(manager) = GLOBAL_CONFIG.get() {
            return Ok(Arc::clone(manager));
        }
        let loaded = Self::load()?;
        // A concurrent caller may have won the race; both loads are equivalent.
        let _ = GLOBAL_CONFIG.set(Arc::clone(&loaded));
        Ok(GLOBAL_CONFIG.get().cloned().unwrap_or(loaded))
    }

    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    ///
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        let manager = ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        };

        info!(
            environment = environment,
            broker = ?manager.config.broker.provider,
            config = %manager.redacted(),
            "Configuration loaded"
        );

        Ok(Arc::new(manager))
    }

    /// Wrap an already-built configuration (tests, embedding)
    pub fn from_config(config: CourierConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    fn load_and_merge_config(directory: &Path, environment: &str) -> ConfigResult<CourierConfig> {
        let base = directory.join("courier");
        let overlay = directory.join(format!("courier.{environment}"));

        Config::builder()
            .add_source(File::with_name(&base.to_string_lossy()).required(false))
            .add_source(File::with_name(&overlay.to_string_lossy()).required(false))
            .add_source(
                Environment::with_prefix("COURIER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|merged| merged.try_deserialize::<CourierConfig>())
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Configuration as JSON with secrets masked, safe to log
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        Self::redact_recursive(&mut value);
        value
    }

    fn redact_recursive(value: &mut serde_json::Value) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = SENSITIVE_PATTERNS
                        .iter()
                        .any(|pattern| key_lower.contains(pattern))
                        || key_lower.ends_with("database_url");

                    if is_sensitive {
                        if !val.is_null() {
                            *val = serde_json::Value::String("[MASKED]".to_string());
                        }
                    } else {
                        Self::redact_recursive(val);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items.iter_mut() {
                    Self::redact_recursive(item);
                }
            }
            _ => {}
        }
    }

    /// `COURIER_ENV`, then `APP_ENV`, default `development`
    pub fn detect_environment() -> String {
        env::var("COURIER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerKind, LogFormat};
    use crate::messaging::TaskKind;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_directory_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();

        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().broker.provider, BrokerKind::InMemory);
        assert_eq!(manager.config().scheduler.entries[0].name, "poll-email");
    }

    #[test]
    fn test_environment_overlay_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("courier.toml"),
            r#"
[workers.defaults]
concurrency = 4

[logging]
format = "json"
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("courier.production.toml"),
            r#"
[workers.defaults]
concurrency = 16

[workers.overrides.git_jira_execute]
concurrency = 2
"#,
        )
        .unwrap();

        let manager = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "production",
        )
        .unwrap();
        let config = manager.config();

        assert!(manager.is_production());
        assert_eq!(config.workers.defaults.concurrency, 16);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.workers.settings_for(TaskKind::GitJiraExecute).concurrency,
            2
        );
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("courier.toml"),
            "[backoff]\nbase_delay_ms = 0\n",
        )
        .unwrap();

        let err =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_redacted_masks_secrets() {
        let mut config = CourierConfig::default();
        config.callback.auth_token = Some("super-secret-token".to_string());
        config.broker.database_url = Some("postgres://user:pw@db/courier".to_string());

        let manager = ConfigManager::from_config(config, "test").unwrap();
        let redacted = manager.redacted();

        assert_eq!(redacted["callback"]["auth_token"], "[MASKED]");
        assert_eq!(redacted["broker"]["database_url"], "[MASKED]");
        assert_eq!(redacted["callback"]["max_attempts"], 3);
    }
}
