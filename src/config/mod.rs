//! # Courier Configuration System
//!
//! Layered, environment-aware configuration. Every section has defaults, so an
//! empty configuration directory yields a runnable single-process setup with the
//! in-memory broker.
//!
//! ## Sources (later wins)
//!
//! 1. `config/courier.toml`
//! 2. `config/courier.{environment}.toml`
//! 3. Environment variables `COURIER__SECTION__KEY` (e.g. `COURIER__BROKER__PROVIDER=postgres`)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use courier_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::global()?;
//! let concurrency = manager.config().workers.defaults.concurrency;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

use crate::constants::defaults;
use crate::messaging::TaskKind;
use crate::scheduler::ScheduleSpec;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CourierConfig {
    pub broker: BrokerConfig,
    pub queues: QueuesConfig,
    pub workers: WorkersConfig,
    pub backoff: BackoffConfig,
    pub callback: CallbackConfig,
    pub scheduler: SchedulerConfig,
    pub classification: ClassificationConfig,
    pub preview: PreviewConfig,
    pub external: ExternalConfig,
    pub logging: LoggingConfig,
}

/// Which broker provider to run against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub provider: BrokerKind,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            provider: BrokerKind::InMemory,
            database_url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct QueuesConfig {
    /// Deployment namespace; queues become `{prefix}_{name}`
    pub prefix: Option<String>,
}

/// Effective settings for one worker pool
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    pub concurrency: usize,
    pub max_attempts: u32,
    pub handler_timeout_seconds: u64,
    pub visibility_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub drain_timeout_seconds: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            concurrency: defaults::POOL_CONCURRENCY,
            max_attempts: defaults::MAX_ATTEMPTS,
            handler_timeout_seconds: defaults::HANDLER_TIMEOUT_SECONDS,
            visibility_timeout_seconds: defaults::VISIBILITY_TIMEOUT_SECONDS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            drain_timeout_seconds: defaults::DRAIN_TIMEOUT_SECONDS,
        }
    }
}

impl PoolSettings {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_seconds)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

/// Per-kind overrides; unset fields fall back to `workers.defaults`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolOverride {
    pub concurrency: Option<usize>,
    pub max_attempts: Option<u32>,
    pub handler_timeout_seconds: Option<u64>,
    pub visibility_timeout_seconds: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub drain_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub defaults: PoolSettings,
    pub overrides: HashMap<TaskKind, PoolOverride>,
    /// How long completed dedup keys and delivered reports are remembered
    pub dedup_retention_seconds: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            defaults: PoolSettings::default(),
            overrides: HashMap::new(),
            dedup_retention_seconds: defaults::DEDUP_RETENTION_SECONDS,
        }
    }
}

impl WorkersConfig {
    pub fn dedup_retention(&self) -> Duration {
        Duration::from_secs(self.dedup_retention_seconds)
    }

    /// Longest time a message can keep coming back for the pool serving `kind`
    pub fn redelivery_horizon(&self, kind: TaskKind, backoff: &BackoffConfig) -> Duration {
        let settings = self.settings_for(kind);
        let per_attempt = settings.visibility_timeout_seconds * 1_000 + backoff.max_delay_ms;
        Duration::from_millis(per_attempt.saturating_mul(u64::from(settings.max_attempts)))
    }

    /// Effective settings for the pool serving `kind`
    pub fn settings_for(&self, kind: TaskKind) -> PoolSettings {
        let base = self.defaults.clone();
        let Some(o) = self.overrides.get(&kind) else {
            return base;
        };
        PoolSettings {
            concurrency: o.concurrency.unwrap_or(base.concurrency),
            max_attempts: o.max_attempts.unwrap_or(base.max_attempts),
            handler_timeout_seconds: o
                .handler_timeout_seconds
                .unwrap_or(base.handler_timeout_seconds),
            visibility_timeout_seconds: o
                .visibility_timeout_seconds
                .unwrap_or(base.visibility_timeout_seconds),
            poll_interval_ms: o.poll_interval_ms.unwrap_or(base.poll_interval_ms),
            drain_timeout_seconds: o
                .drain_timeout_seconds
                .unwrap_or(base.drain_timeout_seconds),
        }
    }
}

/// Exponential retry backoff: `min(base * multiplier^(attempt-1), max)`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: defaults::BACKOFF_BASE_MS,
            multiplier: defaults::BACKOFF_MULTIPLIER,
            max_delay_ms: defaults::BACKOFF_MAX_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Coordinating service intake endpoint
    pub intake_url: String,
    pub auth_token: Option<String>,
    pub max_attempts: u32,
    pub attempt_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub total_timeout_ms: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            intake_url: defaults::INTAKE_URL.to_string(),
            auth_token: None,
            max_attempts: 3,
            attempt_timeout_ms: 5_000,
            retry_delay_ms: 250,
            total_timeout_ms: 20_000,
        }
    }
}

impl CallbackConfig {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerLockKind {
    /// Single-process exclusion only
    #[default]
    Local,
    /// PostgreSQL advisory lock shared by every process on the database
    Postgres,
}

/// One configured schedule entry; exactly one of `every_seconds` / `cron` is set
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScheduleEntryConfig {
    pub name: String,
    #[serde(default)]
    pub every_seconds: Option<u64>,
    #[serde(default)]
    pub cron: Option<String>,
    pub task_kind: TaskKind,
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
}

fn empty_payload() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub lock: SchedulerLockKind,
    pub lock_key: i64,
    pub lock_retry_seconds: u64,
    pub entries: Vec<ScheduleEntryConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lock: SchedulerLockKind::Local,
            lock_key: defaults::SCHEDULER_LOCK_KEY,
            lock_retry_seconds: 15,
            entries: vec![ScheduleEntryConfig {
                name: "poll-email".to_string(),
                every_seconds: Some(defaults::EMAIL_POLL_INTERVAL_SECONDS),
                cron: None,
                task_kind: TaskKind::EmailPoll,
                payload: empty_payload(),
            }],
        }
    }
}

impl SchedulerConfig {
    pub fn lock_retry(&self) -> Duration {
        Duration::from_secs(self.lock_retry_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Classifications below this confidence are terminal failures
    pub confidence_threshold: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub repos_dir: PathBuf,
    pub base_url: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            repos_dir: PathBuf::from(defaults::PREVIEW_REPOS_DIR),
            base_url: defaults::PREVIEW_BASE_URL.to_string(),
        }
    }
}

/// Endpoints and credentials of external collaborators
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExternalConfig {
    pub mailbox_url: String,
    pub classifier_url: String,
    pub vcs_url: String,
    pub reply_url: String,
    pub api_token: Option<String>,
    pub request_timeout_ms: u64,
    /// Unread messages fetched per mailbox poll
    pub mailbox_batch_size: usize,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        let base = defaults::COLLABORATOR_BASE_URL;
        Self {
            mailbox_url: format!("{base}/api/v1/mailbox"),
            classifier_url: format!("{base}/api/v1/classify"),
            vcs_url: format!("{base}/api/v1/vcs"),
            reply_url: format!("{base}/api/v1/replies"),
            api_token: None,
            request_timeout_ms: 30_000,
            mailbox_batch_size: 25,
        }
    }
}

impl ExternalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Explicit filter directive; `RUST_LOG` still wins when set
    pub level: Option<String>,
    pub format: LogFormat,
    /// Directory for an additional daily-rotated JSON log file
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: LogFormat::Pretty,
            log_dir: None,
            file_prefix: "courier".to_string(),
        }
    }
}

impl CourierConfig {
    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.broker.provider == BrokerKind::Postgres
            && self.broker.database_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigurationError::missing_required_field(
                "broker.database_url",
                "postgres broker configuration",
            ));
        }

        if self.scheduler.lock == SchedulerLockKind::Postgres
            && self.broker.database_url.as_deref().map_or(true, str::is_empty)
        {
            return Err(ConfigurationError::missing_required_field(
                "broker.database_url",
                "postgres scheduler lock",
            ));
        }

        if let Some(prefix) = &self.queues.prefix {
            if !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(ConfigurationError::invalid_value(
                    "queues.prefix",
                    prefix.clone(),
                    "prefix may only contain ASCII letters, digits, '_' and '-'",
                ));
            }
        }

        self.validate_pool("workers.defaults", &self.workers.defaults)?;
        for kind in self.workers.overrides.keys() {
            let field = format!("workers.overrides.{kind}");
            self.validate_pool(&field, &self.workers.settings_for(*kind))?;
        }

        for kind in TaskKind::ALL {
            let horizon = self.workers.redelivery_horizon(kind, &self.backoff);
            if self.workers.dedup_retention() < horizon {
                return Err(ConfigurationError::invalid_value(
                    "workers.dedup_retention_seconds",
                    self.workers.dedup_retention_seconds.to_string(),
                    format!(
                        "retention must cover the {kind} redelivery horizon of {}s",
                        horizon.as_secs()
                    ),
                ));
            }
        }

        if self.backoff.base_delay_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "backoff.base_delay_ms",
                "0",
                "base delay must be greater than 0",
            ));
        }
        if !(self.backoff.multiplier.is_finite() && self.backoff.multiplier >= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "backoff.multiplier",
                self.backoff.multiplier.to_string(),
                "multiplier must be a finite number >= 1.0",
            ));
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "backoff.max_delay_ms",
                self.backoff.max_delay_ms.to_string(),
                "ceiling must not be below the base delay",
            ));
        }

        if self.callback.intake_url.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "callback.intake_url",
                "callback configuration",
            ));
        }
        if self.callback.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "callback.max_attempts",
                "0",
                "at least one delivery attempt is required",
            ));
        }

        if !(0.0..=1.0).contains(&self.classification.confidence_threshold) {
            return Err(ConfigurationError::invalid_value(
                "classification.confidence_threshold",
                self.classification.confidence_threshold.to_string(),
                "threshold must lie in [0, 1]",
            ));
        }

        let mut names = std::collections::HashSet::new();
        for entry in &self.scheduler.entries {
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigurationError::invalid_schedule(
                    entry.name.clone(),
                    "duplicate schedule name",
                ));
            }
            ScheduleSpec::from_config(entry)?;
        }

        Ok(())
    }

    fn validate_pool(&self, field: &str, settings: &PoolSettings) -> Result<(), ConfigurationError> {
        if settings.concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.concurrency"),
                "0",
                "concurrency must be greater than 0",
            ));
        }
        if settings.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.max_attempts"),
                "0",
                "max_attempts must be greater than 0",
            ));
        }
        if settings.handler_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.handler_timeout_seconds"),
                "0",
                "handler timeout must be greater than 0",
            ));
        }
        if settings.visibility_timeout_seconds <= settings.handler_timeout_seconds {
            return Err(ConfigurationError::invalid_value(
                format!("{field}.visibility_timeout_seconds"),
                settings.visibility_timeout_seconds.to_string(),
                "visibility timeout must exceed the handler timeout",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CourierConfig::default();
        config.validate().unwrap();

        assert_eq!(config.broker.provider, BrokerKind::InMemory);
        assert_eq!(config.backoff.base_delay_ms, 1_000);
        assert_eq!(config.backoff.max_delay_ms, 300_000);
        assert_eq!(config.workers.defaults.max_attempts, 3);
        assert_eq!(config.classification.confidence_threshold, 0.5);
        assert_eq!(config.scheduler.entries.len(), 1);
        assert_eq!(config.scheduler.entries[0].every_seconds, Some(30));
    }

    #[test]
    fn test_overrides_merge_with_defaults() {
        let mut config = CourierConfig::default();
        config.workers.overrides.insert(
            TaskKind::GitJiraExecute,
            PoolOverride {
                concurrency: Some(1),
                max_attempts: Some(5),
                ..PoolOverride::default()
            },
        );

        let settings = config.workers.settings_for(TaskKind::GitJiraExecute);
        assert_eq!(settings.concurrency, 1);
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(
            settings.handler_timeout_seconds,
            config.workers.defaults.handler_timeout_seconds
        );
        assert_eq!(
            config.workers.settings_for(TaskKind::Classify),
            config.workers.defaults
        );
    }

    #[test]
    fn test_validation_rejects_zero_concurrency_override() {
        let mut config = CourierConfig::default();
        config.workers.overrides.insert(
            TaskKind::Classify,
            PoolOverride {
                concurrency: Some(0),
                ..PoolOverride::default()
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers.overrides.classify.concurrency"));
    }

    #[test]
    fn test_validation_rejects_postgres_without_url() {
        let mut config = CourierConfig::default();
        config.broker.provider = BrokerKind::Postgres;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_retention_shorter_than_redelivery() {
        let mut config = CourierConfig::default();
        assert_eq!(
            config.workers.redelivery_horizon(TaskKind::Classify, &config.backoff),
            Duration::from_secs((300 + 300) * 3)
        );

        config.workers.dedup_retention_seconds = 60;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers.dedup_retention_seconds"));
    }

    #[test]
    fn test_validation_rejects_inverted_backoff() {
        let mut config = CourierConfig::default();
        config.backoff.max_delay_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_schedules() {
        let mut config = CourierConfig::default();
        config.scheduler.entries.push(config.scheduler.entries[0].clone());
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidSchedule { .. })
        ));

        let mut config = CourierConfig::default();
        config.scheduler.entries[0].cron = Some("*/5 * * * *".to_string());
        assert!(config.validate().is_err(), "both every_seconds and cron set");

        let mut config = CourierConfig::default();
        config.scheduler.entries[0].every_seconds = None;
        config.scheduler.entries[0].cron = Some("not a cron".to_string());
        assert!(config.validate().is_err());
    }
}
