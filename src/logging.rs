//! # Structured Logging Module
//!
//! Environment-aware structured logging to the console and, optionally, to a
//! daily-rotated JSON file for following envelopes across pools.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};
use crate::messaging::TaskEnvelope;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Initialize structured logging with environment-specific configuration
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_structured_logging(config: &LoggingConfig, environment: &str) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let log_level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(environment).to_string());
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level.clone()));

        let mut layers: Vec<BoxedLayer> = Vec::new();
        match config.format {
            LogFormat::Pretty => layers.push(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_level(true)
                    .with_ansi(true)
                    .boxed(),
            ),
            LogFormat::Json => layers.push(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .json()
                    .boxed(),
            ),
        }

        let mut file_target = None;
        if let Some(log_dir) = &config.log_dir {
            match std::fs::create_dir_all(log_dir) {
                Ok(()) => {
                    let prefix = format!("{}.{}.log", config.file_prefix, environment);
                    let appender = tracing_appender::rolling::daily(log_dir, &prefix);
                    let (writer, guard) = tracing_appender::non_blocking(appender);
                    let _ = FILE_GUARD.set(guard);
                    layers.push(
                        fmt::layer()
                            .with_writer(writer)
                            .with_target(true)
                            .with_thread_ids(true)
                            .with_ansi(false)
                            .json()
                            .boxed(),
                    );
                    file_target = Some(log_dir.join(prefix));
                }
                Err(e) => eprintln!("log directory {} unavailable: {e}", log_dir.display()),
            }
        }

        // Use try_init to avoid panic if global subscriber already set
        if tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            level = %log_level,
            log_file = ?file_target,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for envelope lifecycle operations
pub fn log_envelope_operation(
    event: &str,
    envelope: &TaskEnvelope,
    attempt: u32,
    details: Option<&str>,
) {
    tracing::info!(
        event = %event,
        envelope_id = %envelope.envelope_id(),
        correlation_id = %envelope.correlation_id(),
        task_kind = %envelope.task_kind(),
        queue = %envelope.target_queue(),
        attempt = attempt,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📋 ENVELOPE_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "❌ ERROR"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
        assert_eq!(get_log_level("unknown"), "debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = LoggingConfig {
            log_dir: Some(dir.path().to_path_buf()),
            ..LoggingConfig::default()
        };
        init_structured_logging(&config, "test");
        init_structured_logging(&LoggingConfig::default(), "test");
        assert!(LOGGER_INITIALIZED.get().is_some());
    }
}
