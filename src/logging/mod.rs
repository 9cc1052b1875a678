//! Logging setup
//!
//! Console output plus two daily-rotated files under `logging.directory`:
//! `application.log` (INFO and above) and `error.log` (ERROR only).

pub mod middleware;

use serde_json::Value;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::AppError;

pub use middleware::request_logger;

const MAX_LOG_FILES: usize = 30;
const MASK: &str = "********";
const SENSITIVE_KEYS: &[&str] = &["password", "token", "secret", "key"];

/// Keeps the non-blocking file writers flushing; hold it for the lifetime of `main`.
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

fn rolling_file(directory: &str, prefix: &str) -> Result<RollingFileAppender, AppError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(directory)
        .map_err(|e| AppError::ConfigError(format!("Cannot open log file {}: {}", prefix, e)))
}

/// Installs the global subscriber. `RUST_LOG` wins over `logging.level`.
pub fn init_logging(config: &LoggingConfig) -> Result<LogGuards, AppError> {
    std::fs::create_dir_all(&config.directory)?;

    let (app_writer, app_guard) = tracing_appender::non_blocking(rolling_file(&config.directory, "application")?);
    let (error_writer, error_guard) = tracing_appender::non_blocking(rolling_file(&config.directory, "error")?);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = config
        .console
        .then(|| fmt::layer().with_target(false).with_thread_ids(true));

    let app_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(app_writer)
        .with_filter(LevelFilter::INFO);

    let error_layer = fmt::layer()
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(error_writer)
        .with_filter(LevelFilter::ERROR);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(app_layer)
        .with(error_layer)
        .try_init()
        .map_err(|e| AppError::InternalError(format!("Logging already initialised: {}", e)))?;

    info!("Logging initialized with level: {}", config.level);
    Ok(LogGuards {
        _guards: vec![app_guard, error_guard],
    })
}

fn is_sensitive(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEYS.iter().any(|needle| key.contains(needle))
}

/// Copy of a JSON payload with credential-like values replaced, safe to log.
pub fn mask_sensitive(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let masked = if is_sensitive(key) {
                        Value::String(MASK.to_string())
                    } else {
                        mask_sensitive(value)
                    };
                    (key.clone(), masked)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(mask_sensitive).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mask_sensitive() {
        let payload = json!({
            "username": "ada",
            "password": "hunter22",
            "nested": {"refresh_token": "abc", "API_KEY": "k", "note": "fine"},
            "items": [{"client_secret": "s"}, 3]
        });

        let masked = mask_sensitive(&payload);
        assert_eq!(masked["username"], "ada");
        assert_eq!(masked["password"], MASK);
        assert_eq!(masked["nested"]["refresh_token"], MASK);
        assert_eq!(masked["nested"]["API_KEY"], MASK);
        assert_eq!(masked["nested"]["note"], "fine");
        assert_eq!(masked["items"][0]["client_secret"], MASK);
        assert_eq!(masked["items"][1], 3);
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(mask_sensitive(&json!("password")), json!("password"));
        assert_eq!(mask_sensitive(&json!(null)), json!(null));
    }
}
