//! Shared logging configuration and initialization.

use std::env;
use std::net::SocketAddr;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

pub fn logging_config_from_env() -> LoggingConfig {
    logging_config_from_lookup(|key| env::var(key).ok())
}

pub fn logging_config_from_lookup<F>(lookup: F) -> LoggingConfig
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = LoggingConfig::default();

    if let Some(level) = lookup("FREDPIPE_LOG_LEVEL") {
        let trimmed = level.trim();
        if !trimmed.is_empty() {
            config.level = trimmed.to_string();
        }
    }

    if let Some(parsed) = lookup("FREDPIPE_LOG_FORMAT").and_then(|raw| parse_log_format(&raw)) {
        config.format = parsed;
    }

    if let Some(parsed) = lookup("FREDPIPE_LOG_TARGET").and_then(|raw| parse_bool(&raw)) {
        config.include_target = parsed;
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter =
        EnvFilter::try_new(config.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(config.include_target)
        .with_ansi(matches!(config.format, LogFormat::Pretty));

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
    }

    Ok(())
}

pub fn log_app_start(component: &'static str, config: &LoggingConfig) {
    info!(
        component,
        event = "app.start",
        log_level = %config.level,
        log_format = ?config.format,
        include_target = config.include_target
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "forecast_dashboard",
        event = "app.bind",
        bind_addr = %bound_addr,
        route = "/forecast"
    );
}

pub fn log_step_start(step: &str) {
    info!(component = "pipeline", event = "pipeline.step.start", step);
}

pub fn log_step_finish(step: &str, elapsed_ms: u128) {
    info!(
        component = "pipeline",
        event = "pipeline.step.finish",
        step,
        elapsed_ms = elapsed_ms as u64
    );
}

fn parse_log_format(raw: &str) -> Option<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "json" => Some(LogFormat::Json),
        "pretty" => Some(LogFormat::Pretty),
        _ => None,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_env_missing() {
        let cfg = logging_config_from_lookup(lookup_from(&[]));
        assert_eq!(cfg, LoggingConfig::default());
    }

    #[test]
    fn parses_json_and_level_and_target() {
        let cfg = logging_config_from_lookup(lookup_from(&[
            ("FREDPIPE_LOG_LEVEL", "debug"),
            ("FREDPIPE_LOG_FORMAT", "json"),
            ("FREDPIPE_LOG_TARGET", "false"),
        ]));

        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.include_target);
    }

    #[test]
    fn invalid_format_or_target_falls_back_to_defaults() {
        let cfg = logging_config_from_lookup(lookup_from(&[
            ("FREDPIPE_LOG_LEVEL", "trace"),
            ("FREDPIPE_LOG_FORMAT", "yaml"),
            ("FREDPIPE_LOG_TARGET", "maybe"),
        ]));

        assert_eq!(cfg.level, "trace");
        assert_eq!(cfg.format, LogFormat::Pretty);
        assert!(cfg.include_target);
    }
}
