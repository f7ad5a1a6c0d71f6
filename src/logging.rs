//! Logging
//!
//! Structured logging through `tracing`. Level, format and destination come
//! from configuration and can be overridden with `MEDIAMGR_LOG` (an
//! `EnvFilter` directive), `MEDIAMGR_LOG_FORMAT` and `MEDIAMGR_LOG_OUTPUT`.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const LOG_ENV: &str = "MEDIAMGR_LOG";
pub const LOG_FORMAT_ENV: &str = "MEDIAMGR_LOG_FORMAT";
pub const LOG_OUTPUT_ENV: &str = "MEDIAMGR_LOG_OUTPUT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Logging(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    Stdout,
    Stderr,
    File,
}

impl FromStr for LogOutput {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(LogOutput::Stdout),
            "stderr" => Ok(LogOutput::Stderr),
            "file" => Ok(LogOutput::File),
            other => Err(ConfigError::Logging(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr' or 'file')",
                other
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_format")]
    pub format: LogFormat,

    /// stderr by default so command output on stdout stays clean
    #[serde(default = "default_output")]
    pub output: LogOutput,

    /// Log file path when output is `file`
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// ANSI colours (text format on a terminal stream only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Per-module levels, e.g. `mediamgr::orchestrator = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> LogFormat {
    LogFormat::Text
}

fn default_output() -> LogOutput {
    LogOutput::Stderr
}

fn default_log_file() -> PathBuf {
    PathBuf::from("mediamgr.log")
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: default_log_file(),
            color: default_true(),
            modules: BTreeMap::new(),
        }
    }
}

/// Initialize the global subscriber
///
/// Priority (highest first): environment variables, configuration, defaults.
/// Fails if a subscriber is already installed.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ConfigError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);

    let filter = build_env_filter(config)?;
    let format = match std::env::var(LOG_FORMAT_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => config.format,
    };
    let output = match std::env::var(LOG_OUTPUT_ENV) {
        Ok(value) => value.parse()?,
        Err(_) => config.output,
    };

    let writer = match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
        LogOutput::File => {
            if let Some(parent) = config.file.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ConfigError::Logging(format!("Failed to create log directory: {}", e))
                    })?;
                }
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.file)
                .map_err(|e| {
                    ConfigError::Logging(format!(
                        "Failed to open log file {:?}: {}",
                        config.file, e
                    ))
                })?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
    };
    let ansi = config.color && output != LogOutput::File;

    let registry = Registry::default().with(filter);
    let result = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };
    result.map_err(|e| ConfigError::Logging(e.to_string()))
}

/// Build the filter from `MEDIAMGR_LOG` or the configured level and modules
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| ConfigError::Logging(format!("Invalid log level '{}': {}", config.level, e)))?;
    for (module, level) in &config.modules {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| ConfigError::Logging(format!("Invalid log directive {}: {}", directive, e)))?,
        );
    }
    Ok(filter)
}
