//! Layered configuration loading.

use super::sources::{environment, global_file};
use super::AppConfig;
use crate::error::ConfigError;
use config::{Config, File, FileFormat};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where each configuration layer comes from
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Optional user config file; skipped when missing
    pub global: Option<PathBuf>,
    /// Explicit config file; must exist
    pub explicit: Option<PathBuf>,
    /// Environment overrides; `None` reads the process environment
    pub env: Option<HashMap<String, String>>,
}

impl ConfigSources {
    /// Standard discovery: user config file, optional explicit file, process env
    pub fn discover(explicit: Option<&Path>) -> Self {
        Self {
            global: global_file::global_config_path(),
            explicit: explicit.map(Path::to_path_buf),
            env: None,
        }
    }
}

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from the standard sources
    pub fn load(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
        Self::load_with(ConfigSources::discover(explicit))
    }

    /// Load a single file with no other layers (tests, tooling)
    pub fn load_from_file(path: &Path) -> Result<AppConfig, ConfigError> {
        Self::load_with(ConfigSources {
            global: None,
            explicit: Some(path.to_path_buf()),
            env: Some(HashMap::new()),
        })
    }

    pub fn load_with(sources: ConfigSources) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder();
        builder = global_file::add_to_builder(builder, sources.global.as_deref())?;

        if let Some(path) = &sources.explicit {
            if !path.exists() {
                return Err(ConfigError::Load(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            debug!(config_path = %path.display(), "Loading explicit configuration");
            builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
        }

        builder = environment::add_to_builder(builder, sources.env);

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate().map_err(|errors| {
            ConfigError::Invalid(
                errors
                    .iter()
                    .map(|e| format!("  - {}", e))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        })?;
        Ok(config)
    }
}
