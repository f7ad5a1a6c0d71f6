//! User config file source: $XDG_CONFIG_HOME/mediamgr/config.toml

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path to the user config file.
///
/// `XDG_CONFIG_HOME` wins when set; otherwise the platform config directory.
pub fn global_config_path() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(xdg).join("mediamgr").join("config.toml"));
    }
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("mediamgr").join("config.toml"))
}

/// Add a TOML file to the builder if it exists.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    path: Option<&Path>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    match path {
        Some(path) if path.exists() => {
            debug!(config_path = %path.display(), "Loading user configuration");
            Ok(builder.add_source(File::from(path).format(FileFormat::Toml).required(false)))
        }
        Some(path) => {
            debug!(config_path = %path.display(), "No user configuration file");
            Ok(builder)
        }
        None => Ok(builder),
    }
}
