//! Config loading and filesystem locations.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Config;
use crate::error::HubError;

/// Load configuration from the given path, or the default location.
///
/// An explicitly given path must exist; a missing default file means
/// defaults.
pub fn load_config(path: Option<&Path>) -> Result<Config, HubError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(HubError::Config(format!(
                    "config file {} does not exist",
                    p.display()
                )));
            }
            p.to_path_buf()
        }
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| HubError::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| HubError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Directory holding the device registry and macro library.
pub fn data_dir(config: &Config) -> PathBuf {
    config.storage.data_dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("joyhub")
    })
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("joyhub")
}

/// Get the default config file path.
fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
