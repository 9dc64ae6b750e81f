// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration persistence (save/load).

use crate::config::AppConfig;
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Manages configuration file persistence.
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Create a new config manager, initializing the config directory.
    pub fn new() -> Result<Self, ConfigError> {
        let project_dirs =
            ProjectDirs::from("", "", "procwrap").ok_or(ConfigError::NoConfigDir)?;
        Self::with_dir(project_dirs.config_dir())
    }

    /// Use an explicit config directory.
    pub fn with_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config_dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&config_dir)?;
        Ok(Self { config_dir })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the path to the main config file.
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Load the application config, falling back to defaults if absent.
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        load_file(&self.config_path())
    }

    /// Save the application config.
    pub fn save_config(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let content = config.to_toml()?;
        fs::write(self.config_path(), content)?;
        debug!("Saved config to {:?}", self.config_path());
        Ok(())
    }
}

/// Load a config from an arbitrary file. A missing file yields the defaults.
pub fn load_file(path: &Path) -> Result<AppConfig, ConfigError> {
    if path.exists() {
        debug!("Loading config from {:?}", path);
        let content = fs::read_to_string(path)?;
        Ok(AppConfig::from_toml(&content)?)
    } else {
        Ok(AppConfig::default())
    }
}
