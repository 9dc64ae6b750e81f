// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Application configuration (engine, adapter and loader settings).

use procwrap_module_api::ActivationContext;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Render engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames per block handed to `process()`.
    pub block_size: u32,
    /// Output channel count.
    pub channels: u16,
    /// Sleep between blocks so rendering runs at wall-clock speed.
    pub realtime_pacing: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 128,
            channels: 2,
            realtime_pacing: false,
        }
    }
}

impl EngineConfig {
    /// Activation parameters handed to every inner instance.
    pub fn activation(&self) -> ActivationContext {
        ActivationContext {
            sample_rate: self.sample_rate as f32,
            max_block_size: self.block_size,
        }
    }
}

/// Per-adapter behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Also forward the message that triggered loading, ahead of the queue.
    pub forward_load_source: bool,
    /// Queue length at which a warning is logged. 0 disables the warning.
    pub queue_warn_len: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            forward_load_source: false,
            queue_warn_len: 1024,
        }
    }
}

/// Module loader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Reject world-writable module files and directories.
    pub check_permissions: bool,
    /// Directories searched for relative library paths.
    pub search_paths: Vec<PathBuf>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            check_permissions: true,
            search_paths: Vec::new(),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub adapter: AdapterConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

impl AppConfig {
    /// Load config from TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
