// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Client configuration.
//!
//! Read from `$XDG_CONFIG_HOME/qrpay/config.toml`. The file and every field
//! in it are optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::bluetooth::ble_constants::config as defaults;

const APP_DIR: &str = "qrpay";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wait for the peer's answer, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Scan window before the chooser is shown, in seconds.
    pub discovery_timeout_secs: u64,
    /// Remember the selected device per payment token.
    pub remember_devices: bool,
    /// Prompt on the terminal instead of taking the first match.
    pub interactive_chooser: bool,
    /// BlueZ adapter name, e.g. `hci0`. Default adapter when unset.
    pub adapter: Option<String>,
    /// Where device bindings are stored.
    pub data_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: defaults::DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            discovery_timeout_secs: defaults::DEFAULT_DISCOVERY_TIMEOUT.as_secs(),
            remember_devices: true,
            interactive_chooser: true,
            adapter: None,
            data_dir: None,
        }
    }
}

impl Config {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or the default location when `None`. A missing file
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => return Ok(Self::default()),
        };

        if !path.exists() {
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    /// Data directory, falling back to `$XDG_DATA_HOME/qrpay`.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join(APP_DIR)))
            .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
    }
}
