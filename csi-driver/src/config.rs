// SPDX-License-Identifier: GPL-3.0-only

//! Driver configuration file
//!
//! ```toml
//! [driver]
//! node_id = "node-1"
//! endpoint = "/run/csi/blivet.sock"
//!
//! [backend]
//! call_timeout_secs = 10
//!
//! [storage]
//! disks = ["/dev/vdb", "/dev/vdc"]
//! ```
//!
//! Every field is optional. A missing file yields the defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/blivet-csi/config.toml";
pub const DEFAULT_ENDPOINT: &str = "/run/csi/blivet.sock";
pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    pub driver: DriverSection,
    pub backend: BackendSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverSection {
    /// Node identifier; falls back to the host name
    pub node_id: Option<String>,

    /// Unix socket the driver listens on
    pub endpoint: PathBuf,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            node_id: None,
            endpoint: PathBuf::from(DEFAULT_ENDPOINT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSection {
    /// Upper bound for a single Blivet call
    pub call_timeout_secs: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    /// Block devices making up the storage pool
    pub disks: Vec<String>,
}

impl DriverConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            reason: error.to_string(),
        })?;

        let config = Self::from_toml_str(&raw).map_err(|error| match error {
            ConfigError::Parse { reason, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|error| ConfigError::Parse {
            path: PathBuf::new(),
            reason: error.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.call_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "backend.call_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if let Some(disk) = self.storage.disks.iter().find(|disk| !disk.starts_with('/')) {
            return Err(ConfigError::Invalid(format!(
                "storage.disks entries must be absolute device paths, got '{disk}'"
            )));
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.call_timeout_secs)
    }
}
