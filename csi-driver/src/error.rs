// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use csi_contracts::BackendError;
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("invalid config {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Startup and serving failures of the driver process
#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage backend: {0}")]
    Backend(#[from] BackendError),

    #[error("none of the configured storage disks are usable: {0:?}")]
    NoUsableDisks(Vec<String>),

    #[error("cannot determine node id: {0}")]
    NodeId(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
