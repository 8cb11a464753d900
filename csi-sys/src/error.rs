// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Error types for node mount operations
#[derive(Error, Debug)]
pub enum MountError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mount {source_path} on {target} failed: {errno}")]
    Mount {
        source_path: PathBuf,
        target: PathBuf,
        errno: nix::Error,
    },

    #[error("unmount {target} failed: {errno}")]
    Unmount { target: PathBuf, errno: nix::Error },

    #[error("statvfs {path} failed: {errno}")]
    Stat { path: PathBuf, errno: nix::Error },

    #[error("invalid mountinfo line: {0}")]
    InvalidMountInfoLine(String),

    #[error("mount worker failed: {0}")]
    Worker(String),
}

impl MountError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for mount operations
pub type Result<T> = std::result::Result<T, MountError>;
