// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use nix::sys::statvfs::statvfs;

use crate::error::{MountError, Result};

/// Capacity and inode usage of a mounted filesystem
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilesystemUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub total_inodes: u64,
    pub used_inodes: u64,
    pub free_inodes: u64,
}

pub fn filesystem_usage(path: &Path) -> Result<FilesystemUsage> {
    let stats = statvfs(path).map_err(|errno| MountError::Stat {
        path: path.to_path_buf(),
        errno,
    })?;

    let fragment_size = stats.fragment_size() as u64;
    let total_blocks = stats.blocks() as u64;
    let free_blocks = stats.blocks_free() as u64;
    let available_blocks = stats.blocks_available() as u64;
    let total_inodes = stats.files() as u64;
    let free_inodes = stats.files_free() as u64;

    Ok(FilesystemUsage {
        total_bytes: total_blocks * fragment_size,
        used_bytes: total_blocks.saturating_sub(free_blocks) * fragment_size,
        available_bytes: available_blocks * fragment_size,
        total_inodes,
        used_inodes: total_inodes.saturating_sub(free_inodes),
        free_inodes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_usage_for_existing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let usage = filesystem_usage(dir.path()).expect("statvfs");
        assert!(usage.total_bytes > 0);
        assert!(usage.used_bytes <= usage.total_bytes);
        assert!(usage.used_inodes <= usage.total_inodes);
    }

    #[test]
    fn missing_path_is_a_stat_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = filesystem_usage(&dir.path().join("gone")).unwrap_err();
        assert!(matches!(err, MountError::Stat { .. }));
    }
}
