// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use nix::mount::{MsFlags, mount, umount};
use tracing::debug;

use crate::error::{MountError, Result};
use crate::mountinfo::is_mountpoint;
use crate::usage::{FilesystemUsage, filesystem_usage};

/// Mount primitives used by the node service
pub trait Mounter: Send + Sync {
    fn is_mounted(&self, target: &Path) -> Result<bool>;

    /// Mount the filesystem on `device` at `target`
    fn mount(&self, device: &Path, target: &Path, fs_type: &str, options: &[String])
    -> Result<()>;

    /// Bind `source` onto `target`, optionally remounting it read-only
    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> Result<()>;

    fn unmount(&self, target: &Path) -> Result<()>;

    fn usage(&self, path: &Path) -> Result<FilesystemUsage>;
}

/// Split CSI mount flags into kernel mount flags and filesystem-specific data
pub fn split_mount_options(options: &[String]) -> (MsFlags, Vec<String>) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();

    for option in options.iter().flat_map(|o| o.split(',')) {
        match option.trim() {
            "" | "rw" | "defaults" => {}
            "ro" => flags |= MsFlags::MS_RDONLY,
            "nosuid" => flags |= MsFlags::MS_NOSUID,
            "nodev" => flags |= MsFlags::MS_NODEV,
            "noexec" => flags |= MsFlags::MS_NOEXEC,
            "noatime" => flags |= MsFlags::MS_NOATIME,
            "nodiratime" => flags |= MsFlags::MS_NODIRATIME,
            "relatime" => flags |= MsFlags::MS_RELATIME,
            "sync" => flags |= MsFlags::MS_SYNCHRONOUS,
            other => data.push(other.to_string()),
        }
    }

    (flags, data)
}

/// [`Mounter`] backed by the mount(2)/umount(2) syscalls
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMounter;

impl Mounter for SystemMounter {
    fn is_mounted(&self, target: &Path) -> Result<bool> {
        is_mountpoint(target)
    }

    fn mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<()> {
        let (flags, data) = split_mount_options(options);
        let data = data.join(",");
        debug!(device = %device.display(), target = %target.display(), fs_type, ?flags, "mount");

        mount(
            Some(device),
            target,
            Some(fs_type),
            flags,
            (!data.is_empty()).then_some(data.as_str()),
        )
        .map_err(|errno| MountError::Mount {
            source_path: device.to_path_buf(),
            target: target.to_path_buf(),
            errno,
        })
    }

    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> Result<()> {
        debug!(source = %source.display(), target = %target.display(), read_only, "bind mount");

        let mount_err = |errno| MountError::Mount {
            source_path: source.to_path_buf(),
            target: target.to_path_buf(),
            errno,
        };

        mount(Some(source), target, None::<&str>, MsFlags::MS_BIND, None::<&str>)
            .map_err(mount_err)?;

        // MS_RDONLY is ignored on the initial bind; it takes a remount.
        if read_only {
            mount(
                None::<&str>,
                target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            )
            .map_err(mount_err)?;
        }

        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        debug!(target = %target.display(), "unmount");
        umount(target).map_err(|errno| MountError::Unmount {
            target: target.to_path_buf(),
            errno,
        })
    }

    fn usage(&self, path: &Path) -> Result<FilesystemUsage> {
        filesystem_usage(path)
    }
}
