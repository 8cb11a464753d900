// SPDX-License-Identifier: GPL-3.0-only

//! System-level node operations: mounting, unmounting, mount table lookups
//! and filesystem usage.

pub mod error;
pub mod mount;
pub mod mountinfo;
pub mod usage;

pub use error::{MountError, Result};
pub use mount::{Mounter, SystemMounter, split_mount_options};
pub use mountinfo::{MountEntry, is_mountpoint, parse_mountinfo};
pub use usage::{FilesystemUsage, filesystem_usage};
