// SPDX-License-Identifier: GPL-3.0-only

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{MountError, Result};

const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// One line of `/proc/self/mountinfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub options: String,
    pub fs_type: String,
    pub source: String,
}

pub fn parse_mountinfo(input: &str) -> Result<Vec<MountEntry>> {
    let mut entries = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let invalid = || MountError::InvalidMountInfoLine(line.to_string());

        // Optional fields sit between field 6 and the " - " separator.
        let (left, right) = line.split_once(" - ").ok_or_else(invalid)?;

        let mut left_fields = left.split_whitespace();
        let mount_point = left_fields.nth(4).ok_or_else(invalid)?;
        let options = left_fields.next().ok_or_else(invalid)?;

        let mut right_fields = right.split_whitespace();
        let fs_type = right_fields.next().ok_or_else(invalid)?;
        let source = right_fields.next().unwrap_or("none");

        entries.push(MountEntry {
            mount_point: PathBuf::from(unescape_mount_field(mount_point)),
            options: options.to_string(),
            fs_type: fs_type.to_string(),
            source: unescape_mount_field(source),
        });
    }

    Ok(entries)
}

/// Whether `path` is currently a mount point of this process's namespace
pub fn is_mountpoint(path: &Path) -> Result<bool> {
    let mount_info =
        fs::read_to_string(MOUNTINFO_PATH).map_err(|err| MountError::io(MOUNTINFO_PATH, err))?;
    let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Ok(parse_mountinfo(&mount_info)?
        .iter()
        .any(|entry| entry.mount_point == target))
}

/// Decode the octal escapes (`\040` for space, ...) the kernel uses in mount fields
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 4 <= bytes.len()
            && bytes[index + 1..index + 4].iter().all(|b| (b'0'..=b'7').contains(b))
            && let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8)
        {
            output.push(num);
            index += 4;
            continue;
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}
