// SPDX-License-Identifier: GPL-3.0-only

//! Request checks that run before any backend or mount call.
//!
//! Every check returns the first violation as `InvalidArgument`.

use csi_blivet::DEFAULT_FS_TYPE;
use csi_contracts::CsiError;
use csi_types::{AccessMode, AccessType, VolumeCapability};

/// Filesystems the driver can format and mount
pub const SUPPORTED_FS_TYPES: [&str; 3] = ["xfs", "btrfs", "ext4"];

pub fn require(field: &str, value: &str) -> Result<(), CsiError> {
    if value.is_empty() {
        return Err(CsiError::invalid_argument(format!("{field} is required")));
    }
    Ok(())
}

/// Check one capability and return the filesystem it asks for.
///
/// Block capabilities and mount capabilities without an fs type resolve to
/// the default filesystem.
pub fn validate_capability(capability: &VolumeCapability) -> Result<String, CsiError> {
    let fs_type = match &capability.access_type {
        None => {
            return Err(CsiError::invalid_argument(
                "volume capability must set an access type",
            ));
        }
        Some(AccessType::Block) => DEFAULT_FS_TYPE,
        Some(AccessType::Mount(mount)) if mount.fs_type.is_empty() => DEFAULT_FS_TYPE,
        Some(AccessType::Mount(mount)) => {
            if !SUPPORTED_FS_TYPES.contains(&mount.fs_type.as_str()) {
                return Err(CsiError::invalid_argument(format!(
                    "unsupported filesystem type '{}' (expected one of {})",
                    mount.fs_type,
                    SUPPORTED_FS_TYPES.join(", ")
                )));
            }
            mount.fs_type.as_str()
        }
    };

    if capability.access_mode != AccessMode::SingleNodeWriter {
        return Err(CsiError::invalid_argument(format!(
            "unsupported access mode {:?}; only SINGLE_NODE_WRITER is supported",
            capability.access_mode
        )));
    }

    Ok(fs_type.to_string())
}

/// Check a capability list; the first entry decides the filesystem.
pub fn validate_capabilities(capabilities: &[VolumeCapability]) -> Result<String, CsiError> {
    let Some(first) = capabilities.first() else {
        return Err(CsiError::invalid_argument(
            "at least one volume capability is required",
        ));
    };

    let fs_type = validate_capability(first)?;
    for capability in &capabilities[1..] {
        validate_capability(capability)?;
    }
    Ok(fs_type)
}

pub fn require_capability(
    capability: Option<&VolumeCapability>,
) -> Result<&VolumeCapability, CsiError> {
    let capability =
        capability.ok_or_else(|| CsiError::invalid_argument("volume_capability is required"))?;
    validate_capability(capability)?;
    Ok(capability)
}

/// Reject requests aimed at a node other than the serving one
pub fn validate_node(requested: &str, serving: &str) -> Result<(), CsiError> {
    require("node_id", requested)?;
    if requested != serving {
        return Err(CsiError::invalid_argument(format!(
            "node '{requested}' does not match serving node '{serving}'"
        )));
    }
    Ok(())
}
