//! Volume capability and plugin capability types

use serde::{Deserialize, Serialize};

/// How a volume may be accessed across nodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    #[default]
    Unknown,
    SingleNodeWriter,
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
    SingleNodeSingleWriter,
    SingleNodeMultiWriter,
}

impl AccessMode {
    /// Whether the mode allows the volume to be attached to more than one node
    pub fn is_multi_node(self) -> bool {
        matches!(
            self,
            Self::MultiNodeReaderOnly | Self::MultiNodeSingleWriter | Self::MultiNodeMultiWriter
        )
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Self::SingleNodeReaderOnly | Self::MultiNodeReaderOnly)
    }
}

/// Filesystem access details
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountVolume {
    /// Requested filesystem type; empty means "driver default"
    #[serde(default)]
    pub fs_type: String,

    #[serde(default)]
    pub mount_flags: Vec<String>,
}

/// Whether the volume is consumed as a mounted filesystem or a raw block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Mount(MountVolume),
    Block,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCapability {
    #[serde(default)]
    pub access_type: Option<AccessType>,

    #[serde(default)]
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    pub fn mount(fs_type: impl Into<String>, access_mode: AccessMode) -> Self {
        Self {
            access_type: Some(AccessType::Mount(MountVolume {
                fs_type: fs_type.into(),
                mount_flags: Vec::new(),
            })),
            access_mode,
        }
    }

    pub fn block(access_mode: AccessMode) -> Self {
        Self {
            access_type: Some(AccessType::Block),
            access_mode,
        }
    }

    /// Requested filesystem type, if this is a mount capability with a non-empty fs type
    pub fn fs_type(&self) -> Option<&str> {
        match &self.access_type {
            Some(AccessType::Mount(mount)) if !mount.fs_type.is_empty() => {
                Some(mount.fs_type.as_str())
            }
            _ => None,
        }
    }

    pub fn mount_flags(&self) -> &[String] {
        match &self.access_type {
            Some(AccessType::Mount(mount)) => &mount.mount_flags,
            _ => &[],
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.access_type, Some(AccessType::Block))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PluginCapability {
    ControllerService,
    VolumeAccessibilityConstraints,
    OnlineVolumeExpansion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerCapability {
    CreateDeleteVolume,
    PublishUnpublishVolume,
    ListVolumes,
    GetCapacity,
    CreateDeleteSnapshot,
    ListSnapshots,
    CloneVolume,
    PublishReadonly,
    ExpandVolume,
    ListVolumesPublishedNodes,
    VolumeCondition,
    GetVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeCapability {
    StageUnstageVolume,
    GetVolumeStats,
    ExpandVolume,
    VolumeCondition,
}
