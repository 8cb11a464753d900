//! Node service messages

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capability::VolumeCapability;
use crate::volume::{CapacityRange, Topology, VolumeCondition};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    pub volume_id: String,
    pub staging_target_path: String,
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    #[serde(default)]
    pub publish_context: BTreeMap<String, String>,
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUnstageVolumeRequest {
    pub volume_id: String,
    pub staging_target_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    pub volume_id: String,
    #[serde(default)]
    pub staging_target_path: String,
    pub target_path: String,
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub publish_context: BTreeMap<String, String>,
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUnpublishVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGetInfoResponse {
    pub node_id: String,
    /// Zero means "no limit"
    #[serde(default)]
    pub max_volumes_per_node: u64,
    #[serde(default)]
    pub accessible_topology: Option<Topology>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGetVolumeStatsRequest {
    pub volume_id: String,
    pub volume_path: String,
    #[serde(default)]
    pub staging_target_path: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UsageUnit {
    #[default]
    Bytes,
    Inodes,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeUsage {
    pub available: u64,
    pub total: u64,
    pub used: u64,
    pub unit: UsageUnit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGetVolumeStatsResponse {
    pub usage: Vec<VolumeUsage>,
    #[serde(default)]
    pub volume_condition: Option<VolumeCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExpandVolumeRequest {
    pub volume_id: String,
    pub volume_path: String,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExpandVolumeResponse {
    pub capacity_bytes: u64,
}
