//! Controller service messages

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capability::VolumeCapability;
use crate::volume::{CapacityRange, Volume, VolumeCondition};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Volume name; also used as the volume id
    pub name: String,

    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,

    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,

    /// Provisioning parameters (e.g. `device_type`)
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateVolumeResponse {
    pub volume: Volume,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteVolumeRequest {
    pub volume_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerPublishVolumeRequest {
    pub volume_id: String,
    pub node_id: String,
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerPublishVolumeResponse {
    #[serde(default)]
    pub publish_context: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerUnpublishVolumeRequest {
    pub volume_id: String,
    #[serde(default)]
    pub node_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateVolumeCapabilitiesRequest {
    pub volume_id: String,
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

/// Capabilities the driver confirms it supports for a volume
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedCapabilities {
    #[serde(default)]
    pub volume_context: BTreeMap<String, String>,
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateVolumeCapabilitiesResponse {
    /// Present only when every requested capability is supported
    #[serde(default)]
    pub confirmed: Option<ConfirmedCapabilities>,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVolumesRequest {
    /// Page size; zero means "all remaining"
    #[serde(default)]
    pub max_entries: u32,

    /// Opaque continuation token from a previous page
    #[serde(default)]
    pub starting_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStatus {
    #[serde(default)]
    pub published_node_ids: Vec<String>,
    #[serde(default)]
    pub volume_condition: Option<VolumeCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVolumesEntry {
    pub volume: Volume,
    #[serde(default)]
    pub status: Option<VolumeStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVolumesResponse {
    pub entries: Vec<ListVolumesEntry>,

    /// Empty when there are no further pages
    #[serde(default)]
    pub next_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCapacityRequest {
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCapacityResponse {
    pub available_capacity: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerGetVolumeRequest {
    pub volume_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerGetVolumeResponse {
    pub volume: Volume,
    #[serde(default)]
    pub status: Option<VolumeStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerExpandVolumeRequest {
    pub volume_id: String,
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerExpandVolumeResponse {
    pub capacity_bytes: u64,
    pub node_expansion_required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: String,
    pub source_volume_id: String,
    pub size_bytes: u64,
    pub ready_to_use: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSnapshotRequest {
    pub source_volume_id: String,
    pub name: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSnapshotResponse {
    pub snapshot: Snapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSnapshotRequest {
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSnapshotsRequest {
    #[serde(default)]
    pub source_volume_id: String,
    #[serde(default)]
    pub snapshot_id: String,
    #[serde(default)]
    pub max_entries: u32,
    #[serde(default)]
    pub starting_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSnapshotsResponse {
    pub entries: Vec<Snapshot>,
    #[serde(default)]
    pub next_token: String,
}
