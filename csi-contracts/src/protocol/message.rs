// SPDX-License-Identifier: GPL-3.0-only

//! Wire messages exchanged over the driver socket.
//!
//! Each line on the socket carries one JSON-encoded [`RequestEnvelope`]; the
//! driver answers with one JSON-encoded [`CsiResponse`] line.

use serde::{Deserialize, Serialize};

use csi_types::{
    ControllerCapability, ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
    ControllerGetVolumeRequest, ControllerGetVolumeResponse, ControllerPublishVolumeRequest,
    ControllerPublishVolumeResponse, ControllerUnpublishVolumeRequest, CreateSnapshotRequest,
    CreateSnapshotResponse, CreateVolumeRequest, CreateVolumeResponse, DeleteSnapshotRequest,
    DeleteVolumeRequest, GetCapacityRequest, GetCapacityResponse, ListSnapshotsRequest,
    ListSnapshotsResponse, ListVolumesRequest, ListVolumesResponse, NodeCapability,
    NodeExpandVolumeRequest, NodeExpandVolumeResponse, NodeGetInfoResponse,
    NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, NodePublishVolumeRequest,
    NodeStageVolumeRequest, NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest,
    PluginCapability, PluginInfo, ProbeResponse, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse,
};

use crate::CsiError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Time budget for the whole call, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,

    pub request: CsiRequest,
}

impl RequestEnvelope {
    pub fn new(request: CsiRequest) -> Self {
        Self {
            deadline_ms: None,
            request,
        }
    }

    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum CsiRequest {
    // Identity
    GetPluginInfo,
    GetPluginCapabilities,
    Probe,

    // Controller
    CreateVolume(CreateVolumeRequest),
    DeleteVolume(DeleteVolumeRequest),
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    ControllerUnpublishVolume(ControllerUnpublishVolumeRequest),
    ValidateVolumeCapabilities(ValidateVolumeCapabilitiesRequest),
    ListVolumes(ListVolumesRequest),
    GetCapacity(GetCapacityRequest),
    ControllerGetCapabilities,
    ControllerGetVolume(ControllerGetVolumeRequest),
    ControllerExpandVolume(ControllerExpandVolumeRequest),
    CreateSnapshot(CreateSnapshotRequest),
    DeleteSnapshot(DeleteSnapshotRequest),
    ListSnapshots(ListSnapshotsRequest),

    // Node
    NodeStageVolume(NodeStageVolumeRequest),
    NodeUnstageVolume(NodeUnstageVolumeRequest),
    NodePublishVolume(NodePublishVolumeRequest),
    NodeUnpublishVolume(NodeUnpublishVolumeRequest),
    NodeGetCapabilities,
    NodeGetInfo,
    NodeGetVolumeStats(NodeGetVolumeStatsRequest),
    NodeExpandVolume(NodeExpandVolumeRequest),
}

impl CsiRequest {
    /// RPC name, for logging
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetPluginInfo => "GetPluginInfo",
            Self::GetPluginCapabilities => "GetPluginCapabilities",
            Self::Probe => "Probe",
            Self::CreateVolume(_) => "CreateVolume",
            Self::DeleteVolume(_) => "DeleteVolume",
            Self::ControllerPublishVolume(_) => "ControllerPublishVolume",
            Self::ControllerUnpublishVolume(_) => "ControllerUnpublishVolume",
            Self::ValidateVolumeCapabilities(_) => "ValidateVolumeCapabilities",
            Self::ListVolumes(_) => "ListVolumes",
            Self::GetCapacity(_) => "GetCapacity",
            Self::ControllerGetCapabilities => "ControllerGetCapabilities",
            Self::ControllerGetVolume(_) => "ControllerGetVolume",
            Self::ControllerExpandVolume(_) => "ControllerExpandVolume",
            Self::CreateSnapshot(_) => "CreateSnapshot",
            Self::DeleteSnapshot(_) => "DeleteSnapshot",
            Self::ListSnapshots(_) => "ListSnapshots",
            Self::NodeStageVolume(_) => "NodeStageVolume",
            Self::NodeUnstageVolume(_) => "NodeUnstageVolume",
            Self::NodePublishVolume(_) => "NodePublishVolume",
            Self::NodeUnpublishVolume(_) => "NodeUnpublishVolume",
            Self::NodeGetCapabilities => "NodeGetCapabilities",
            Self::NodeGetInfo => "NodeGetInfo",
            Self::NodeGetVolumeStats(_) => "NodeGetVolumeStats",
            Self::NodeExpandVolume(_) => "NodeExpandVolume",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", content = "body")]
pub enum CsiResponse {
    PluginInfo(PluginInfo),
    PluginCapabilities(Vec<PluginCapability>),
    Probe(ProbeResponse),

    CreateVolume(CreateVolumeResponse),
    DeleteVolume,
    ControllerPublishVolume(ControllerPublishVolumeResponse),
    ControllerUnpublishVolume,
    ValidateVolumeCapabilities(ValidateVolumeCapabilitiesResponse),
    ListVolumes(ListVolumesResponse),
    GetCapacity(GetCapacityResponse),
    ControllerCapabilities(Vec<ControllerCapability>),
    ControllerGetVolume(ControllerGetVolumeResponse),
    ControllerExpandVolume(ControllerExpandVolumeResponse),
    CreateSnapshot(CreateSnapshotResponse),
    DeleteSnapshot,
    ListSnapshots(ListSnapshotsResponse),

    NodeStageVolume,
    NodeUnstageVolume,
    NodePublishVolume,
    NodeUnpublishVolume,
    NodeCapabilities(Vec<NodeCapability>),
    NodeGetInfo(NodeGetInfoResponse),
    NodeGetVolumeStats(NodeGetVolumeStatsResponse),
    NodeExpandVolume(NodeExpandVolumeResponse),

    Error(CsiError),
}

impl CsiResponse {
    pub fn error(&self) -> Option<&CsiError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }
}
