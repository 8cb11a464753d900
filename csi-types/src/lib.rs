// SPDX-License-Identifier: GPL-3.0-only

//! Canonical CSI data model for the Blivet CSI driver
//!
//! These types are the wire shapes exchanged over the driver socket and the
//! in-memory shapes passed between the driver services:
//!
//! - **csi-contracts**: Service traits take and return these types
//! - **csi-driver**: Controller/node/identity implementations fill them in
//!
//! ## Layout
//!
//! - `volume` → volumes, capacity ranges, topology
//! - `capability` → access modes, access types, plugin/controller/node capabilities
//! - `identity` / `controller` / `node` → request and response messages per service

pub mod capability;
pub mod controller;
pub mod identity;
pub mod node;
pub mod volume;

pub use capability::{
    AccessMode, AccessType, ControllerCapability, MountVolume, NodeCapability, PluginCapability,
    VolumeCapability,
};
pub use controller::{
    ConfirmedCapabilities, ControllerExpandVolumeRequest, ControllerExpandVolumeResponse,
    ControllerGetVolumeRequest, ControllerGetVolumeResponse, ControllerPublishVolumeRequest,
    ControllerPublishVolumeResponse, ControllerUnpublishVolumeRequest, CreateSnapshotRequest,
    CreateSnapshotResponse, CreateVolumeRequest, CreateVolumeResponse, DeleteSnapshotRequest,
    DeleteVolumeRequest, GetCapacityRequest, GetCapacityResponse, ListSnapshotsRequest,
    ListSnapshotsResponse, ListVolumesEntry, ListVolumesRequest, ListVolumesResponse, Snapshot,
    ValidateVolumeCapabilitiesRequest, ValidateVolumeCapabilitiesResponse, VolumeStatus,
};
pub use identity::{PluginInfo, ProbeResponse};
pub use node::{
    NodeExpandVolumeRequest, NodeExpandVolumeResponse, NodeGetInfoResponse,
    NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, NodePublishVolumeRequest,
    NodeStageVolumeRequest, NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, UsageUnit,
    VolumeUsage,
};
pub use volume::{
    CapacityRange, TOPOLOGY_HOSTNAME_KEY, Topology, Volume, VolumeCondition, format_bytes,
};
