// SPDX-License-Identifier: GPL-3.0-only

//! Volume lifecycle: create, delete, publish and inspection of volumes.
//!
//! Mutating calls hold the driver's lifecycle lock for the whole backend
//! transaction. The registry is only changed after the backend committed, and
//! the transaction finishes even when the request is cancelled.

use std::collections::BTreeMap;

use async_trait::async_trait;
use csi_blivet::{VolumeSpec, destroy_device, pool_capacity, provision_volume};
use csi_contracts::{ControllerService, CsiError, DeviceType};
use csi_types::{
    CapacityRange, ConfirmedCapabilities, ControllerCapability, ControllerExpandVolumeRequest,
    ControllerExpandVolumeResponse, ControllerGetVolumeRequest, ControllerGetVolumeResponse,
    ControllerPublishVolumeRequest, ControllerPublishVolumeResponse,
    ControllerUnpublishVolumeRequest, CreateSnapshotRequest, CreateSnapshotResponse,
    CreateVolumeRequest, CreateVolumeResponse, DeleteSnapshotRequest, DeleteVolumeRequest,
    GetCapacityRequest, GetCapacityResponse, ListSnapshotsRequest, ListSnapshotsResponse,
    ListVolumesEntry, ListVolumesRequest, ListVolumesResponse, ValidateVolumeCapabilitiesRequest,
    ValidateVolumeCapabilitiesResponse, VolumeCondition, VolumeStatus, format_bytes,
};
use tracing::{debug, info, instrument};

use crate::driver::{DEFAULT_VOLUME_SIZE, Driver, MAX_DEVICE_NAME_LEN};
use crate::registry::{VolumeRecord, VolumeState};
use crate::validation::{
    require, require_capability, validate_capabilities, validate_capability, validate_node,
};

/// CreateVolume parameter selecting the device stack
pub const PARAM_DEVICE_TYPE: &str = "device_type";
/// CreateVolume parameter listing backing disks, comma-separated
pub const PARAM_DISKS: &str = "disks";

/// Publish context keys handed to the node
pub const CONTEXT_REAL_NAME: &str = "real_name";
pub const CONTEXT_DEVICE_NAME: &str = "device_name";
pub const CONTEXT_DEVICE_PATH: &str = "device_path";

const CAPABILITIES: [ControllerCapability; 5] = [
    ControllerCapability::CreateDeleteVolume,
    ControllerCapability::PublishUnpublishVolume,
    ControllerCapability::ListVolumes,
    ControllerCapability::GetCapacity,
    ControllerCapability::GetVolume,
];

fn requested_size(range: &CapacityRange) -> Result<u64, CsiError> {
    if range.required_bytes > 0 && range.limit_bytes > 0 && range.required_bytes > range.limit_bytes
    {
        return Err(CsiError::invalid_argument(format!(
            "required_bytes {} exceeds limit_bytes {}",
            range.required_bytes, range.limit_bytes
        )));
    }

    Ok(match (range.required_bytes, range.limit_bytes) {
        (0, 0) => DEFAULT_VOLUME_SIZE,
        (0, limit) => limit,
        (required, _) => required,
    })
}

fn device_type_param(parameters: &BTreeMap<String, String>) -> Result<DeviceType, CsiError> {
    match parameters.get(PARAM_DEVICE_TYPE) {
        None => Ok(DeviceType::default()),
        Some(raw) => raw
            .parse()
            .map_err(|err| CsiError::invalid_argument(format!("{err}"))),
    }
}

fn device_name(volume_name: &str) -> String {
    volume_name.chars().take(MAX_DEVICE_NAME_LEN).collect()
}

/// Filesystem the stack actually carries for a device type
fn effective_fs_type(device_type: DeviceType, requested: &str) -> String {
    match device_type {
        DeviceType::Btrfs => "btrfs".to_string(),
        DeviceType::Stratis => "xfs".to_string(),
        DeviceType::Lvm | DeviceType::Md => requested.to_string(),
    }
}

fn volume_status(record: &VolumeRecord) -> VolumeStatus {
    VolumeStatus {
        published_node_ids: record.published_node.iter().cloned().collect(),
        volume_condition: Some(VolumeCondition::healthy()),
    }
}

impl Driver {
    /// Disks for a request: the `disks` parameter, else the storage pool
    fn disk_paths(&self, parameters: &BTreeMap<String, String>) -> Result<Vec<String>, CsiError> {
        let disks: Vec<String> = match parameters.get(PARAM_DISKS) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|disk| !disk.is_empty())
                .map(str::to_string)
                .collect(),
            None => self.pool_disks.clone(),
        };

        if disks.is_empty() {
            return Err(CsiError::invalid_argument(
                "no disks given and no storage pool configured",
            ));
        }
        Ok(disks)
    }
}

#[async_trait]
impl ControllerService for Driver {
    #[instrument(skip_all, fields(volume = %request.name))]
    async fn create_volume(
        &self,
        request: CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse, CsiError> {
        self.backend()?;
        require("name", &request.name)?;
        let fs_type = validate_capabilities(&request.volume_capabilities)?;
        let range = request.capacity_range.unwrap_or_default();
        let size = requested_size(&range)?;
        let device_type = device_type_param(&request.parameters)?;
        let disk_paths = self.disk_paths(&request.parameters)?;

        let volume_id = request.name;
        let accessible_node = self.node_id.clone();
        let spec = VolumeSpec {
            name: device_name(&volume_id),
            device_type,
            disk_paths,
            size,
            fs_type: fs_type.clone(),
        };

        self.transaction(move |backend, registry| async move {
            if let Some(existing) = registry.find(&volume_id) {
                if existing.capacity_bytes == size || range.matches(existing.capacity_bytes) {
                    debug!("volume already exists with matching capacity");
                    return Ok(CreateVolumeResponse {
                        volume: existing.to_volume(),
                    });
                }
                return Err(CsiError::already_exists(format!(
                    "volume '{volume_id}' exists with capacity {}",
                    format_bytes(existing.capacity_bytes)
                )));
            }

            let provisioned = provision_volume(backend.as_ref(), &spec).await?;

            let record = VolumeRecord {
                volume_id,
                capacity_bytes: size,
                device: provisioned.device,
                device_path: provisioned.device_path,
                device_name: provisioned.device_name,
                fs_type: effective_fs_type(device_type, &fs_type),
                device_type,
                accessible_node,
                published_node: None,
                staging_path: None,
                published_path: None,
                state: VolumeState::Provisioned,
            };
            let volume = record.to_volume();
            registry.insert(record)?;

            info!(
                %device_type,
                size = %format_bytes(size),
                "volume created"
            );
            Ok(CreateVolumeResponse { volume })
        })
        .await
    }

    #[instrument(skip_all, fields(volume = %request.volume_id))]
    async fn delete_volume(&self, request: DeleteVolumeRequest) -> Result<(), CsiError> {
        self.backend()?;
        require("volume_id", &request.volume_id)?;

        if !self.registry.contains(&request.volume_id) {
            debug!("volume unknown, nothing to delete");
            return Ok(());
        }

        let volume_id = request.volume_id;
        self.transaction(move |backend, registry| async move {
            // A concurrent delete may have won the lock.
            let Some(record) = registry.find(&volume_id) else {
                return Ok::<_, CsiError>(());
            };

            backend.reset().await?;
            let report = destroy_device(backend.as_ref(), &record.device).await?;
            registry.remove(&volume_id);

            info!(
                removed = report.removed.len(),
                released_disks = report.released_disks.len(),
                "volume deleted"
            );
            Ok(())
        })
        .await
    }

    #[instrument(skip_all, fields(volume = %request.volume_id, node = %request.node_id))]
    async fn controller_publish_volume(
        &self,
        request: ControllerPublishVolumeRequest,
    ) -> Result<ControllerPublishVolumeResponse, CsiError> {
        self.backend()?;
        require("volume_id", &request.volume_id)?;
        validate_node(&request.node_id, &self.node_id)?;
        require_capability(request.volume_capability.as_ref())?;

        let record = self.lookup(&request.volume_id)?;
        self.registry.update(&request.volume_id, |record| {
            record.published_node = Some(request.node_id.clone());
            if record.state == VolumeState::Provisioned {
                record.state = VolumeState::ControllerPublished;
            }
        });

        info!("volume published to node");
        Ok(ControllerPublishVolumeResponse {
            publish_context: BTreeMap::from([
                (CONTEXT_REAL_NAME.to_string(), record.volume_id),
                (CONTEXT_DEVICE_NAME.to_string(), record.device_name),
                (CONTEXT_DEVICE_PATH.to_string(), record.device_path),
            ]),
        })
    }

    #[instrument(skip_all, fields(volume = %request.volume_id))]
    async fn controller_unpublish_volume(
        &self,
        request: ControllerUnpublishVolumeRequest,
    ) -> Result<(), CsiError> {
        self.backend()?;
        require("volume_id", &request.volume_id)?;

        let updated = self.registry.update(&request.volume_id, |record| {
            if request.node_id.is_empty()
                || record.published_node.as_deref() == Some(request.node_id.as_str())
            {
                record.published_node = None;
                if record.state == VolumeState::ControllerPublished {
                    record.state = VolumeState::Provisioned;
                }
            }
        });

        if updated.is_some() {
            info!("volume unpublished");
        }
        Ok(())
    }

    async fn validate_volume_capabilities(
        &self,
        request: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidateVolumeCapabilitiesResponse, CsiError> {
        self.backend()?;
        require("volume_id", &request.volume_id)?;
        validate_capabilities(&request.volume_capabilities)?;
        self.lookup(&request.volume_id)?;

        Ok(ValidateVolumeCapabilitiesResponse {
            confirmed: Some(ConfirmedCapabilities {
                volume_context: request.volume_context,
                volume_capabilities: request.volume_capabilities,
                parameters: request.parameters,
            }),
            message: String::new(),
        })
    }

    async fn list_volumes(
        &self,
        request: ListVolumesRequest,
    ) -> Result<ListVolumesResponse, CsiError> {
        self.backend()?;
        let page = self
            .registry
            .list(&request.starting_token, request.max_entries)?;

        Ok(ListVolumesResponse {
            entries: page
                .entries
                .iter()
                .map(|record| ListVolumesEntry {
                    volume: record.to_volume(),
                    status: Some(volume_status(record)),
                })
                .collect(),
            next_token: page
                .next_token
                .map(|token| token.to_string())
                .unwrap_or_default(),
        })
    }

    async fn get_capacity(
        &self,
        request: GetCapacityRequest,
    ) -> Result<GetCapacityResponse, CsiError> {
        let backend = self.backend()?;

        if request
            .volume_capabilities
            .iter()
            .any(|capability| validate_capability(capability).is_err())
        {
            return Ok(GetCapacityResponse::default());
        }

        let disk_paths = self.disk_paths(&request.parameters)?;
        let pool = pool_capacity(backend.as_ref(), &disk_paths).await?;
        let available_capacity = pool.saturating_sub(self.registry.total_capacity());
        debug!(
            pool = %format_bytes(pool),
            available = %format_bytes(available_capacity),
            "capacity"
        );

        Ok(GetCapacityResponse { available_capacity })
    }

    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        self.backend()?;
        Ok(CAPABILITIES.to_vec())
    }

    async fn controller_get_volume(
        &self,
        request: ControllerGetVolumeRequest,
    ) -> Result<ControllerGetVolumeResponse, CsiError> {
        self.backend()?;
        require("volume_id", &request.volume_id)?;
        let record = self.lookup(&request.volume_id)?;

        Ok(ControllerGetVolumeResponse {
            volume: record.to_volume(),
            status: Some(volume_status(&record)),
        })
    }

    async fn controller_expand_volume(
        &self,
        request: ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse, CsiError> {
        require("volume_id", &request.volume_id)?;
        self.lookup(&request.volume_id)?;
        Err(CsiError::unimplemented("volume expansion is not supported"))
    }

    async fn create_snapshot(
        &self,
        request: CreateSnapshotRequest,
    ) -> Result<CreateSnapshotResponse, CsiError> {
        require("source_volume_id", &request.source_volume_id)?;
        require("name", &request.name)?;
        self.lookup(&request.source_volume_id)?;
        Err(CsiError::unimplemented("snapshots are not supported"))
    }

    async fn delete_snapshot(&self, request: DeleteSnapshotRequest) -> Result<(), CsiError> {
        require("snapshot_id", &request.snapshot_id)?;
        Err(CsiError::unimplemented("snapshots are not supported"))
    }

    async fn list_snapshots(
        &self,
        _request: ListSnapshotsRequest,
    ) -> Result<ListSnapshotsResponse, CsiError> {
        Err(CsiError::unimplemented("snapshots are not supported"))
    }
}
