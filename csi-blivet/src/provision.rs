// SPDX-License-Identifier: GPL-3.0-only

//! Provisioning sequences run against a [`ProvisioningBackend`].
//!
//! Every sequence here is one backend transaction: it starts from a clean
//! `reset`, stages its changes and ends with a single `commit`. Failures
//! trigger a `reset` so nothing staged leaks into the next caller's
//! transaction. Callers serialize sequences; the backend has one pending
//! transaction at a time.

use csi_contracts::{
    BackendError, DeviceHandle, DeviceType, ProvisioningBackend, ProvisioningRequest,
};
use tracing::{debug, error, info, warn};

/// Filesystem used when a request does not name one
pub const DEFAULT_FS_TYPE: &str = "xfs";

const MIRROR_RAID_LEVEL: &str = "raid1";

/// What a volume should be built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub name: String,
    pub device_type: DeviceType,
    pub disk_paths: Vec<String>,
    pub size: u64,
    pub fs_type: String,
}

/// Top-level device of a freshly provisioned volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedVolume {
    pub device: DeviceHandle,
    pub device_path: String,
    pub device_name: String,
}

/// Map an abstract device type onto factory arguments.
///
/// LVM and MD take the requested filesystem; btrfs always formats btrfs;
/// Stratis pools carry neither a filesystem nor raid levels.
pub fn provisioning_request(
    device_type: DeviceType,
    disks: Vec<DeviceHandle>,
    size: u64,
    name: &str,
    fs_type: &str,
) -> ProvisioningRequest {
    let mirror = || Some(MIRROR_RAID_LEVEL.to_string());
    let (fs_type, raid_level, container_raid_level) = match device_type {
        DeviceType::Lvm => (Some(fs_type.to_string()), mirror(), None),
        DeviceType::Md => (Some(fs_type.to_string()), mirror(), mirror()),
        DeviceType::Btrfs => (Some("btrfs".to_string()), mirror(), mirror()),
        DeviceType::Stratis => (None, None, None),
    };

    ProvisioningRequest {
        device_type,
        disks,
        size,
        name: name.to_string(),
        fs_type,
        raid_level,
        container_raid_level,
    }
}

/// Resolve disk paths, initializing the ones that carry nothing yet.
pub async fn prepare_disks<B>(
    backend: &B,
    paths: &[String],
) -> Result<Vec<DeviceHandle>, BackendError>
where
    B: ProvisioningBackend + ?Sized,
{
    let mut disks = Vec::with_capacity(paths.len());
    for path in paths {
        let disk = backend.resolve(path).await?;
        if backend.children(&disk).await?.is_empty() {
            debug!(%disk, path = %path, "initializing empty disk");
            backend.initialize(&disk).await?;
        }
        disks.push(disk);
    }
    Ok(disks)
}

/// Build the device stack for one volume and commit it.
pub async fn provision_volume<B>(
    backend: &B,
    spec: &VolumeSpec,
) -> Result<ProvisionedVolume, BackendError>
where
    B: ProvisioningBackend + ?Sized,
{
    let result = async {
        backend.reset().await?;
        let disks = prepare_disks(backend, &spec.disk_paths).await?;
        let request =
            provisioning_request(spec.device_type, disks, spec.size, &spec.name, &spec.fs_type);
        let device = backend.provision(&request).await?;
        backend.commit().await?;

        let device_path = backend.device_path(&device).await?;
        let device_name = backend.device_name(&device).await?;
        Ok::<_, BackendError>(ProvisionedVolume {
            device,
            device_path,
            device_name,
        })
    }
    .await;

    match &result {
        Ok(volume) => info!(
            name = %spec.name,
            device_type = %spec.device_type,
            device_path = %volume.device_path,
            "volume provisioned"
        ),
        Err(err) => {
            error!(
                name = %spec.name,
                device_type = %spec.device_type,
                "provisioning aborted: {err}"
            );
            rollback(backend).await;
        }
    }
    result
}

/// Prepare the configured storage pool at startup.
///
/// Disks that cannot be resolved are skipped; the usable ones are returned
/// after a single commit.
pub async fn initialize_pool<B>(
    backend: &B,
    paths: &[String],
) -> Result<Vec<DeviceHandle>, BackendError>
where
    B: ProvisioningBackend + ?Sized,
{
    backend.reset().await?;

    let mut usable = Vec::new();
    for path in paths {
        let disk = match backend.resolve(path).await {
            Ok(disk) => disk,
            Err(err) => {
                warn!(path = %path, "skipping storage disk: {err}");
                continue;
            }
        };

        let result = async {
            if backend.children(&disk).await?.is_empty() {
                backend.initialize(&disk).await?;
                info!(%disk, path = %path, "initialized storage disk");
            } else {
                debug!(%disk, path = %path, "storage disk already in use, keeping contents");
            }
            Ok::<_, BackendError>(())
        }
        .await;

        match result {
            Ok(()) => usable.push(disk),
            Err(err) if err.is_timeout() => {
                rollback(backend).await;
                return Err(err);
            }
            Err(err) => warn!(path = %path, "skipping storage disk: {err}"),
        }
    }

    if let Err(err) = backend.commit().await {
        rollback(backend).await;
        return Err(err);
    }
    Ok(usable)
}

/// Total size of the pool disks
pub async fn pool_capacity<B>(backend: &B, paths: &[String]) -> Result<u64, BackendError>
where
    B: ProvisioningBackend + ?Sized,
{
    let mut total: u64 = 0;
    for path in paths {
        let disk = backend.resolve(path).await?;
        total = total.saturating_add(backend.size(&disk).await?);
    }
    Ok(total)
}

pub(crate) async fn rollback<B>(backend: &B)
where
    B: ProvisioningBackend + ?Sized,
{
    if let Err(err) = backend.reset().await {
        warn!("backend reset after failure did not succeed: {err}");
    }
}
