// SPDX-License-Identifier: GPL-3.0-only

//! Node side of the volume lifecycle: staging, publishing and usage.
//!
//! Volumes created by this driver are looked up in the registry. On a
//! node-only driver the device comes from the publish context instead.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use csi_blivet::DEFAULT_FS_TYPE;
use csi_contracts::{CsiError, NodeService};
use csi_sys::{MountError, Mounter};
use csi_types::{
    NodeCapability, NodeExpandVolumeRequest, NodeExpandVolumeResponse, NodeGetInfoResponse,
    NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, NodePublishVolumeRequest,
    NodeStageVolumeRequest, NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest, Topology,
    UsageUnit, VolumeCondition, VolumeUsage,
};
use tokio::fs::{self, OpenOptions};
use tracing::{debug, info, instrument, warn};

use crate::controller::CONTEXT_DEVICE_PATH;
use crate::driver::Driver;
use crate::registry::VolumeState;
use crate::validation::{require, require_capability};

const CAPABILITIES: [NodeCapability; 2] = [
    NodeCapability::StageUnstageVolume,
    NodeCapability::GetVolumeStats,
];

fn mount_failure(err: MountError) -> CsiError {
    CsiError::internal(err.to_string())
}

fn io_failure(action: &str, path: &Path, err: std::io::Error) -> CsiError {
    CsiError::internal(format!("{action} {}: {err}", path.display()))
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Remove a mount target left behind after unmounting; failures are logged only
async fn remove_target(path: &Path) {
    let result = match fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => fs::remove_dir(path).await,
        _ => fs::remove_file(path).await,
    };
    if let Err(err) = result {
        warn!(path = %path.display(), "could not remove mount target: {err}");
    }
}

impl Driver {
    /// Block device backing a volume on this node.
    ///
    /// Only a node-only driver trusts the publish context; with a backend the
    /// registry is the sole source.
    fn node_device_path(
        &self,
        volume_id: &str,
        publish_context: &BTreeMap<String, String>,
    ) -> Result<String, CsiError> {
        if let Some(record) = self.registry.find(volume_id) {
            return Ok(record.device_path);
        }

        let not_found = || CsiError::not_found(format!("volume '{volume_id}' does not exist"));
        if self.is_controller() {
            return Err(not_found());
        }
        publish_context
            .get(CONTEXT_DEVICE_PATH)
            .filter(|path| !path.is_empty())
            .cloned()
            .ok_or_else(not_found)
    }

    /// Run mount table work on the blocking pool
    async fn with_mounter<T, F>(&self, op: F) -> csi_sys::Result<T>
    where
        F: FnOnce(&dyn Mounter) -> csi_sys::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mounter = Arc::clone(&self.mounter);
        tokio::task::spawn_blocking(move || op(mounter.as_ref()))
            .await
            .map_err(|err| MountError::Worker(err.to_string()))?
    }

    /// Unmount `target` if something is mounted there, logging failures
    async fn release_mount(&self, target: &Path) {
        let path = target.to_path_buf();
        let released = self
            .with_mounter(move |mounter| {
                if !mounter.is_mounted(&path)? {
                    return Ok(false);
                }
                mounter.unmount(&path)?;
                Ok(true)
            })
            .await;

        match released {
            Ok(true) => debug!(target = %target.display(), "unmounted"),
            Ok(false) => debug!(target = %target.display(), "not mounted"),
            Err(err) => warn!(target = %target.display(), "unmount failed: {err}"),
        }
    }

    /// Bind `source` onto `target` unless `target` is already a mountpoint.
    /// Returns whether a new mount was made.
    async fn bind_once(
        &self,
        source: &str,
        target: &Path,
        read_only: bool,
    ) -> Result<bool, CsiError> {
        let source = PathBuf::from(source);
        let target = target.to_path_buf();
        self.with_mounter(move |mounter| {
            if mounter.is_mounted(&target)? {
                return Ok(false);
            }
            mounter.bind_mount(&source, &target, read_only)?;
            Ok(true)
        })
        .await
        .map_err(mount_failure)
    }
}

#[async_trait]
impl NodeService for Driver {
    #[instrument(skip_all, fields(volume = %request.volume_id))]
    async fn node_stage_volume(&self, request: NodeStageVolumeRequest) -> Result<(), CsiError> {
        require("volume_id", &request.volume_id)?;
        require("staging_target_path", &request.staging_target_path)?;
        let capability = require_capability(request.volume_capability.as_ref())?;
        let device_path = self.node_device_path(&request.volume_id, &request.publish_context)?;
        let staging = Path::new(&request.staging_target_path);

        if !capability.is_block() {
            fs::create_dir_all(staging)
                .await
                .map_err(|err| io_failure("create staging directory", staging, err))?;

            let fs_type = self
                .registry
                .find(&request.volume_id)
                .map(|record| record.fs_type)
                .or_else(|| capability.fs_type().map(str::to_string))
                .unwrap_or_else(|| DEFAULT_FS_TYPE.to_string());
            let options = capability.mount_flags().to_vec();
            let device = PathBuf::from(&device_path);
            let target = staging.to_path_buf();

            let mounted = self
                .with_mounter(move |mounter| {
                    if mounter.is_mounted(&target)? {
                        return Ok(false);
                    }
                    mounter.mount(&device, &target, &fs_type, &options)?;
                    Ok(true)
                })
                .await
                .map_err(mount_failure)?;

            if mounted {
                info!(device = %device_path, staging = %staging.display(), "volume staged");
            } else {
                debug!(staging = %staging.display(), "already staged");
            }
        }

        self.registry.update(&request.volume_id, |record| {
            record.staging_path = Some(request.staging_target_path.clone());
            if record.state != VolumeState::NodePublished {
                record.state = VolumeState::Staged;
            }
        });
        Ok(())
    }

    #[instrument(skip_all, fields(volume = %request.volume_id))]
    async fn node_unstage_volume(
        &self,
        request: NodeUnstageVolumeRequest,
    ) -> Result<(), CsiError> {
        require("volume_id", &request.volume_id)?;
        require("staging_target_path", &request.staging_target_path)?;
        let staging = Path::new(&request.staging_target_path);

        if exists(staging).await {
            self.release_mount(staging).await;
            remove_target(staging).await;
            info!(staging = %staging.display(), "volume unstaged");
        }

        self.registry.update(&request.volume_id, |record| {
            record.staging_path = None;
            record.state = if record.published_node.is_some() {
                VolumeState::ControllerPublished
            } else {
                VolumeState::Provisioned
            };
        });
        Ok(())
    }

    #[instrument(skip_all, fields(volume = %request.volume_id))]
    async fn node_publish_volume(
        &self,
        request: NodePublishVolumeRequest,
    ) -> Result<(), CsiError> {
        require("volume_id", &request.volume_id)?;
        require("target_path", &request.target_path)?;
        let capability = require_capability(request.volume_capability.as_ref())?;
        let target = Path::new(&request.target_path);

        let source = if capability.is_block() {
            let device_path =
                self.node_device_path(&request.volume_id, &request.publish_context)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|err| io_failure("create target directory", parent, err))?;
            }
            OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(target)
                .await
                .map_err(|err| io_failure("create block target", target, err))?;
            device_path
        } else {
            require("staging_target_path", &request.staging_target_path)?;
            self.node_device_path(&request.volume_id, &request.publish_context)?;
            fs::create_dir_all(target)
                .await
                .map_err(|err| io_failure("create target directory", target, err))?;
            request.staging_target_path.clone()
        };

        if self.bind_once(&source, target, request.readonly).await? {
            info!(
                source = %source,
                target = %target.display(),
                readonly = request.readonly,
                "volume published"
            );
        } else {
            debug!(target = %target.display(), "already published");
        }

        self.registry.update(&request.volume_id, |record| {
            record.published_path = Some(request.target_path.clone());
            record.state = VolumeState::NodePublished;
        });
        Ok(())
    }

    #[instrument(skip_all, fields(volume = %request.volume_id))]
    async fn node_unpublish_volume(
        &self,
        request: NodeUnpublishVolumeRequest,
    ) -> Result<(), CsiError> {
        require("volume_id", &request.volume_id)?;
        require("target_path", &request.target_path)?;
        let target = Path::new(&request.target_path);

        if exists(target).await {
            self.release_mount(target).await;
            remove_target(target).await;
            info!(target = %target.display(), "volume unpublished");
        }

        self.registry.update(&request.volume_id, |record| {
            record.published_path = None;
            if record.state == VolumeState::NodePublished {
                record.state = VolumeState::Staged;
            }
        });
        Ok(())
    }

    async fn node_get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(CAPABILITIES.to_vec())
    }

    async fn node_get_info(&self) -> Result<NodeGetInfoResponse, CsiError> {
        Ok(NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            max_volumes_per_node: 0,
            accessible_topology: Some(Topology::hostname(self.node_id.clone())),
        })
    }

    async fn node_get_volume_stats(
        &self,
        request: NodeGetVolumeStatsRequest,
    ) -> Result<NodeGetVolumeStatsResponse, CsiError> {
        require("volume_id", &request.volume_id)?;
        require("volume_path", &request.volume_path)?;
        let path = PathBuf::from(&request.volume_path);

        let known = match self.registry.find(&request.volume_id) {
            Some(record) => record.published_path.as_deref() == Some(request.volume_path.as_str()),
            None => {
                let target = path.clone();
                self.with_mounter(move |mounter| mounter.is_mounted(&target))
                    .await
                    .unwrap_or(false)
            }
        };
        if !known {
            return Err(CsiError::not_found(format!(
                "volume '{}' is not published at {}",
                request.volume_id, request.volume_path
            )));
        }

        let target = path.clone();
        match self.with_mounter(move |mounter| mounter.usage(&target)).await {
            Ok(usage) => Ok(NodeGetVolumeStatsResponse {
                usage: vec![
                    VolumeUsage {
                        available: usage.available_bytes,
                        total: usage.total_bytes,
                        used: usage.used_bytes,
                        unit: UsageUnit::Bytes,
                    },
                    VolumeUsage {
                        available: usage.free_inodes,
                        total: usage.total_inodes,
                        used: usage.used_inodes,
                        unit: UsageUnit::Inodes,
                    },
                ],
                volume_condition: Some(VolumeCondition::healthy()),
            }),
            Err(err) => {
                warn!(path = %path.display(), "volume usage unavailable: {err}");
                Ok(NodeGetVolumeStatsResponse {
                    usage: Vec::new(),
                    volume_condition: Some(VolumeCondition::abnormal(err.to_string())),
                })
            }
        }
    }

    async fn node_expand_volume(
        &self,
        request: NodeExpandVolumeRequest,
    ) -> Result<NodeExpandVolumeResponse, CsiError> {
        require("volume_id", &request.volume_id)?;
        Err(CsiError::unimplemented("volume expansion is not supported"))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use csi_contracts::CsiErrorKind;
    use csi_sys::FilesystemUsage;
    use csi_types::{AccessMode, VolumeCapability};

    use super::*;
    use crate::registry::test_record;
    use crate::testing::{Harness, MountCall, MountFailure, TEST_NODE};

    struct Paths {
        _dir: tempfile::TempDir,
        staging: PathBuf,
        target: PathBuf,
    }

    fn paths() -> Paths {
        let dir = tempfile::tempdir().expect("tempdir");
        let staging = dir.path().join("staging");
        let target = dir.path().join("pods").join("target");
        Paths {
            _dir: dir,
            staging,
            target,
        }
    }

    fn mount_capability() -> Option<VolumeCapability> {
        Some(VolumeCapability::mount("", AccessMode::SingleNodeWriter))
    }

    fn stage_request(volume_id: &str, staging: &Path) -> NodeStageVolumeRequest {
        NodeStageVolumeRequest {
            volume_id: volume_id.to_string(),
            staging_target_path: staging.display().to_string(),
            volume_capability: mount_capability(),
            ..Default::default()
        }
    }

    fn publish_request(
        volume_id: &str,
        staging: &Path,
        target: &Path,
        readonly: bool,
    ) -> NodePublishVolumeRequest {
        NodePublishVolumeRequest {
            volume_id: volume_id.to_string(),
            staging_target_path: staging.display().to_string(),
            target_path: target.display().to_string(),
            volume_capability: mount_capability(),
            readonly,
            ..Default::default()
        }
    }

    fn harness_with_volume() -> Harness {
        let h = Harness::new();
        h.driver
            .registry
            .insert(test_record("pvc-1", 1 << 30))
            .expect("insert");
        h
    }

    #[tokio::test]
    async fn stage_publish_unpublish_unstage() {
        let h = harness_with_volume();
        let p = paths();

        h.driver
            .node_stage_volume(stage_request("pvc-1", &p.staging))
            .await
            .expect("stage");
        assert!(p.staging.is_dir());
        assert_eq!(
            h.mounter.calls(),
            vec![MountCall::Mount {
                device: PathBuf::from("/dev/mapper/pvc-1"),
                target: p.staging.clone(),
                fs_type: "xfs".to_string(),
                options: Vec::new(),
            }]
        );
        assert_eq!(
            h.driver.registry.find("pvc-1").map(|r| r.state),
            Some(VolumeState::Staged)
        );

        h.driver
            .node_publish_volume(publish_request("pvc-1", &p.staging, &p.target, true))
            .await
            .expect("publish");
        assert!(p.target.is_dir());
        assert_eq!(
            h.mounter.calls().last(),
            Some(&MountCall::Bind {
                source: p.staging.clone(),
                target: p.target.clone(),
                read_only: true,
            })
        );
        let record = h.driver.registry.find("pvc-1").expect("record");
        assert_eq!(record.state, VolumeState::NodePublished);
        assert_eq!(record.published_path, Some(p.target.display().to_string()));

        h.driver
            .node_unpublish_volume(NodeUnpublishVolumeRequest {
                volume_id: "pvc-1".to_string(),
                target_path: p.target.display().to_string(),
            })
            .await
            .expect("unpublish");
        assert!(!p.target.exists());
        assert!(!h.mounter.is_target_mounted(&p.target));
        let record = h.driver.registry.find("pvc-1").expect("record");
        assert_eq!(record.published_path, None);
        assert_eq!(record.state, VolumeState::Staged);

        h.driver
            .node_unstage_volume(NodeUnstageVolumeRequest {
                volume_id: "pvc-1".to_string(),
                staging_target_path: p.staging.display().to_string(),
            })
            .await
            .expect("unstage");
        assert!(!p.staging.exists());
        assert_eq!(
            h.driver.registry.find("pvc-1").map(|r| r.state),
            Some(VolumeState::Provisioned)
        );
    }

    #[tokio::test]
    async fn repeated_stage_and_publish_mount_once() {
        let h = harness_with_volume();
        let p = paths();

        for _ in 0..2 {
            h.driver
                .node_stage_volume(stage_request("pvc-1", &p.staging))
                .await
                .expect("stage");
            h.driver
                .node_publish_volume(publish_request("pvc-1", &p.staging, &p.target, false))
                .await
                .expect("publish");
        }

        assert_eq!(h.mounter.calls().len(), 2);
    }

    #[tokio::test]
    async fn stage_failure_is_reported() {
        let h = harness_with_volume();
        let p = paths();
        h.mounter.fail(MountFailure::Mount);

        let err = h
            .driver
            .node_stage_volume(stage_request("pvc-1", &p.staging))
            .await
            .unwrap_err();
        assert_eq!(err.kind, CsiErrorKind::Internal);
        assert_eq!(h.mounter.calls().len(), 1);
        assert_eq!(
            h.driver.registry.find("pvc-1").map(|r| r.state),
            Some(VolumeState::Provisioned)
        );
    }

    #[tokio::test]
    async fn unpublish_tolerates_unmount_failure_and_missing_target() {
        let h = harness_with_volume();
        let p = paths();
        h.driver
            .node_stage_volume(stage_request("pvc-1", &p.staging))
            .await
            .expect("stage");
        h.driver
            .node_publish_volume(publish_request("pvc-1", &p.staging, &p.target, false))
            .await
            .expect("publish");

        h.mounter.fail(MountFailure::Unmount);
        h.driver
            .node_unpublish_volume(NodeUnpublishVolumeRequest {
                volume_id: "pvc-1".to_string(),
                target_path: p.target.display().to_string(),
            })
            .await
            .expect("unmount failure is only logged");
        assert_eq!(
            h.driver.registry.find("pvc-1").and_then(|r| r.published_path),
            None
        );

        h.driver
            .node_unpublish_volume(NodeUnpublishVolumeRequest {
                volume_id: "pvc-1".to_string(),
                target_path: "/nonexistent/csi/target".to_string(),
            })
            .await
            .expect("missing target is fine");
    }

    #[tokio::test]
    async fn publish_requires_staging_for_mount_access() {
        let h = harness_with_volume();
        let p = paths();
        let mut request = publish_request("pvc-1", &p.staging, &p.target, false);
        request.staging_target_path.clear();

        let err = h.driver.node_publish_volume(request).await.unwrap_err();
        assert_eq!(err.kind, CsiErrorKind::InvalidArgument);
        assert!(h.mounter.calls().is_empty());
    }

    #[tokio::test]
    async fn block_volumes_bind_the_device_node() {
        let h = harness_with_volume();
        let p = paths();
        let block = Some(VolumeCapability::block(AccessMode::SingleNodeWriter));

        h.driver
            .node_stage_volume(NodeStageVolumeRequest {
                volume_capability: block.clone(),
                ..stage_request("pvc-1", &p.staging)
            })
            .await
            .expect("stage");
        assert!(h.mounter.calls().is_empty());

        h.driver
            .node_publish_volume(NodePublishVolumeRequest {
                volume_capability: block,
                ..publish_request("pvc-1", &p.staging, &p.target, false)
            })
            .await
            .expect("publish");

        assert!(p.target.is_file());
        assert_eq!(
            h.mounter.calls(),
            vec![MountCall::Bind {
                source: PathBuf::from("/dev/mapper/pvc-1"),
                target: p.target.clone(),
                read_only: false,
            }]
        );
    }

    #[tokio::test]
    async fn node_only_driver_uses_publish_context() {
        let h = Harness::node_only();
        let p = paths();

        let err = h
            .driver
            .node_stage_volume(stage_request("pvc-1", &p.staging))
            .await
            .unwrap_err();
        assert_eq!(err.kind, CsiErrorKind::NotFound);

        let mut request = stage_request("pvc-1", &p.staging);
        request.publish_context.insert(
            CONTEXT_DEVICE_PATH.to_string(),
            "/dev/mapper/pvc-1".to_string(),
        );
        h.driver.node_stage_volume(request).await.expect("stage");

        assert!(matches!(
            h.mounter.calls().first(),
            Some(MountCall::Mount { device, .. }) if device == Path::new("/dev/mapper/pvc-1")
        ));
    }

    #[tokio::test]
    async fn controller_driver_ignores_publish_context_for_unknown_volumes() {
        let h = Harness::new();
        let p = paths();

        let mut stage = stage_request("never-created", &p.staging);
        stage
            .publish_context
            .insert(CONTEXT_DEVICE_PATH.to_string(), "/dev/sda1".to_string());
        let err = h.driver.node_stage_volume(stage).await.unwrap_err();
        assert_eq!(err.kind, CsiErrorKind::NotFound);

        let mut publish = NodePublishVolumeRequest {
            volume_capability: Some(VolumeCapability::block(AccessMode::SingleNodeWriter)),
            ..publish_request("never-created", &p.staging, &p.target, false)
        };
        publish
            .publish_context
            .insert(CONTEXT_DEVICE_PATH.to_string(), "/dev/sda1".to_string());
        let err = h.driver.node_publish_volume(publish).await.unwrap_err();
        assert_eq!(err.kind, CsiErrorKind::NotFound);

        assert!(h.mounter.calls().is_empty());
        assert!(!p.target.exists());
    }

    #[tokio::test]
    async fn stats_report_bytes_and_inodes() {
        let h = harness_with_volume();
        let p = paths();
        h.driver
            .node_stage_volume(stage_request("pvc-1", &p.staging))
            .await
            .expect("stage");
        h.driver
            .node_publish_volume(publish_request("pvc-1", &p.staging, &p.target, false))
            .await
            .expect("publish");
        h.mounter.set_usage(FilesystemUsage {
            total_bytes: 1000,
            used_bytes: 400,
            available_bytes: 600,
            total_inodes: 64,
            used_inodes: 4,
            free_inodes: 60,
        });

        let stats = h
            .driver
            .node_get_volume_stats(NodeGetVolumeStatsRequest {
                volume_id: "pvc-1".to_string(),
                volume_path: p.target.display().to_string(),
                ..Default::default()
            })
            .await
            .expect("stats");
        assert_eq!(
            stats.usage,
            vec![
                VolumeUsage {
                    available: 600,
                    total: 1000,
                    used: 400,
                    unit: UsageUnit::Bytes,
                },
                VolumeUsage {
                    available: 60,
                    total: 64,
                    used: 4,
                    unit: UsageUnit::Inodes,
                },
            ]
        );
        assert_eq!(stats.volume_condition, Some(VolumeCondition::healthy()));

        h.mounter.fail(MountFailure::Usage);
        let stats = h
            .driver
            .node_get_volume_stats(NodeGetVolumeStatsRequest {
                volume_id: "pvc-1".to_string(),
                volume_path: p.target.display().to_string(),
                ..Default::default()
            })
            .await
            .expect("stats");
        assert!(stats.volume_condition.is_some_and(|c| c.abnormal));

        let err = h
            .driver
            .node_get_volume_stats(NodeGetVolumeStatsRequest {
                volume_id: "pvc-1".to_string(),
                volume_path: "/elsewhere".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, CsiErrorKind::NotFound);
    }

    #[tokio::test]
    async fn info_and_capabilities() {
        let h = Harness::node_only();
        let info = h.driver.node_get_info().await.expect("info");
        assert_eq!(info.node_id, TEST_NODE);
        assert_eq!(
            info.accessible_topology.and_then(|t| t.node_id().map(str::to_string)),
            Some(TEST_NODE.to_string())
        );

        let caps = h.driver.node_get_capabilities().await.expect("caps");
        assert_eq!(caps, CAPABILITIES.to_vec());

        let err = h
            .driver
            .node_expand_volume(NodeExpandVolumeRequest {
                volume_id: "pvc-1".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, CsiErrorKind::Unimplemented);
    }
}
