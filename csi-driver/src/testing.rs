// SPDX-License-Identifier: GPL-3.0-only

//! Recording mounter and driver fixtures for unit tests.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use csi_contracts::testing::FakeBackend;
use csi_contracts::{
    BackendError, DeviceHandle, PropertyValue, ProvisioningBackend, ProvisioningRequest,
};
use csi_sys::{FilesystemUsage, MountError, Mounter};
use nix::errno::Errno;

use crate::driver::Driver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountCall {
    Mount {
        device: PathBuf,
        target: PathBuf,
        fs_type: String,
        options: Vec<String>,
    },
    Bind {
        source: PathBuf,
        target: PathBuf,
        read_only: bool,
    },
    Unmount(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountFailure {
    Mount,
    Bind,
    Unmount,
    Usage,
}

#[derive(Debug, Default)]
struct MounterState {
    mounted: BTreeSet<PathBuf>,
    calls: Vec<MountCall>,
    failures: HashSet<MountFailure>,
    usage: FilesystemUsage,
}

#[derive(Debug, Clone, Default)]
pub struct FakeMounter {
    state: Arc<Mutex<MounterState>>,
}

impl FakeMounter {
    fn state(&self) -> MutexGuard<'_, MounterState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fail(&self, failure: MountFailure) {
        self.state().failures.insert(failure);
    }

    pub fn set_usage(&self, usage: FilesystemUsage) {
        self.state().usage = usage;
    }

    /// Pretend something is already mounted at `target`
    pub fn mark_mounted(&self, target: &Path) {
        self.state().mounted.insert(target.to_path_buf());
    }

    pub fn calls(&self) -> Vec<MountCall> {
        self.state().calls.clone()
    }

    pub fn is_target_mounted(&self, target: &Path) -> bool {
        self.state().mounted.contains(target)
    }
}

impl Mounter for FakeMounter {
    fn is_mounted(&self, target: &Path) -> csi_sys::Result<bool> {
        Ok(self.state().mounted.contains(target))
    }

    fn mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> csi_sys::Result<()> {
        let mut state = self.state();
        state.calls.push(MountCall::Mount {
            device: device.to_path_buf(),
            target: target.to_path_buf(),
            fs_type: fs_type.to_string(),
            options: options.to_vec(),
        });
        if state.failures.contains(&MountFailure::Mount) {
            return Err(MountError::Mount {
                source_path: device.to_path_buf(),
                target: target.to_path_buf(),
                errno: Errno::EINVAL,
            });
        }
        state.mounted.insert(target.to_path_buf());
        Ok(())
    }

    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool) -> csi_sys::Result<()> {
        let mut state = self.state();
        state.calls.push(MountCall::Bind {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            read_only,
        });
        if state.failures.contains(&MountFailure::Bind) {
            return Err(MountError::Mount {
                source_path: source.to_path_buf(),
                target: target.to_path_buf(),
                errno: Errno::EPERM,
            });
        }
        state.mounted.insert(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> csi_sys::Result<()> {
        let mut state = self.state();
        state.calls.push(MountCall::Unmount(target.to_path_buf()));
        if state.failures.contains(&MountFailure::Unmount) {
            return Err(MountError::Unmount {
                target: target.to_path_buf(),
                errno: Errno::EBUSY,
            });
        }
        state.mounted.remove(target);
        Ok(())
    }

    fn usage(&self, path: &Path) -> csi_sys::Result<FilesystemUsage> {
        let state = self.state();
        if state.failures.contains(&MountFailure::Usage) {
            return Err(MountError::Stat {
                path: path.to_path_buf(),
                errno: Errno::EIO,
            });
        }
        Ok(state.usage)
    }
}

/// Backend whose commits land immediately but answer late
#[derive(Debug, Clone)]
pub struct SlowCommitBackend {
    inner: FakeBackend,
    delay: Duration,
}

impl SlowCommitBackend {
    pub fn new(inner: FakeBackend, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl ProvisioningBackend for SlowCommitBackend {
    async fn resolve(&self, path: &str) -> Result<DeviceHandle, BackendError> {
        self.inner.resolve(path).await
    }

    async fn initialize(&self, disk: &DeviceHandle) -> Result<(), BackendError> {
        self.inner.initialize(disk).await
    }

    async fn provision(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<DeviceHandle, BackendError> {
        self.inner.provision(request).await
    }

    async fn commit(&self) -> Result<(), BackendError> {
        self.inner.commit().await?;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn reset(&self) -> Result<(), BackendError> {
        self.inner.reset().await
    }

    async fn remove(&self, device: &DeviceHandle) -> Result<(), BackendError> {
        self.inner.remove(device).await
    }

    async fn deprovision_disk(&self, disk: &DeviceHandle) -> Result<(), BackendError> {
        self.inner.deprovision_disk(disk).await
    }

    async fn get_property(
        &self,
        device: &DeviceHandle,
        key: &str,
    ) -> Result<PropertyValue, BackendError> {
        self.inner.get_property(device, key).await
    }

    async fn list_devices(&self) -> Result<Vec<DeviceHandle>, BackendError> {
        self.inner.list_devices().await
    }
}

pub const TEST_NODE: &str = "node-1";
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Driver wired to fakes, with two 10 GiB pool disks
pub struct Harness {
    pub driver: Driver,
    pub backend: FakeBackend,
    pub mounter: FakeMounter,
}

impl Harness {
    pub fn new() -> Self {
        let backend = FakeBackend::default();
        backend.add_disk("/dev/vdb", 10 * GIB);
        backend.add_disk("/dev/vdc", 10 * GIB);
        let mounter = FakeMounter::default();

        let driver = Driver::builder(TEST_NODE)
            .backend(Arc::new(backend.clone()))
            .mounter(Arc::new(mounter.clone()))
            .pool_disks(vec!["/dev/vdb".to_string(), "/dev/vdc".to_string()])
            .build();

        Self {
            driver,
            backend,
            mounter,
        }
    }

    /// Like [`Harness::new`], but every commit answers after `delay`
    pub fn slow_commits(delay: Duration) -> Self {
        let h = Self::new();
        let driver = Driver::builder(TEST_NODE)
            .backend(Arc::new(SlowCommitBackend::new(h.backend.clone(), delay)))
            .mounter(Arc::new(h.mounter.clone()))
            .pool_disks(h.driver.pool_disks.clone())
            .build();

        Self { driver, ..h }
    }

    /// Node-only driver without a backend
    pub fn node_only() -> Self {
        let backend = FakeBackend::default();
        let mounter = FakeMounter::default();
        let driver = Driver::builder(TEST_NODE)
            .mounter(Arc::new(mounter.clone()))
            .build();

        Self {
            driver,
            backend,
            mounter,
        }
    }
}
