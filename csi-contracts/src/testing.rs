// SPDX-License-Identifier: GPL-3.0-only

//! In-memory recording backend for unit tests.
//!
//! Keeps a small device graph (disks plus whatever `provision` builds on top
//! of them), records every call in order and lets tests inject failures per
//! operation. Changes apply immediately; `commit` and `reset` are recorded
//! only.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::traits::backend::property_keys;
use crate::{BackendError, DeviceHandle, PropertyValue, ProvisioningBackend, ProvisioningRequest};

const HANDLE_PREFIX: &str = "/com/redhat/Blivet0/Devices";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Resolve(String),
    Initialize(DeviceHandle),
    Provision(ProvisioningRequest),
    Commit,
    Reset,
    Remove(DeviceHandle),
    DeprovisionDisk(DeviceHandle),
    GetProperty(DeviceHandle, String),
    ListDevices,
}

impl BackendCall {
    /// Whether the call stages or applies a change
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Initialize(_)
                | Self::Provision(_)
                | Self::Commit
                | Self::Remove(_)
                | Self::DeprovisionDisk(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Resolve,
    Initialize,
    Provision,
    Commit,
    Reset,
    Remove,
    DeprovisionDisk,
    GetProperty,
    ListDevices,
}

#[derive(Debug, Clone)]
struct FakeDevice {
    name: String,
    path: String,
    is_disk: bool,
    size: u64,
    parents: Vec<DeviceHandle>,
    initialized: bool,
    removed: bool,
    mountpoint: Option<String>,
}

#[derive(Debug, Default)]
struct FakeState {
    devices: BTreeMap<DeviceHandle, FakeDevice>,
    calls: Vec<BackendCall>,
    failures: HashMap<FailPoint, BackendError>,
    next_id: u64,
}

impl FakeState {
    fn next_handle(&mut self) -> DeviceHandle {
        self.next_id += 1;
        DeviceHandle::new(format!("{HANDLE_PREFIX}/{}", self.next_id))
    }

    fn live(&self, handle: &DeviceHandle) -> Result<&FakeDevice, BackendError> {
        self.devices
            .get(handle)
            .filter(|device| !device.removed)
            .ok_or_else(|| BackendError::DeviceNotFound(handle.to_string()))
    }

    fn live_children(&self, handle: &DeviceHandle) -> Vec<DeviceHandle> {
        self.devices
            .iter()
            .filter(|(_, device)| !device.removed && device.parents.contains(handle))
            .map(|(child, _)| child.clone())
            .collect()
    }

    fn check(&self, point: FailPoint) -> Result<(), BackendError> {
        match self.failures.get(&point) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

impl FakeBackend {
    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a raw disk reachable at `path`
    pub fn add_disk(&self, path: &str, size: u64) -> DeviceHandle {
        let mut state = self.state();
        let handle = state.next_handle();
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        state.devices.insert(
            handle.clone(),
            FakeDevice {
                name,
                path: path.to_string(),
                is_disk: true,
                size,
                parents: Vec::new(),
                initialized: false,
                removed: false,
                mountpoint: None,
            },
        );
        handle
    }

    /// Add a non-disk device stacked on `parents`
    pub fn add_device(&self, name: &str, parents: &[DeviceHandle]) -> DeviceHandle {
        let mut state = self.state();
        let handle = state.next_handle();
        state.devices.insert(
            handle.clone(),
            FakeDevice {
                name: name.to_string(),
                path: format!("/dev/mapper/{name}"),
                is_disk: false,
                size: 0,
                parents: parents.to_vec(),
                initialized: false,
                removed: false,
                mountpoint: None,
            },
        );
        handle
    }

    /// Rewire the parents of an existing device
    pub fn set_parents(&self, device: &DeviceHandle, parents: &[DeviceHandle]) {
        if let Some(entry) = self.state().devices.get_mut(device) {
            entry.parents = parents.to_vec();
        }
    }

    pub fn set_mountpoint(&self, device: &DeviceHandle, mountpoint: &str) {
        if let Some(entry) = self.state().devices.get_mut(device) {
            entry.mountpoint = Some(mountpoint.to_string());
        }
    }

    pub fn fail(&self, point: FailPoint, err: BackendError) {
        self.state().failures.insert(point, err);
    }

    pub fn clear_failure(&self, point: FailPoint) {
        self.state().failures.remove(&point);
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<BackendCall> {
        std::mem::take(&mut self.state().calls)
    }

    /// Calls that stage or apply a change, in order
    pub fn mutating_calls(&self) -> Vec<BackendCall> {
        self.calls()
            .into_iter()
            .filter(BackendCall::is_mutating)
            .collect()
    }

    pub fn provision_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, BackendCall::Provision(_)))
            .count()
    }

    pub fn is_removed(&self, device: &DeviceHandle) -> bool {
        self.state()
            .devices
            .get(device)
            .is_none_or(|entry| entry.removed)
    }

    pub fn is_initialized(&self, disk: &DeviceHandle) -> bool {
        self.state()
            .devices
            .get(disk)
            .is_some_and(|entry| entry.initialized)
    }

    /// Handles of every device that has not been removed
    pub fn live_devices(&self) -> Vec<DeviceHandle> {
        self.state()
            .devices
            .iter()
            .filter(|(_, device)| !device.removed)
            .map(|(handle, _)| handle.clone())
            .collect()
    }
}

#[async_trait]
impl ProvisioningBackend for FakeBackend {
    async fn resolve(&self, path: &str) -> Result<DeviceHandle, BackendError> {
        let mut state = self.state();
        state.calls.push(BackendCall::Resolve(path.to_string()));
        state.check(FailPoint::Resolve)?;
        state
            .devices
            .iter()
            .find(|(_, device)| !device.removed && device.path == path)
            .map(|(handle, _)| handle.clone())
            .ok_or_else(|| BackendError::DeviceNotFound(path.to_string()))
    }

    async fn initialize(&self, disk: &DeviceHandle) -> Result<(), BackendError> {
        let mut state = self.state();
        state.calls.push(BackendCall::Initialize(disk.clone()));
        state.check(FailPoint::Initialize)?;
        if !state.live(disk)?.is_disk {
            return Err(BackendError::call("InitializeDisk", format!("{disk} is not a disk")));
        }
        if let Some(entry) = state.devices.get_mut(disk) {
            entry.initialized = true;
        }
        Ok(())
    }

    async fn provision(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<DeviceHandle, BackendError> {
        let mut state = self.state();
        state.calls.push(BackendCall::Provision(request.clone()));
        state.check(FailPoint::Provision)?;
        for disk in &request.disks {
            state.live(disk)?;
        }

        let container = state.next_handle();
        let container_name = format!("{}-{}", request.device_type, request.name);
        state.devices.insert(
            container.clone(),
            FakeDevice {
                path: format!("/dev/{container_name}"),
                name: container_name,
                is_disk: false,
                size: request.size,
                parents: request.disks.clone(),
                initialized: false,
                removed: false,
                mountpoint: None,
            },
        );

        let leaf = state.next_handle();
        state.devices.insert(
            leaf.clone(),
            FakeDevice {
                name: request.name.clone(),
                path: format!("/dev/mapper/{}", request.name),
                is_disk: false,
                size: request.size,
                parents: vec![container],
                initialized: false,
                removed: false,
                mountpoint: None,
            },
        );
        Ok(leaf)
    }

    async fn commit(&self) -> Result<(), BackendError> {
        let mut state = self.state();
        state.calls.push(BackendCall::Commit);
        state.check(FailPoint::Commit)
    }

    async fn reset(&self) -> Result<(), BackendError> {
        let mut state = self.state();
        state.calls.push(BackendCall::Reset);
        state.check(FailPoint::Reset)
    }

    async fn remove(&self, device: &DeviceHandle) -> Result<(), BackendError> {
        let mut state = self.state();
        state.calls.push(BackendCall::Remove(device.clone()));
        state.check(FailPoint::Remove)?;
        state.live(device)?;
        let children = state.live_children(device);
        if !children.is_empty() {
            return Err(BackendError::call(
                "RemoveDevice",
                format!("{device} still has children {children:?}"),
            ));
        }
        if let Some(entry) = state.devices.get_mut(device) {
            entry.removed = true;
        }
        Ok(())
    }

    async fn deprovision_disk(&self, disk: &DeviceHandle) -> Result<(), BackendError> {
        let mut state = self.state();
        state.calls.push(BackendCall::DeprovisionDisk(disk.clone()));
        state.check(FailPoint::DeprovisionDisk)?;
        state.live(disk)?;
        if !state.live_children(disk).is_empty() {
            return Err(BackendError::call(
                "RemoveDevice",
                format!("disk {disk} is still in use"),
            ));
        }
        if let Some(entry) = state.devices.get_mut(disk) {
            entry.initialized = false;
        }
        Ok(())
    }

    async fn get_property(
        &self,
        device: &DeviceHandle,
        key: &str,
    ) -> Result<PropertyValue, BackendError> {
        let mut state = self.state();
        state
            .calls
            .push(BackendCall::GetProperty(device.clone(), key.to_string()));
        state.check(FailPoint::GetProperty)?;
        let entry = state.live(device)?;
        let value = match key {
            property_keys::NAME => PropertyValue::Text(entry.name.clone()),
            property_keys::PATH => PropertyValue::Text(entry.path.clone()),
            property_keys::SIZE => PropertyValue::Unsigned(entry.size),
            property_keys::IS_DISK => PropertyValue::Bool(entry.is_disk),
            property_keys::MOUNTPOINT => {
                PropertyValue::Text(entry.mountpoint.clone().unwrap_or_default())
            }
            property_keys::PARENTS => PropertyValue::List(
                entry
                    .parents
                    .iter()
                    .map(|parent| PropertyValue::ObjectPath(parent.to_string()))
                    .collect(),
            ),
            property_keys::CHILDREN => PropertyValue::List(
                state
                    .live_children(device)
                    .iter()
                    .map(|child| PropertyValue::ObjectPath(child.to_string()))
                    .collect(),
            ),
            other => {
                return Err(BackendError::Property {
                    device: device.to_string(),
                    key: other.to_string(),
                    reason: "no such property".to_string(),
                });
            }
        };
        Ok(value)
    }

    async fn list_devices(&self) -> Result<Vec<DeviceHandle>, BackendError> {
        let mut state = self.state();
        state.calls.push(BackendCall::ListDevices);
        state.check(FailPoint::ListDevices)?;
        Ok(state
            .devices
            .iter()
            .filter(|(_, device)| !device.removed)
            .map(|(handle, _)| handle.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DeviceType;

    #[tokio::test]
    async fn provision_stacks_container_and_leaf_on_disks() {
        let backend = FakeBackend::default();
        let disk = backend.add_disk("/dev/vdb", 1 << 30);

        let leaf = backend
            .provision(&ProvisioningRequest {
                device_type: DeviceType::Lvm,
                disks: vec![disk.clone()],
                size: 1 << 20,
                name: "pvc-1".to_string(),
                fs_type: Some("xfs".to_string()),
                raid_level: None,
                container_raid_level: None,
            })
            .await
            .expect("provision");

        assert_eq!(
            backend.device_path(&leaf).await.expect("path"),
            "/dev/mapper/pvc-1"
        );
        let parents = backend.parents(&leaf).await.expect("parents");
        assert_eq!(parents.len(), 1);
        assert_eq!(
            backend.children(&parents[0]).await.expect("children"),
            vec![leaf.clone()]
        );
        assert_eq!(
            backend.parents(&parents[0]).await.expect("container parents"),
            vec![disk]
        );
    }

    #[tokio::test]
    async fn remove_refuses_devices_with_live_children() {
        let backend = FakeBackend::default();
        let disk = backend.add_disk("/dev/vdb", 1 << 30);
        let vg = backend.add_device("vg0", &[disk]);
        let lv = backend.add_device("lv0", &[vg.clone()]);

        assert!(backend.remove(&vg).await.is_err());
        backend.remove(&lv).await.expect("remove leaf");
        backend.remove(&vg).await.expect("remove emptied parent");
        assert!(backend.is_removed(&vg));
    }

    #[tokio::test]
    async fn injected_failures_are_recorded_and_returned() {
        let backend = FakeBackend::default();
        backend.fail(FailPoint::Commit, BackendError::call("Commit", "boom"));

        let err = backend.commit().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(backend.take_calls(), vec![BackendCall::Commit]);

        backend.clear_failure(FailPoint::Commit);
        backend.commit().await.expect("commit after clearing");
    }
}
