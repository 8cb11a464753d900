// SPDX-License-Identifier: GPL-3.0-only

//! Contract for the storage backend that builds and removes device stacks.
//!
//! Mutating calls (`initialize`, `provision`, `remove`, `deprovision_disk`)
//! are staged by the backend and only take effect on `commit`. A failed
//! `commit` leaves nothing durable behind; callers `reset` before starting
//! the next transaction.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::BackendError;

/// Device property names exposed by the backend
pub mod property_keys {
    pub const NAME: &str = "Name";
    pub const PATH: &str = "Path";
    pub const SIZE: &str = "Size";
    pub const IS_DISK: &str = "IsDisk";
    pub const PARENTS: &str = "Parents";
    pub const CHILDREN: &str = "Children";
    pub const MOUNTPOINT: &str = "Mountpoint";
}

/// Opaque backend reference to a device (a D-Bus object path for Blivet)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceHandle(String);

impl DeviceHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceHandle {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Abstract kind of device stack a volume is built from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Mirrored logical volume
    #[default]
    Lvm,
    /// Software RAID array
    Md,
    /// Mirrored copy-on-write filesystem
    Btrfs,
    /// Pool-managed filesystem
    Stratis,
}

impl DeviceType {
    pub const ALL: [DeviceType; 4] = [Self::Lvm, Self::Md, Self::Btrfs, Self::Stratis];

    /// Numeric device type understood by the Blivet factory
    pub fn factory_code(self) -> i32 {
        match self {
            Self::Lvm => 0,
            Self::Md => 1,
            Self::Btrfs => 3,
            Self::Stratis => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lvm => "lvm",
            Self::Md => "mdraid",
            Self::Btrfs => "btrfs",
            Self::Stratis => "stratis",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown device type '{0}' (expected lvm, mdraid, btrfs or stratis)")]
pub struct UnknownDeviceType(pub String);

impl FromStr for DeviceType {
    type Err = UnknownDeviceType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lvm" => Ok(Self::Lvm),
            "md" | "mdraid" => Ok(Self::Md),
            "btrfs" => Ok(Self::Btrfs),
            "stratis" => Ok(Self::Stratis),
            other => Err(UnknownDeviceType(other.to_string())),
        }
    }
}

/// One factory invocation building a device stack on top of `disks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    pub device_type: DeviceType,
    pub disks: Vec<DeviceHandle>,
    pub size: u64,
    pub name: String,
    pub fs_type: Option<String>,
    pub raid_level: Option<String>,
    pub container_raid_level: Option<String>,
}

/// Decoded device property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Bool(bool),
    Unsigned(u64),
    Signed(i64),
    Text(String),
    ObjectPath(String),
    List(Vec<PropertyValue>),
    Unsupported(String),
}

impl PropertyValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Unsigned(value) => Some(*value),
            Self::Signed(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) | Self::ObjectPath(value) => Some(value),
            _ => None,
        }
    }

    /// Interpret a list of object paths as device handles
    pub fn as_handles(&self) -> Option<Vec<DeviceHandle>> {
        match self {
            Self::List(items) => items
                .iter()
                .map(|item| item.as_str().map(DeviceHandle::new))
                .collect(),
            _ => None,
        }
    }
}

fn unexpected(device: &DeviceHandle, key: &str, value: &PropertyValue) -> BackendError {
    BackendError::Property {
        device: device.to_string(),
        key: key.to_string(),
        reason: format!("unexpected value {value:?}"),
    }
}

#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Look up the device at a block device path. Idempotent.
    async fn resolve(&self, path: &str) -> Result<DeviceHandle, BackendError>;

    /// Prepare a raw disk for use as storage.
    async fn initialize(&self, disk: &DeviceHandle) -> Result<(), BackendError>;

    /// Stage creation of a device stack; returns the top-level device.
    async fn provision(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<DeviceHandle, BackendError>;

    async fn commit(&self) -> Result<(), BackendError>;

    /// Drop every staged, uncommitted change.
    async fn reset(&self) -> Result<(), BackendError>;

    /// Stage removal of a device that has no live children.
    async fn remove(&self, device: &DeviceHandle) -> Result<(), BackendError>;

    /// Release a disk that no longer backs anything.
    async fn deprovision_disk(&self, disk: &DeviceHandle) -> Result<(), BackendError> {
        self.remove(disk).await
    }

    async fn get_property(
        &self,
        device: &DeviceHandle,
        key: &str,
    ) -> Result<PropertyValue, BackendError>;

    async fn list_devices(&self) -> Result<Vec<DeviceHandle>, BackendError>;

    async fn device_path(&self, device: &DeviceHandle) -> Result<String, BackendError> {
        let value = self.get_property(device, property_keys::PATH).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected(device, property_keys::PATH, &value))
    }

    async fn device_name(&self, device: &DeviceHandle) -> Result<String, BackendError> {
        let value = self.get_property(device, property_keys::NAME).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unexpected(device, property_keys::NAME, &value))
    }

    async fn is_disk(&self, device: &DeviceHandle) -> Result<bool, BackendError> {
        let value = self.get_property(device, property_keys::IS_DISK).await?;
        value
            .as_bool()
            .ok_or_else(|| unexpected(device, property_keys::IS_DISK, &value))
    }

    async fn size(&self, device: &DeviceHandle) -> Result<u64, BackendError> {
        let value = self.get_property(device, property_keys::SIZE).await?;
        value
            .as_u64()
            .ok_or_else(|| unexpected(device, property_keys::SIZE, &value))
    }

    async fn parents(&self, device: &DeviceHandle) -> Result<Vec<DeviceHandle>, BackendError> {
        let value = self.get_property(device, property_keys::PARENTS).await?;
        value
            .as_handles()
            .ok_or_else(|| unexpected(device, property_keys::PARENTS, &value))
    }

    async fn children(&self, device: &DeviceHandle) -> Result<Vec<DeviceHandle>, BackendError> {
        let value = self.get_property(device, property_keys::CHILDREN).await?;
        value
            .as_handles()
            .ok_or_else(|| unexpected(device, property_keys::CHILDREN, &value))
    }
}
