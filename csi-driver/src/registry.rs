// SPDX-License-Identifier: GPL-3.0-only

//! In-memory index of the volumes this driver created.
//!
//! Records are kept in insertion order so pagination is deterministic. The
//! whole index sits behind one `RwLock`; readers always see a consistent
//! snapshot.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use csi_contracts::{CsiError, DeviceHandle, DeviceType};
use csi_types::{Topology, Volume};

/// Where a volume is in its lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VolumeState {
    #[default]
    Provisioned,
    ControllerPublished,
    Staged,
    NodePublished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecord {
    pub volume_id: String,
    pub capacity_bytes: u64,
    /// Top-level backend device; fixed until the volume is deleted
    pub device: DeviceHandle,
    pub device_path: String,
    pub device_name: String,
    pub fs_type: String,
    pub device_type: DeviceType,
    pub accessible_node: String,
    pub published_node: Option<String>,
    pub staging_path: Option<String>,
    pub published_path: Option<String>,
    pub state: VolumeState,
}

impl VolumeRecord {
    pub fn volume_context(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("device_path".to_string(), self.device_path.clone()),
            ("device_name".to_string(), self.device_name.clone()),
            ("device_type".to_string(), self.device_type.to_string()),
            ("fs_type".to_string(), self.fs_type.clone()),
        ])
    }

    /// Protocol view of this record
    pub fn to_volume(&self) -> Volume {
        Volume {
            volume_id: self.volume_id.clone(),
            capacity_bytes: self.capacity_bytes,
            volume_context: self.volume_context(),
            accessible_topology: vec![Topology::hostname(self.accessible_node.clone())],
        }
    }
}

/// One page of [`VolumeRegistry::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumePage {
    pub entries: Vec<VolumeRecord>,
    pub next_token: Option<usize>,
}

#[derive(Debug, Default)]
pub struct VolumeRegistry {
    records: RwLock<Vec<VolumeRecord>>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<VolumeRecord>> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<VolumeRecord>> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, record: VolumeRecord) -> Result<(), CsiError> {
        let mut records = self.write();
        if records.iter().any(|r| r.volume_id == record.volume_id) {
            return Err(CsiError::already_exists(format!(
                "volume '{}' is already registered",
                record.volume_id
            )));
        }
        records.push(record);
        Ok(())
    }

    pub fn find(&self, volume_id: &str) -> Option<VolumeRecord> {
        self.read()
            .iter()
            .find(|record| record.volume_id == volume_id)
            .cloned()
    }

    pub fn contains(&self, volume_id: &str) -> bool {
        self.read().iter().any(|record| record.volume_id == volume_id)
    }

    pub fn remove(&self, volume_id: &str) -> Option<VolumeRecord> {
        let mut records = self.write();
        let position = records.iter().position(|r| r.volume_id == volume_id)?;
        Some(records.remove(position))
    }

    /// Mutate a record in place, returning the updated copy.
    pub fn update<F>(&self, volume_id: &str, f: F) -> Option<VolumeRecord>
    where
        F: FnOnce(&mut VolumeRecord),
    {
        let mut records = self.write();
        let record = records.iter_mut().find(|r| r.volume_id == volume_id)?;
        f(record);
        Some(record.clone())
    }

    /// Page through records in insertion order.
    ///
    /// `max_entries == 0` returns everything from `starting_token` on. A
    /// token has to be a non-negative index, checked before it is required to
    /// come with a page size.
    pub fn list(&self, starting_token: &str, max_entries: u32) -> Result<VolumePage, CsiError> {
        let start = if starting_token.is_empty() {
            0
        } else {
            let start = starting_token.parse::<usize>().map_err(|_| {
                CsiError::aborted(format!("invalid starting_token '{starting_token}'"))
            })?;
            if max_entries == 0 {
                return Err(CsiError::invalid_argument(
                    "starting_token requires max_entries",
                ));
            }
            start
        };

        let records = self.read();
        if start > records.len() {
            return Err(CsiError::aborted(format!(
                "starting_token {start} is past the last volume"
            )));
        }

        if max_entries == 0 {
            return Ok(VolumePage {
                entries: records[start..].to_vec(),
                next_token: None,
            });
        }

        let max = max_entries as usize;
        let end = start.saturating_add(max).min(records.len());
        let next_token = (start + max < records.len()).then_some(start + max + 1);

        Ok(VolumePage {
            entries: records[start..end].to_vec(),
            next_token,
        })
    }

    /// Sum of the capacity of every registered volume
    pub fn total_capacity(&self) -> u64 {
        self.read()
            .iter()
            .fold(0u64, |sum, record| sum.saturating_add(record.capacity_bytes))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_record(volume_id: &str, capacity_bytes: u64) -> VolumeRecord {
    VolumeRecord {
        volume_id: volume_id.to_string(),
        capacity_bytes,
        device: DeviceHandle::new(format!("/com/redhat/Blivet0/Devices/{volume_id}")),
        device_path: format!("/dev/mapper/{volume_id}"),
        device_name: volume_id.to_string(),
        fs_type: "xfs".to_string(),
        device_type: DeviceType::Lvm,
        accessible_node: "node-1".to_string(),
        published_node: None,
        staging_path: None,
        published_path: None,
        state: VolumeState::Provisioned,
    }
}
