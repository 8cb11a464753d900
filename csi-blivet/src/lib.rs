// SPDX-License-Identifier: GPL-3.0-only

//! Blivet storage backend for the CSI driver
//!
//! - `dbus`: proxies for the `com.redhat.Blivet0` daemon
//! - `backend`: [`BlivetBackend`], the D-Bus implementation of
//!   [`csi_contracts::ProvisioningBackend`]
//! - `provision`: device-type specific provisioning sequences and pool setup
//! - `teardown`: ordered removal of a device and the stack beneath it

pub mod backend;
pub mod dbus;
pub mod error;
pub mod provision;
pub mod teardown;

pub use backend::{BlivetBackend, DEFAULT_CALL_TIMEOUT};
pub use error::TeardownError;
pub use provision::{
    DEFAULT_FS_TYPE, ProvisionedVolume, VolumeSpec, initialize_pool, pool_capacity,
    prepare_disks, provision_volume, provisioning_request,
};
pub use teardown::{DeviceGraph, DeviceIndex, TeardownReport, destroy_device};
