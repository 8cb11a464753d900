// SPDX-License-Identifier: GPL-3.0-only

//! Blivet CSI driver
//!
//! One [`Driver`] serves the identity, controller and node services over a
//! unix socket. Volumes are built by the Blivet daemon and tracked in an
//! in-memory [`VolumeRegistry`].

pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod identity;
pub mod node;
pub mod registry;
pub mod transport;
pub mod validation;

#[cfg(test)]
mod testing;

pub use config::DriverConfig;
pub use driver::{Driver, DriverBuilder, PLUGIN_NAME};
pub use error::{ConfigError, DriverError};
pub use registry::{VolumePage, VolumeRecord, VolumeRegistry, VolumeState};
pub use transport::{CsiClient, TransportError, serve};
