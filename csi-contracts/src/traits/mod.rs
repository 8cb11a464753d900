// SPDX-License-Identifier: GPL-3.0-only

pub mod backend;
pub mod controller;
pub mod identity;
pub mod node;

pub use backend::{
    DeviceHandle, DeviceType, PropertyValue, ProvisioningBackend, ProvisioningRequest,
    UnknownDeviceType, property_keys,
};
pub use controller::ControllerService;
pub use identity::IdentityService;
pub use node::NodeService;
