// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use protocol::{
    BackendError, CsiError, CsiErrorKind, CsiRequest, CsiResponse, RequestEnvelope,
};
pub use traits::{
    ControllerService, DeviceHandle, DeviceType, IdentityService, NodeService, PropertyValue,
    ProvisioningBackend, ProvisioningRequest, UnknownDeviceType, property_keys,
};
