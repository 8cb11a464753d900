// SPDX-License-Identifier: GPL-3.0-only

//! D-Bus surface of the Blivet daemon

use std::collections::HashMap;

use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus_macros::proxy;

pub const BLIVET_SERVICE: &str = "com.redhat.Blivet0";
pub const BLIVET_PATH: &str = "/com/redhat/Blivet0/Blivet";
pub const BLIVET_INTERFACE: &str = "com.redhat.Blivet0.Blivet";
pub const DEVICE_INTERFACE: &str = "com.redhat.Blivet0.Device";

#[proxy(
    default_service = "com.redhat.Blivet0",
    default_path = "/com/redhat/Blivet0/Blivet",
    interface = "com.redhat.Blivet0.Blivet"
)]
pub trait Blivet {
    /// Stage a device stack described by factory keyword arguments
    fn factory(&self, kwargs: HashMap<&str, Value<'_>>) -> zbus::Result<OwnedObjectPath>;

    fn initialize_disk(&self, disk: &ObjectPath<'_>) -> zbus::Result<()>;

    fn commit(&self) -> zbus::Result<()>;

    fn reset(&self) -> zbus::Result<()>;

    fn remove_device(&self, device: &ObjectPath<'_>) -> zbus::Result<()>;

    fn resolve_device(&self, spec: &str) -> zbus::Result<OwnedObjectPath>;

    fn list_devices(&self) -> zbus::Result<Vec<OwnedObjectPath>>;
}

/// Property access for Blivet device objects; build with an explicit path.
#[proxy(
    default_service = "com.redhat.Blivet0",
    interface = "org.freedesktop.DBus.Properties"
)]
pub trait DeviceProperties {
    fn get(&self, interface_name: &str, property_name: &str) -> zbus::Result<OwnedValue>;
}
