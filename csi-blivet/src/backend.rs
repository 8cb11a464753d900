// SPDX-License-Identifier: GPL-3.0-only

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use csi_contracts::{
    BackendError, DeviceHandle, PropertyValue, ProvisioningBackend, ProvisioningRequest,
};
use tracing::debug;
use zbus::Connection;
use zbus::proxy::CacheProperties;
use zbus::zvariant::{ObjectPath, Value};

use crate::dbus::{BLIVET_INTERFACE, BlivetProxy, DEVICE_INTERFACE, DevicePropertiesProxy};

/// Upper bound for a single Blivet method call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// [`ProvisioningBackend`] talking to the Blivet daemon on the system bus
#[derive(Debug, Clone)]
pub struct BlivetBackend {
    connection: Connection,
    proxy: BlivetProxy<'static>,
    call_timeout: Duration,
}

impl BlivetBackend {
    /// Connect to the system bus and bind the Blivet top-level object
    pub async fn connect(call_timeout: Duration) -> Result<Self, BackendError> {
        let connection = match tokio::time::timeout(call_timeout, Connection::system()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(err)) => return Err(BackendError::Unavailable(err.to_string())),
            Err(_) => {
                return Err(BackendError::Timeout {
                    operation: "connect".to_string(),
                    after: call_timeout,
                });
            }
        };
        Self::with_connection(connection, call_timeout).await
    }

    pub async fn with_connection(
        connection: Connection,
        call_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let proxy = BlivetProxy::new(&connection)
            .await
            .map_err(|err| BackendError::Unavailable(err.to_string()))?;
        debug!(interface = BLIVET_INTERFACE, ?call_timeout, "bound blivet proxy");

        Ok(Self {
            connection,
            proxy,
            call_timeout,
        })
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, BackendError>
    where
        F: Future<Output = zbus::Result<T>>,
    {
        debug!(operation, "blivet call");
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(map_zbus_error(operation, err)),
            Err(_) => Err(BackendError::Timeout {
                operation: operation.to_string(),
                after: self.call_timeout,
            }),
        }
    }
}

fn map_zbus_error(operation: &str, err: zbus::Error) -> BackendError {
    match err {
        zbus::Error::MethodError(name, detail, _) => BackendError::call(
            operation,
            match detail {
                Some(detail) => format!("{name}: {detail}"),
                None => name.to_string(),
            },
        ),
        zbus::Error::InputOutput(err) => BackendError::Unavailable(err.to_string()),
        zbus::Error::Address(reason) | zbus::Error::Handshake(reason) => {
            BackendError::Unavailable(reason)
        }
        other => BackendError::call(operation, other),
    }
}

fn object_path(device: &DeviceHandle) -> Result<ObjectPath<'_>, BackendError> {
    ObjectPath::try_from(device.as_str())
        .map_err(|err| BackendError::call("object path", format!("{device}: {err}")))
}

/// Keyword arguments for `Factory`, one entry per populated request field
pub(crate) fn factory_kwargs(
    request: &ProvisioningRequest,
) -> Result<HashMap<&'static str, Value<'_>>, BackendError> {
    let disks = request
        .disks
        .iter()
        .map(object_path)
        .collect::<Result<Vec<_>, _>>()?;

    let mut kwargs = HashMap::new();
    kwargs.insert("device_type", Value::from(request.device_type.factory_code()));
    kwargs.insert("size", Value::from(request.size));
    kwargs.insert("disks", Value::from(disks));
    kwargs.insert("name", Value::from(request.name.as_str()));
    if let Some(fs_type) = request.fs_type.as_deref() {
        kwargs.insert("fstype", Value::from(fs_type));
    }
    if let Some(raid_level) = request.raid_level.as_deref() {
        kwargs.insert("raid_level", Value::from(raid_level));
    }
    if let Some(raid_level) = request.container_raid_level.as_deref() {
        kwargs.insert("container_raid_level", Value::from(raid_level));
    }
    Ok(kwargs)
}

pub(crate) fn decode_value(value: &Value<'_>) -> PropertyValue {
    match value {
        Value::Bool(b) => PropertyValue::Bool(*b),
        Value::U8(n) => PropertyValue::Unsigned(u64::from(*n)),
        Value::U16(n) => PropertyValue::Unsigned(u64::from(*n)),
        Value::U32(n) => PropertyValue::Unsigned(u64::from(*n)),
        Value::U64(n) => PropertyValue::Unsigned(*n),
        Value::I16(n) => PropertyValue::Signed(i64::from(*n)),
        Value::I32(n) => PropertyValue::Signed(i64::from(*n)),
        Value::I64(n) => PropertyValue::Signed(*n),
        Value::Str(s) => PropertyValue::Text(s.to_string()),
        Value::ObjectPath(path) => PropertyValue::ObjectPath(path.to_string()),
        Value::Array(items) => PropertyValue::List(items.iter().map(decode_value).collect()),
        Value::Value(inner) => decode_value(inner),
        other => PropertyValue::Unsupported(format!("{other:?}")),
    }
}

#[async_trait]
impl ProvisioningBackend for BlivetBackend {
    async fn resolve(&self, path: &str) -> Result<DeviceHandle, BackendError> {
        let device = self
            .call("ResolveDevice", self.proxy.resolve_device(path))
            .await?;
        Ok(DeviceHandle::new(device.as_str()))
    }

    async fn initialize(&self, disk: &DeviceHandle) -> Result<(), BackendError> {
        let path = object_path(disk)?;
        self.call("InitializeDisk", self.proxy.initialize_disk(&path))
            .await
    }

    async fn provision(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<DeviceHandle, BackendError> {
        let kwargs = factory_kwargs(request)?;
        debug!(
            name = %request.name,
            device_type = %request.device_type,
            size = request.size,
            "factory"
        );
        let device = self.call("Factory", self.proxy.factory(kwargs)).await?;
        Ok(DeviceHandle::new(device.as_str()))
    }

    async fn commit(&self) -> Result<(), BackendError> {
        self.call("Commit", self.proxy.commit()).await
    }

    async fn reset(&self) -> Result<(), BackendError> {
        self.call("Reset", self.proxy.reset()).await
    }

    async fn remove(&self, device: &DeviceHandle) -> Result<(), BackendError> {
        let path = object_path(device)?;
        self.call("RemoveDevice", self.proxy.remove_device(&path))
            .await
    }

    async fn get_property(
        &self,
        device: &DeviceHandle,
        key: &str,
    ) -> Result<PropertyValue, BackendError> {
        let connection = &self.connection;
        let value = self
            .call("Get", async move {
                let proxy = DevicePropertiesProxy::builder(connection)
                    .path(device.as_str())?
                    .cache_properties(CacheProperties::No)
                    .build()
                    .await?;
                proxy.get(DEVICE_INTERFACE, key).await
            })
            .await
            .map_err(|err| match err {
                BackendError::Call { reason, .. } => BackendError::Property {
                    device: device.to_string(),
                    key: key.to_string(),
                    reason,
                },
                other => other,
            })?;
        Ok(decode_value(&value))
    }

    async fn list_devices(&self) -> Result<Vec<DeviceHandle>, BackendError> {
        let devices = self.call("ListDevices", self.proxy.list_devices()).await?;
        Ok(devices
            .iter()
            .map(|device| DeviceHandle::new(device.as_str()))
            .collect())
    }
}
