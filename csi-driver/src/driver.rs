// SPDX-License-Identifier: GPL-3.0-only

//! The coordinating driver object.
//!
//! [`Driver`] implements the identity, controller and node services. The
//! controller side needs a storage backend; a node-only driver has none and
//! answers controller calls with `Unimplemented`.

use std::future::Future;
use std::sync::Arc;

use csi_contracts::{CsiError, ProvisioningBackend};
use csi_sys::{Mounter, SystemMounter};
use tokio::sync::Mutex;
use tracing::{Instrument, Span};

use crate::registry::{VolumeRecord, VolumeRegistry};

pub const PLUGIN_NAME: &str = "com.redhat.blivet-csi";

/// Size used when a request carries no capacity range
pub const DEFAULT_VOLUME_SIZE: u64 = 10 * 1024 * 1024;

/// Longest device name handed to the backend
pub const MAX_DEVICE_NAME_LEN: usize = 55;

pub struct Driver {
    pub(crate) node_id: String,
    pub(crate) registry: Arc<VolumeRegistry>,
    pub(crate) backend: Option<Arc<dyn ProvisioningBackend>>,
    pub(crate) mounter: Arc<dyn Mounter>,
    pub(crate) pool_disks: Vec<String>,
    /// Serializes backend transactions
    pub(crate) lifecycle: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("node_id", &self.node_id)
            .field("volumes", &self.registry.len())
            .field("controller", &self.backend.is_some())
            .field("pool_disks", &self.pool_disks)
            .finish()
    }
}

impl Driver {
    pub fn builder(node_id: impl Into<String>) -> DriverBuilder {
        DriverBuilder::new(node_id)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn registry(&self) -> &Arc<VolumeRegistry> {
        &self.registry
    }

    pub fn is_controller(&self) -> bool {
        self.backend.is_some()
    }

    pub(crate) fn backend(&self) -> Result<&Arc<dyn ProvisioningBackend>, CsiError> {
        self.backend
            .as_ref()
            .ok_or_else(|| CsiError::unimplemented("controller service is not enabled on this node"))
    }

    /// Run a backend transaction under the lifecycle lock on its own task.
    ///
    /// The task keeps running when the caller is dropped at its deadline, so
    /// a committed backend change and its registry update land together.
    pub(crate) async fn transaction<F, Fut, T>(&self, work: F) -> Result<T, CsiError>
    where
        F: FnOnce(Arc<dyn ProvisioningBackend>, Arc<VolumeRegistry>) -> Fut,
        Fut: Future<Output = Result<T, CsiError>> + Send + 'static,
        T: Send + 'static,
    {
        let work = work(Arc::clone(self.backend()?), Arc::clone(&self.registry));
        let lifecycle = Arc::clone(&self.lifecycle);
        let task = tokio::spawn(
            async move {
                let _guard = lifecycle.lock().await;
                work.await
            }
            .instrument(Span::current()),
        );

        task.await
            .map_err(|err| CsiError::internal(format!("volume transaction failed: {err}")))?
    }

    pub(crate) fn lookup(&self, volume_id: &str) -> Result<VolumeRecord, CsiError> {
        self.registry
            .find(volume_id)
            .ok_or_else(|| CsiError::not_found(format!("volume '{volume_id}' does not exist")))
    }
}

pub struct DriverBuilder {
    node_id: String,
    registry: Option<Arc<VolumeRegistry>>,
    backend: Option<Arc<dyn ProvisioningBackend>>,
    mounter: Option<Arc<dyn Mounter>>,
    pool_disks: Vec<String>,
}

impl DriverBuilder {
    fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            registry: None,
            backend: None,
            mounter: None,
            pool_disks: Vec::new(),
        }
    }

    /// Share an existing registry instead of starting empty
    pub fn registry(mut self, registry: Arc<VolumeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ProvisioningBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn mounter(mut self, mounter: Arc<dyn Mounter>) -> Self {
        self.mounter = Some(mounter);
        self
    }

    /// Disks new volumes are built on unless a request names its own
    pub fn pool_disks(mut self, disks: Vec<String>) -> Self {
        self.pool_disks = disks;
        self
    }

    pub fn build(self) -> Driver {
        Driver {
            node_id: self.node_id,
            registry: self.registry.unwrap_or_default(),
            backend: self.backend,
            mounter: self.mounter.unwrap_or_else(|| Arc::new(SystemMounter)),
            pool_disks: self.pool_disks,
            lifecycle: Arc::new(Mutex::new(())),
        }
    }
}
