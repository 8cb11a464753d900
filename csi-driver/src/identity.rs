// SPDX-License-Identifier: GPL-3.0-only

use std::collections::BTreeMap;

use async_trait::async_trait;
use csi_contracts::{CsiError, IdentityService};
use csi_types::{PluginCapability, PluginInfo, ProbeResponse};
use tracing::warn;

use crate::driver::{Driver, PLUGIN_NAME};

#[async_trait]
impl IdentityService for Driver {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: PLUGIN_NAME.to_string(),
            vendor_version: env!("CARGO_PKG_VERSION").to_string(),
            manifest: BTreeMap::from([("backend".to_string(), "blivet".to_string())]),
        })
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        let mut capabilities = Vec::with_capacity(2);
        if self.is_controller() {
            capabilities.push(PluginCapability::ControllerService);
        }
        capabilities.push(PluginCapability::VolumeAccessibilityConstraints);
        Ok(capabilities)
    }

    /// Ready once the backend answers; a node-only driver is always ready.
    async fn probe(&self) -> Result<ProbeResponse, CsiError> {
        let Some(backend) = &self.backend else {
            return Ok(ProbeResponse { ready: true });
        };

        match backend.list_devices().await {
            Ok(_) => Ok(ProbeResponse { ready: true }),
            Err(err) => {
                warn!("storage backend not ready: {err}");
                Ok(ProbeResponse { ready: false })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use csi_contracts::BackendError;
    use csi_contracts::testing::{BackendCall, FailPoint};

    use super::*;
    use crate::testing::Harness;

    #[tokio::test]
    async fn plugin_info_names_the_driver() {
        let h = Harness::new();
        let info = h.driver.get_plugin_info().await.expect("info");
        assert_eq!(info.name, "com.redhat.blivet-csi");
        assert_eq!(info.vendor_version, env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn controller_capability_follows_mode() {
        let controller = Harness::new();
        assert_eq!(
            controller.driver.get_plugin_capabilities().await.expect("caps"),
            vec![
                PluginCapability::ControllerService,
                PluginCapability::VolumeAccessibilityConstraints,
            ]
        );

        let node = Harness::node_only();
        assert_eq!(
            node.driver.get_plugin_capabilities().await.expect("caps"),
            vec![PluginCapability::VolumeAccessibilityConstraints]
        );
    }

    #[tokio::test]
    async fn probe_checks_the_backend() {
        let h = Harness::new();
        assert!(h.driver.probe().await.expect("probe").ready);
        assert_eq!(h.backend.calls(), vec![BackendCall::ListDevices]);

        h.backend.fail(
            FailPoint::ListDevices,
            BackendError::Unavailable("no bus".to_string()),
        );
        assert!(!h.driver.probe().await.expect("probe").ready);

        assert!(Harness::node_only().driver.probe().await.expect("probe").ready);
    }
}
