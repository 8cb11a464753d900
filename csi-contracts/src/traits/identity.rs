// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use csi_types::{PluginCapability, PluginInfo, ProbeResponse};

use crate::CsiError;

#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;

    async fn probe(&self) -> Result<ProbeResponse, CsiError>;
}
