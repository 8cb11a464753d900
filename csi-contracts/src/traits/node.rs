// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;

use csi_types::{
    NodeCapability, NodeExpandVolumeRequest, NodeExpandVolumeResponse, NodeGetInfoResponse,
    NodeGetVolumeStatsRequest, NodeGetVolumeStatsResponse, NodePublishVolumeRequest,
    NodeStageVolumeRequest, NodeUnpublishVolumeRequest, NodeUnstageVolumeRequest,
};

use crate::CsiError;

#[async_trait]
pub trait NodeService: Send + Sync {
    async fn node_stage_volume(&self, request: NodeStageVolumeRequest) -> Result<(), CsiError>;

    async fn node_unstage_volume(
        &self,
        request: NodeUnstageVolumeRequest,
    ) -> Result<(), CsiError>;

    async fn node_publish_volume(
        &self,
        request: NodePublishVolumeRequest,
    ) -> Result<(), CsiError>;

    async fn node_unpublish_volume(
        &self,
        request: NodeUnpublishVolumeRequest,
    ) -> Result<(), CsiError>;

    async fn node_get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    async fn node_get_info(&self) -> Result<NodeGetInfoResponse, CsiError>;

    async fn node_get_volume_stats(
        &self,
        request: NodeGetVolumeStatsRequest,
    ) -> Result<NodeGetVolumeStatsResponse, CsiError>;

    async fn node_expand_volume(
        &self,
        request: NodeExpandVolumeRequest,
    ) -> Result<NodeExpandVolumeResponse, CsiError>;
}
