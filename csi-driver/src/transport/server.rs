// SPDX-License-Identifier: GPL-3.0-only

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use csi_contracts::{
    ControllerService, CsiError, CsiRequest, CsiResponse, IdentityService, NodeService,
    RequestEnvelope,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use super::TransportError;

/// Bind the driver socket, replacing a stale socket file.
pub fn bind(socket_path: &Path) -> Result<UnixListener, TransportError> {
    if socket_path.exists() {
        debug!(path = %socket_path.display(), "removing stale socket");
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(UnixListener::bind(socket_path)?)
}

/// Serve on `socket_path` until `shutdown` resolves.
pub async fn serve<S, F>(
    service: Arc<S>,
    socket_path: &Path,
    shutdown: F,
) -> Result<(), TransportError>
where
    S: IdentityService + ControllerService + NodeService + 'static,
    F: Future<Output = ()>,
{
    let listener = bind(socket_path)?;
    info!(endpoint = %socket_path.display(), "listening");

    serve_listener(service, listener, shutdown).await;

    if let Err(err) = std::fs::remove_file(socket_path) {
        warn!(endpoint = %socket_path.display(), "could not remove socket: {err}");
    }
    Ok(())
}

pub async fn serve_listener<S, F>(service: Arc<S>, listener: UnixListener, shutdown: F)
where
    S: IdentityService + ControllerService + NodeService + 'static,
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let service = Arc::clone(&service);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(service.as_ref(), stream).await {
                            debug!("connection closed: {err}");
                        }
                    });
                }
                Err(err) => warn!("accept failed: {err}"),
            }
        }
    }
}

async fn handle_connection<S>(service: &S, stream: UnixStream) -> Result<(), TransportError>
where
    S: IdentityService + ControllerService + NodeService,
{
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RequestEnvelope>(&line) {
            Ok(envelope) => handle_envelope(service, envelope).await,
            Err(err) => CsiResponse::Error(CsiError::invalid_argument(format!(
                "malformed request: {err}"
            ))),
        };

        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        writer.write_all(&payload).await?;
    }
    Ok(())
}

/// Run one request under its deadline and fold errors into the response.
pub async fn handle_envelope<S>(service: &S, envelope: RequestEnvelope) -> CsiResponse
where
    S: IdentityService + ControllerService + NodeService,
{
    let method = envelope.request.method();
    let started = Instant::now();
    let result = with_deadline(method, envelope.deadline_ms, dispatch(service, envelope.request))
        .await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(response) => {
            debug!(method, elapsed_ms, "request served");
            response
        }
        Err(err) => {
            warn!(method, code = err.code(), elapsed_ms, "{}", err.message);
            CsiResponse::Error(err)
        }
    }
}

async fn with_deadline<F>(
    method: &str,
    deadline_ms: Option<u64>,
    call: F,
) -> Result<CsiResponse, CsiError>
where
    F: Future<Output = Result<CsiResponse, CsiError>>,
{
    let Some(deadline_ms) = deadline_ms else {
        return call.await;
    };

    tokio::time::timeout(Duration::from_millis(deadline_ms), call)
        .await
        .unwrap_or_else(|_| {
            Err(CsiError::deadline_exceeded(format!(
                "{method} did not finish within {deadline_ms} ms"
            )))
        })
}

/// Route a request to the service method that handles it
pub async fn dispatch<S>(service: &S, request: CsiRequest) -> Result<CsiResponse, CsiError>
where
    S: IdentityService + ControllerService + NodeService,
{
    Ok(match request {
        CsiRequest::GetPluginInfo => CsiResponse::PluginInfo(service.get_plugin_info().await?),
        CsiRequest::GetPluginCapabilities => {
            CsiResponse::PluginCapabilities(service.get_plugin_capabilities().await?)
        }
        CsiRequest::Probe => CsiResponse::Probe(service.probe().await?),

        CsiRequest::CreateVolume(req) => CsiResponse::CreateVolume(service.create_volume(req).await?),
        CsiRequest::DeleteVolume(req) => {
            service.delete_volume(req).await?;
            CsiResponse::DeleteVolume
        }
        CsiRequest::ControllerPublishVolume(req) => {
            CsiResponse::ControllerPublishVolume(service.controller_publish_volume(req).await?)
        }
        CsiRequest::ControllerUnpublishVolume(req) => {
            service.controller_unpublish_volume(req).await?;
            CsiResponse::ControllerUnpublishVolume
        }
        CsiRequest::ValidateVolumeCapabilities(req) => CsiResponse::ValidateVolumeCapabilities(
            service.validate_volume_capabilities(req).await?,
        ),
        CsiRequest::ListVolumes(req) => CsiResponse::ListVolumes(service.list_volumes(req).await?),
        CsiRequest::GetCapacity(req) => CsiResponse::GetCapacity(service.get_capacity(req).await?),
        CsiRequest::ControllerGetCapabilities => {
            CsiResponse::ControllerCapabilities(service.controller_get_capabilities().await?)
        }
        CsiRequest::ControllerGetVolume(req) => {
            CsiResponse::ControllerGetVolume(service.controller_get_volume(req).await?)
        }
        CsiRequest::ControllerExpandVolume(req) => {
            CsiResponse::ControllerExpandVolume(service.controller_expand_volume(req).await?)
        }
        CsiRequest::CreateSnapshot(req) => {
            CsiResponse::CreateSnapshot(service.create_snapshot(req).await?)
        }
        CsiRequest::DeleteSnapshot(req) => {
            service.delete_snapshot(req).await?;
            CsiResponse::DeleteSnapshot
        }
        CsiRequest::ListSnapshots(req) => {
            CsiResponse::ListSnapshots(service.list_snapshots(req).await?)
        }

        CsiRequest::NodeStageVolume(req) => {
            service.node_stage_volume(req).await?;
            CsiResponse::NodeStageVolume
        }
        CsiRequest::NodeUnstageVolume(req) => {
            service.node_unstage_volume(req).await?;
            CsiResponse::NodeUnstageVolume
        }
        CsiRequest::NodePublishVolume(req) => {
            service.node_publish_volume(req).await?;
            CsiResponse::NodePublishVolume
        }
        CsiRequest::NodeUnpublishVolume(req) => {
            service.node_unpublish_volume(req).await?;
            CsiResponse::NodeUnpublishVolume
        }
        CsiRequest::NodeGetCapabilities => {
            CsiResponse::NodeCapabilities(service.node_get_capabilities().await?)
        }
        CsiRequest::NodeGetInfo => CsiResponse::NodeGetInfo(service.node_get_info().await?),
        CsiRequest::NodeGetVolumeStats(req) => {
            CsiResponse::NodeGetVolumeStats(service.node_get_volume_stats(req).await?)
        }
        CsiRequest::NodeExpandVolume(req) => {
            CsiResponse::NodeExpandVolume(service.node_expand_volume(req).await?)
        }
    })
}
