// SPDX-License-Identifier: GPL-3.0-only

//! Blivet CSI driver - serves the CSI identity, controller and node services
//! on a unix socket, backed by the Blivet storage daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use csi_blivet::{BlivetBackend, initialize_pool};
use csi_contracts::ProvisioningBackend;
use csi_driver::config::DEFAULT_CONFIG_PATH;
use csi_driver::{Driver, DriverConfig, DriverError, serve};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// CSI driver for Blivet-managed storage
#[derive(Parser, Debug)]
#[command(name = "blivet-csi-driver")]
#[command(about = "CSI driver for Blivet-managed storage", long_about = None)]
struct Cli {
    /// Node identifier; defaults to the host name
    #[arg(long)]
    node_id: Option<String>,

    /// Unix socket to listen on
    #[arg(long)]
    endpoint: Option<PathBuf>,

    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serve identity and node calls only, without touching the storage pool
    #[arg(long)]
    node_only: bool,

    /// Timeout for a single Blivet call, in seconds
    #[arg(long)]
    backend_timeout_secs: Option<u64>,
}

fn resolve_node_id(cli: &Cli, config: &DriverConfig) -> Result<String, DriverError> {
    if let Some(node_id) = cli.node_id.clone().or_else(|| config.driver.node_id.clone()) {
        return Ok(node_id);
    }

    nix::unistd::gethostname()
        .map_err(|errno| DriverError::NodeId(errno.to_string()))?
        .into_string()
        .map_err(|raw| DriverError::NodeId(format!("host name {raw:?} is not valid UTF-8")))
}

/// Connect to Blivet and prepare the storage pool for a controller driver
async fn controller_driver(node_id: String, config: &DriverConfig) -> Result<Driver, DriverError> {
    let backend = BlivetBackend::connect(config.call_timeout()).await?;
    let disks = &config.storage.disks;

    let usable = initialize_pool(&backend, disks).await?;
    if usable.is_empty() {
        return Err(DriverError::NoUsableDisks(disks.clone()));
    }

    let mut pool_disks = Vec::with_capacity(usable.len());
    for disk in &usable {
        pool_disks.push(backend.device_path(disk).await?);
    }
    info!(disks = ?pool_disks, "storage pool ready");

    Ok(Driver::builder(node_id)
        .backend(Arc::new(backend))
        .pool_disks(pool_disks)
        .build())
}

async fn shutdown_signal() {
    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            warn!("cannot listen for SIGTERM: {err}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    info!("Received shutdown signal");
}

async fn run(cli: Cli) -> Result<(), DriverError> {
    let mut config = DriverConfig::load(&cli.config)?;
    if let Some(secs) = cli.backend_timeout_secs {
        config.backend.call_timeout_secs = secs;
        config.validate()?;
    }
    let endpoint = cli
        .endpoint
        .clone()
        .unwrap_or_else(|| config.driver.endpoint.clone());
    let node_id = resolve_node_id(&cli, &config)?;

    let driver = if cli.node_only {
        info!(node_id = %node_id, "node-only mode, controller service disabled");
        Driver::builder(node_id).build()
    } else {
        controller_driver(node_id, &config).await?
    };
    info!(?driver, endpoint = %endpoint.display(), "driver ready");

    serve(Arc::new(driver), &endpoint, shutdown_signal()).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("csi_driver=info,csi_blivet=info,warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Starting Blivet CSI driver v{}", env!("CARGO_PKG_VERSION"));

    if unsafe { libc::geteuid() } != 0 {
        error!("Blivet CSI driver must run as root");
        anyhow::bail!("Driver must run with root privileges");
    }

    run(cli).await?;

    info!("Blivet CSI driver shutting down");
    Ok(())
}
