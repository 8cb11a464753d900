// SPDX-License-Identifier: GPL-3.0-only

//! Unix socket transport for the driver services.
//!
//! One JSON document per line: the client writes a
//! [`csi_contracts::RequestEnvelope`], the server answers with a
//! [`csi_contracts::CsiResponse`]. Connections are served concurrently.

mod client;
mod server;

pub use client::CsiClient;
pub use server::{bind, dispatch, handle_envelope, serve, serve_listener};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("message encoding: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("connection closed by peer")]
    Closed,
}
