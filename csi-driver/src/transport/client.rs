// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use csi_contracts::{CsiRequest, CsiResponse, RequestEnvelope};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

use super::TransportError;

/// Line-oriented client for the driver socket
pub struct CsiClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl CsiClient {
    pub async fn connect(socket_path: &Path) -> Result<Self, TransportError> {
        let stream = UnixStream::connect(socket_path).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    /// Send one envelope and wait for its response
    pub async fn call(&mut self, envelope: &RequestEnvelope) -> Result<CsiResponse, TransportError> {
        let mut payload = serde_json::to_vec(envelope)?;
        payload.push(b'\n');
        self.writer.write_all(&payload).await?;

        let line = self
            .lines
            .next_line()
            .await?
            .ok_or(TransportError::Closed)?;
        Ok(serde_json::from_str(&line)?)
    }

    pub async fn request(&mut self, request: CsiRequest) -> Result<CsiResponse, TransportError> {
        self.call(&RequestEnvelope::new(request)).await
    }
}
