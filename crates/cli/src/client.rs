// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin RPC client over a `jobmesh-wire` `Transport`, connecting to a running
//! `jobmeshd` (spec §6.4's `CLUSTER_TRANSPORT`/socket/TCP/websocket config).

use anyhow::{bail, Context, Result};
use jobmesh_wire::{connect, Request, Response, Transport, TransportKind};

/// Connection settings, read from env vars the same way the daemon reads its
/// own `CLUSTER_TRANSPORT` family (spec §6.4).
pub struct ConnectOptions {
    pub kind: TransportKind,
    pub socket_path: String,
    pub tcp_addr: String,
    pub websocket_url: String,
}

impl ConnectOptions {
    pub fn from_env() -> Self {
        let kind = std::env::var("JOBMESH_TRANSPORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default();
        Self {
            kind,
            socket_path: std::env::var("JOBMESH_SOCKET_PATH").unwrap_or_else(|_| "/tmp/jobmeshd.sock".to_string()),
            tcp_addr: std::env::var("JOBMESH_TCP_ADDR").unwrap_or_else(|_| "127.0.0.1:7420".to_string()),
            websocket_url: std::env::var("JOBMESH_WS_URL")
                .unwrap_or_else(|_| "ws://127.0.0.1:7421".to_string()),
        }
    }
}

pub struct DaemonClient {
    transport: Box<dyn Transport>,
}

impl DaemonClient {
    pub async fn connect(opts: &ConnectOptions) -> Result<Self> {
        let transport = connect(opts.kind, &opts.socket_path, &opts.tcp_addr, &opts.websocket_url)
            .await
            .context("connecting to jobmeshd")?;
        Ok(Self { transport })
    }

    pub async fn call(&mut self, request: Request) -> Result<Response> {
        let payload = jobmesh_wire::encode(&request).context("encoding request")?;
        self.transport.send(&payload).await.context("sending request")?;
        let bytes = self.transport.recv().await.context("receiving response")?;
        let response: Response = jobmesh_wire::decode(&bytes).context("decoding response")?;
        if let Response::Error(err) = &response {
            bail!("{err}");
        }
        Ok(response)
    }
}
