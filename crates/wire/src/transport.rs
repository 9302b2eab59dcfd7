// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport polymorphism (spec §9 REDESIGN FLAGS): the entity/router link
//! is modeled as a `Transport` trait so the concrete carrier (socket / HTTP /
//! websocket) is a config choice, not a compile-time one. `auto` prefers a
//! Unix domain socket and falls back to TCP when unavailable.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio_tungstenite::tungstenite::Message;

use crate::framing::{read_message, write_message, ProtocolError};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("unknown transport kind: {0:?}")]
    UnknownKind(String),
}

/// Selects the concrete carrier for entity/router RPC. Configured via
/// `CLUSTER_TRANSPORT` (spec §6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Auto,
    Socket,
    Http,
    WebSocket,
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(TransportKind::Auto),
            "socket" => Ok(TransportKind::Socket),
            "http" => Ok(TransportKind::Http),
            "websocket" => Ok(TransportKind::WebSocket),
            other => Err(TransportError::UnknownKind(other.to_string())),
        }
    }
}

/// A connected, bidirectional message channel carrying length-prefixed JSON
/// frames (socket/HTTP) or websocket binary frames.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError>;
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Length-prefixed framing over any `AsyncRead + AsyncWrite` stream; used by
/// both the `Socket` and `Http` transport kinds (the latter is a plain TCP
/// stream framed the same way rather than text HTTP/1.1, keeping the entity
/// link dependency-free while still being distinguishable from the Unix
/// socket path for deployments that can't share a filesystem).
pub struct FramedStream<S> {
    stream: S,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> Transport for FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        write_message(&mut self.stream, payload).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(read_message(&mut self.stream).await?)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Websocket-framed transport (`tokio-tungstenite`), used when the cluster
/// spans environments where raw TCP/Unix sockets aren't routable (e.g.
/// behind an ingress that only forwards HTTP upgrades).
pub struct WebSocketTransport {
    socket: tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (socket, _response) = tokio_tungstenite::connect_async(url).await?;
        Ok(Self { socket })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.socket.send(Message::Binary(payload.to_vec().into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Binary(bytes))) => return Ok(bytes.to_vec()),
                Some(Ok(Message::Close(_))) | None => return Err(TransportError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(err)) => return Err(err.into()),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.socket.close(None).await?;
        Ok(())
    }
}

/// Connect using `kind`, resolving `Auto` to a Unix socket at `socket_path`
/// and falling back to TCP at `tcp_addr` if the socket can't be reached.
pub async fn connect(
    kind: TransportKind,
    socket_path: &str,
    tcp_addr: &str,
    websocket_url: &str,
) -> Result<Box<dyn Transport>, TransportError> {
    match kind {
        TransportKind::Socket => {
            let stream = UnixStream::connect(socket_path).await?;
            Ok(Box::new(FramedStream::new(stream)))
        }
        TransportKind::Http => {
            let stream = TcpStream::connect(tcp_addr).await?;
            Ok(Box::new(FramedStream::new(stream)))
        }
        TransportKind::WebSocket => Ok(Box::new(WebSocketTransport::connect(websocket_url).await?)),
        TransportKind::Auto => match UnixStream::connect(socket_path).await {
            Ok(stream) => Ok(Box::new(FramedStream::new(stream))),
            Err(_) => {
                let stream = TcpStream::connect(tcp_addr).await?;
                Ok(Box::new(FramedStream::new(stream)))
            }
        },
    }
}
