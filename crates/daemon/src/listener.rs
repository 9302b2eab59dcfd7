// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Accept loop and per-connection RPC dispatch (spec §4.2's entity surface
//! plus §6.5's admin plane), framed the same way `jobmesh-wire`'s client
//! transports expect: a 4-byte length prefix followed by a JSON `Request`.

use jobmesh_cluster::PgAdvisoryLocks;
use jobmesh_core::{Clock, SystemClock};
use jobmesh_router::JobService;
use jobmesh_wire::{read_message, write_message, Request, Response};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tracing::{info, warn};

type Service = Arc<JobService<PgAdvisoryLocks, SystemClock>>;

/// Binds and serves the Unix domain socket at `socket_path`, removing any
/// stale file left behind by a prior unclean shutdown before binding.
pub async fn serve_unix_socket(socket_path: String, service: Service) -> std::io::Result<()> {
    let _ = std::fs::remove_file(&socket_path);
    let listener = UnixListener::bind(&socket_path)?;
    info!(socket_path, "listening on unix socket");

    loop {
        let (stream, _addr) = listener.accept().await?;
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, service).await {
                warn!(error = %e, "unix socket connection ended with an error");
            }
        });
    }
}

/// Binds and serves the framed-TCP carrier backing `CLUSTER_TRANSPORT=http`
/// (spec §4.2's `FramedStream` docs: plain TCP framed the same way, not
/// text HTTP/1.1).
pub async fn serve_tcp(tcp_addr: String, service: Service) -> std::io::Result<()> {
    let listener = TcpListener::bind(&tcp_addr).await?;
    info!(tcp_addr, "listening on tcp");

    loop {
        let (stream, peer) = listener.accept().await?;
        let service = service.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, service).await {
                warn!(%peer, error = %e, "tcp connection ended with an error");
            }
        });
    }
}

async fn serve_connection<S>(mut stream: S, service: Service) -> Result<(), jobmesh_wire::ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let bytes = match read_message(&mut stream).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(()),
        };
        let request: Request = match jobmesh_wire::decode(&bytes) {
            Ok(r) => r,
            Err(e) => {
                write_message(&mut stream, &jobmesh_wire::encode(&Response::Error(jobmesh_core::JobError::Validation {
                    message: e.to_string(),
                }))?).await?;
                continue;
            }
        };

        if let Request::Progress { job_id, .. } = request {
            stream_progress(&mut stream, &service, job_id).await?;
            continue;
        }

        let response = dispatch(&service, request).await;
        write_message(&mut stream, &jobmesh_wire::encode(&response)?).await?;
    }
}

/// Streams `Response::Progress` frames until the job reaches a terminal
/// state and `ProgressHub::finish` drops the channel (spec §9 Open
/// Question: the stream itself signals completion via `ProgressDone`).
async fn stream_progress<S>(
    stream: &mut S,
    service: &Service,
    job_id: jobmesh_core::JobId,
) -> Result<(), jobmesh_wire::ProtocolError>
where
    S: AsyncWrite + Unpin,
{
    let (last, mut rx) = service.progress(job_id);
    if let Some(progress) = last {
        let update = jobmesh_wire::ProgressUpdate { pct: progress.pct(), message: progress.message };
        write_message(stream, &jobmesh_wire::encode(&Response::Progress(update))?).await?;
    }

    loop {
        match rx.recv().await {
            Ok(progress) => {
                let update = jobmesh_wire::ProgressUpdate { pct: progress.pct(), message: progress.message };
                write_message(stream, &jobmesh_wire::encode(&Response::Progress(update))?).await?;
            }
            Err(_) => break,
        }
    }
    write_message(stream, &jobmesh_wire::encode(&Response::ProgressDone)?).await?;
    Ok(())
}

async fn dispatch(service: &Service, request: Request) -> Response {
    match request {
        Request::Submit { envelope } => match service.submit(envelope).await {
            Ok((job_id, duplicate)) => Response::Submitted { job_id, duplicate },
            Err(e) => Response::Error(e),
        },
        Request::Status { job_id, .. } => match service.status(job_id).await {
            Some(record) => Response::Status(jobmesh_wire::JobStatusResponse {
                job_id: record.job_id,
                status: record.status,
                attempts: record.attempts,
                max_attempts: record.max_attempts,
                history: record.history,
                result: record.result,
                last_error: record.last_error,
            }),
            None => Response::Status(jobmesh_wire::JobStatusResponse::unknown(job_id)),
        },
        Request::Progress { .. } => unreachable!("Progress is handled by stream_progress before dispatch"),
        Request::Cancel { job_id, .. } => match service.cancel(job_id).await {
            Ok(()) => Response::Ok,
            Err(e) => Response::Error(e),
        },
        Request::Replay { dlq_id } => match service.replay(dlq_id).await {
            Ok(()) => Response::Replayed,
            Err(e) => Response::Error(e),
        },
        Request::ResetJob { job_id } => match service.reset_job(job_id).await {
            Ok(()) => Response::ResetDone,
            Err(e) => Response::Error(e),
        },
        Request::RecoverInFlight => match service.recover_in_flight().await {
            Ok(count) => Response::RecoveredCount { count: count as u64 },
            Err(e) => Response::Error(e),
        },
        Request::DlqList { tenant_id, limit } => match service.dlq_list(&tenant_id, limit).await {
            Ok(entries) => Response::DlqList(entries),
            Err(e) => Response::Error(e),
        },
    }
}
