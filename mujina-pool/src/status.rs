//! Status listener.
//!
//! Answers every line received on a connection with a JSON snapshot of the
//! active pool and the result counters. With TLS enabled each connection is
//! sniffed: a ClientHello gets a TLS session, anything else is served in
//! plaintext on the same port.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use rustls::ServerConfig;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::Result;
use crate::stats::ResultStats;
use crate::strategy::StrategyEvent;
use crate::stratum::LineCodec;
use crate::tls::DetectingSession;
use crate::tracing::prelude::*;

/// What the listener reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// URL of the authoritative pool, `None` while paused
    pub pool: Option<String>,
    pub client_id: Option<usize>,
    pub ip: Option<IpAddr>,
    /// Negotiated TLS version with the pool
    pub tls: Option<String>,
    pub job_id: Option<String>,
    pub algo: Option<String>,
    pub diff: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub total_diff: u64,
    pub best_diff: u64,
    pub latency_ms: Option<u64>,
}

impl StatusSnapshot {
    /// Fold in a strategy event; `stats` must already include it.
    pub fn apply(&mut self, event: &StrategyEvent, stats: &ResultStats) {
        match event {
            StrategyEvent::Active {
                client_id,
                pool,
                ip,
                tls,
            } => {
                *self = StatusSnapshot {
                    pool: Some(pool.to_string()),
                    client_id: Some(*client_id),
                    ip: *ip,
                    tls: tls.as_ref().map(|t| t.version.clone()),
                    ..StatusSnapshot::default()
                };
            }
            StrategyEvent::Paused => {
                self.pool = None;
                self.client_id = None;
                self.ip = None;
                self.tls = None;
                self.job_id = None;
            }
            StrategyEvent::Job { job, .. } => {
                self.job_id = Some(job.id().to_string());
                self.algo = Some(job.algorithm().to_string());
                self.diff = job.diff();
            }
            StrategyEvent::ResultAccepted { .. } => {}
        }

        self.accepted = stats.accepted();
        self.rejected = stats.rejected();
        self.total_diff = stats.total_diff();
        self.best_diff = stats.best_diff();
        self.latency_ms = stats.median_latency().map(|d| d.as_millis() as u64);
    }
}

pub type SharedStatus = Arc<Mutex<StatusSnapshot>>;

pub struct StatusServer {
    listener: TcpListener,
    tls: Option<Arc<ServerConfig>>,
    status: SharedStatus,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl StatusServer {
    /// Bind the listener. `tls` enables TLS alongside plaintext.
    pub async fn bind(
        addr: SocketAddr,
        tls: Option<Arc<ServerConfig>>,
        status: SharedStatus,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, tls = tls.is_some(), "Status listener started");
        if !local.ip().is_loopback() {
            warn!(addr = %local, "Status listener is reachable from the network");
        }

        Ok(Self {
            listener,
            tls,
            status,
            shutdown,
            tracker: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown, then wait for open ones to end.
    pub async fn run(self) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Status connection");
                        let connection = Connection {
                            stream,
                            session: self.tls.clone().map(DetectingSession::new),
                            status: self.status.clone(),
                            shutdown: self.shutdown.clone(),
                        };
                        self.tracker.spawn(async move {
                            if let Err(e) = connection.serve().await {
                                debug!(peer = %peer, error = %e, "Status connection failed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Status accept failed"),
                },
                _ = self.shutdown.cancelled() => break,
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        debug!("Status listener stopped");
    }
}

struct Connection {
    stream: TcpStream,
    session: Option<DetectingSession>,
    status: SharedStatus,
    shutdown: CancellationToken,
}

impl Connection {
    async fn serve(mut self) -> Result<()> {
        let mut codec = LineCodec::new();
        let mut plain = BytesMut::new();
        let mut buf = vec![0u8; 4096];

        loop {
            let n = tokio::select! {
                n = self.stream.read(&mut buf) => n?,
                _ = self.shutdown.cancelled() => return Ok(()),
            };
            if n == 0 {
                return Ok(());
            }

            match &mut self.session {
                Some(session) => {
                    let mut decrypted = Vec::new();
                    session.feed(&buf[..n], &mut decrypted)?;
                    plain.extend_from_slice(&decrypted);
                }
                None => plain.extend_from_slice(&buf[..n]),
            }

            let mut reply = BytesMut::new();
            while codec.decode(&mut plain)?.is_some() {
                let snapshot = self.status.lock().clone();
                let line = serde_json::to_string(&snapshot).map_err(io::Error::from)?;
                codec.encode(line, &mut reply)?;
            }

            let out = match &mut self.session {
                Some(session) => {
                    if !reply.is_empty() {
                        session.send(&reply)?;
                    }
                    session.take_outgoing()
                }
                None => reply.to_vec(),
            };
            if !out.is_empty() {
                self.stream.write_all(&out).await?;
            }
        }
    }
}
