//! Daemon lifecycle management for mujina-pool.
//!
//! Wires the network event loop to a listener that logs what the pools are
//! doing, starts the status listener if configured, then waits for a signal
//! and shuts everything down.

use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::config::Config;
use crate::network::Network;
use crate::stats::ResultStats;
use crate::status::{SharedStatus, StatusServer};
use crate::strategy::StrategyEvent;
use crate::tracing::prelude::*;

/// The main daemon.
pub struct Daemon {
    config: Config,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Run the daemon until shutdown is requested.
    pub async fn run(self) -> anyhow::Result<()> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (network, handle) = Network::new(
            &self.config,
            event_tx,
            self.tracker.clone(),
            self.shutdown.clone(),
        )?;
        let status = SharedStatus::default();

        if let Some(addr) = self.config.status_listen {
            let tls = if self.config.tls.enabled {
                Some(self.config.tls.server_config()?)
            } else {
                None
            };
            let server =
                StatusServer::bind(addr, tls, status.clone(), self.shutdown.clone()).await?;
            self.tracker.spawn(server.run());
        }

        self.tracker.spawn(network.run());
        self.tracker.spawn(listen(event_rx, status));
        self.tracker.close();

        info!(pools = self.config.pools.len(), "Started.");

        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }

        trace!("Shutting down.");
        // disconnect from the pools first; cancelling stops the network regardless
        if let Err(e) = handle.stop() {
            debug!(error = %e, "Network already stopped");
        }
        tokio::task::yield_now().await;
        self.shutdown.cancel();

        self.tracker.wait().await;
        info!("Exiting.");

        Ok(())
    }
}

/// Stand-in for the hashing engine: log strategy events and keep score.
/// Ends when the network task drops its sender.
async fn listen(mut events: mpsc::UnboundedReceiver<StrategyEvent>, status: SharedStatus) {
    let mut stats = ResultStats::new();

    while let Some(event) = events.recv().await {
        if let StrategyEvent::ResultAccepted { result, error, .. } = &event {
            stats.record(result, error.as_deref());
        }

        match &event {
            StrategyEvent::Active {
                client_id,
                pool,
                ip,
                tls,
            } => {
                stats.reset();
                let fingerprint = tls.as_ref().and_then(|t| t.fingerprint.as_deref());
                info!(
                    client = *client_id,
                    pool = %pool,
                    ip = ?ip,
                    tls = tls.as_ref().map(|t| t.version.as_str()).unwrap_or("none"),
                    fingerprint = fingerprint.unwrap_or("-"),
                    "Using pool"
                );
            }
            StrategyEvent::Job { client_id, job, .. } => {
                info!(
                    client = *client_id,
                    job_id = job.id(),
                    algo = %job.algorithm(),
                    diff = job.diff(),
                    height = job.height(),
                    "New job"
                );
            }
            StrategyEvent::Paused => warn!("No pool available, paused"),
            StrategyEvent::ResultAccepted {
                client_id,
                result,
                error,
            } => {
                info!(
                    client = *client_id,
                    accepted = stats.accepted(),
                    rejected = stats.rejected(),
                    diff = result.diff,
                    latency_ms = stats.median_latency().map(|d| d.as_millis() as u64),
                    error = error.as_deref().unwrap_or("-"),
                    "Result"
                );
            }
        }

        status.lock().apply(&event, &stats);
    }
}
