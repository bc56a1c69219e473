//! The pool event loop.
//!
//! One task owns the failover strategy and every client in it. It reacts to
//! three inputs: events from connection tasks, commands from the listener
//! (through a [`NetworkHandle`]) and a one-second tick that drives retries,
//! timeouts and keepalives. Nothing else touches client state, so none of
//! it needs a lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::dns::DnsCache;
use crate::error::Result;
use crate::job::{Algorithm, JobResult};
use crate::strategy::{FailoverStrategy, StrategyEvent};
use crate::stratum::{Connector, LinkEvent, Pool, StratumError, StratumResult, TcpConnector};
use crate::tracing::prelude::*;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum Command {
    Submit {
        result: Box<JobResult>,
        reply: oneshot::Sender<StratumResult<u64>>,
    },
    Resume,
    Stop,
    SetAlgorithm(Algorithm),
}

/// Listener's way into the event loop. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl NetworkHandle {
    /// Submit a result through the authoritative pool. Resolves to the
    /// request id once written; the pool's verdict arrives later as
    /// [`StrategyEvent::ResultAccepted`].
    pub async fn submit(&self, result: JobResult) -> StratumResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Submit {
            result: Box::new(result),
            reply,
        })?;
        rx.await.map_err(|_| StratumError::NotActive)?
    }

    /// Ask for the current job again.
    pub fn resume(&self) -> StratumResult<()> {
        self.send(Command::Resume)
    }

    /// Disconnect from every pool.
    pub fn stop(&self) -> StratumResult<()> {
        self.send(Command::Stop)
    }

    pub fn set_algorithm(&self, algorithm: Algorithm) -> StratumResult<()> {
        self.send(Command::SetAlgorithm(algorithm))
    }

    fn send(&self, command: Command) -> StratumResult<()> {
        self.tx
            .send(command)
            .map_err(|_| StratumError::Transport("network task is gone".to_string()))
    }
}

pub struct Network {
    strategy: FailoverStrategy,
    links: mpsc::UnboundedReceiver<LinkEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
}

impl Network {
    /// Build the strategy for the configured pools. Strategy events go to
    /// `events`; connection tasks are spawned on `tracker`.
    pub fn new(
        config: &Config,
        events: mpsc::UnboundedSender<StrategyEvent>,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Result<(Self, NetworkHandle)> {
        let (link_tx, links) = mpsc::unbounded_channel();
        let dns = Arc::new(DnsCache::system(Duration::from_secs(config.dns.ttl)));
        let connector = TcpConnector::new(
            link_tx,
            dns,
            config.link_options(),
            tracker,
            shutdown.clone(),
        );

        Self::with_connector(config, Arc::new(connector), links, events, shutdown)
    }

    /// Like [`new`](Self::new) with a caller-supplied connector whose link
    /// events arrive on `links`.
    pub fn with_connector(
        config: &Config,
        connector: Arc<dyn Connector>,
        links: mpsc::UnboundedReceiver<LinkEvent>,
        events: mpsc::UnboundedSender<StrategyEvent>,
        shutdown: CancellationToken,
    ) -> Result<(Self, NetworkHandle)> {
        let mut strategy = FailoverStrategy::new(config.client_options(), connector, events);
        if let Some(filter) = config.algorithm_filter()? {
            strategy.set_hooks(Arc::new(filter));
        }
        for pool_config in &config.pools {
            strategy.add(Pool::from_config(pool_config)?);
        }

        let (tx, commands) = mpsc::unbounded_channel();
        let network = Self {
            strategy,
            links,
            commands,
            shutdown,
        };
        Ok((network, NetworkHandle { tx }))
    }

    pub async fn run(mut self) {
        let mut ticker = time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.strategy.connect(Instant::now());

        loop {
            tokio::select! {
                Some(event) = self.links.recv() => {
                    self.strategy.on_link_event(event, Instant::now());
                }
                Some(command) = self.commands.recv() => self.handle(command),
                _ = ticker.tick() => {
                    self.strategy.tick(Instant::now());
                }
                _ = self.shutdown.cancelled() => {
                    debug!("Network shutting down");
                    break;
                }
            }
        }

        self.strategy.stop();
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Submit { result, reply } => {
                let outcome = self.strategy.submit(&result);
                if let Err(e) = &outcome {
                    debug!(job_id = %result.job_id, error = %e, "Result not submitted");
                }
                let _ = reply.send(outcome);
            }
            Command::Resume => self.strategy.resume(),
            Command::Stop => self.strategy.stop(),
            Command::SetAlgorithm(algorithm) => self.strategy.set_algorithm(algorithm),
        }
    }
}
