//! Ordered failover across pools.
//!
//! Clients are tried in order, index 0 being the primary. The client at
//! `index` is the one being tried; when it fails past its retry budget the
//! next one is connected. Clients keep retrying on their own after failing,
//! so a recovered primary logs in again and takes authority back the
//! moment it does.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::StrategyEvent;
use crate::job::{Algorithm, JobResult};
use crate::stratum::{
    Client, ClientEvent, ClientHooks, ClientOptions, Connector, LinkEvent, NoHooks, Pool,
    StratumError, StratumResult,
};
use crate::tracing::prelude::*;

pub struct FailoverStrategy {
    clients: Vec<Client>,
    options: ClientOptions,
    hooks: Arc<dyn ClientHooks>,
    connector: Arc<dyn Connector>,
    /// Client currently being tried.
    index: usize,
    /// Authoritative client.
    active: Option<usize>,
    events: mpsc::UnboundedSender<StrategyEvent>,
}

impl FailoverStrategy {
    pub fn new(
        options: ClientOptions,
        connector: Arc<dyn Connector>,
        events: mpsc::UnboundedSender<StrategyEvent>,
    ) -> Self {
        Self {
            clients: Vec::new(),
            options,
            hooks: Arc::new(NoHooks),
            connector,
            index: 0,
            active: None,
            events,
        }
    }

    /// Append a pool; the first one added is the primary.
    pub fn add(&mut self, pool: Pool) {
        let id = self.clients.len();
        debug!(client = id, pool = %pool.url, "Added pool");
        let mut client = Client::new(id, pool, self.options.clone());
        client.set_hooks(self.hooks.clone());
        self.clients.push(client);
    }

    /// Hooks shared by every client, present and future.
    pub fn set_hooks(&mut self, hooks: Arc<dyn ClientHooks>) {
        for client in &mut self.clients {
            client.set_hooks(hooks.clone());
        }
        self.hooks = hooks;
    }

    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    pub fn client(&self, id: usize) -> Option<&Client> {
        self.clients.get(id)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn active(&self) -> Option<&Client> {
        self.active.map(|id| &self.clients[id])
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Connect the client currently being tried.
    pub fn connect(&mut self, now: Instant) {
        let Some(client) = self.clients.get_mut(self.index) else {
            warn!("No pools configured");
            return;
        };
        client.connect(self.connector.as_ref(), now);
        self.drain(now);
    }

    /// Disconnect everything and start over from the primary.
    pub fn stop(&mut self) {
        for client in &mut self.clients {
            client.disconnect();
        }
        self.index = 0;
        self.active = None;

        // only intentional closes are queued
        for client in &mut self.clients {
            while client.poll_event().is_some() {}
        }
        self.emit(StrategyEvent::Paused);
    }

    pub fn tick(&mut self, now: Instant) {
        for client in &mut self.clients {
            client.tick(now, self.connector.as_ref());
        }
        self.drain(now);
    }

    /// Send a result through the authoritative client.
    pub fn submit(&mut self, result: &JobResult) -> StratumResult<u64> {
        let id = self.active.ok_or(StratumError::NotActive)?;
        self.clients[id].submit(result)
    }

    /// Re-deliver the authoritative client's current job.
    pub fn resume(&mut self) {
        let Some(id) = self.active else {
            return;
        };
        if let Some(job) = self.clients[id].job() {
            let event = StrategyEvent::Job {
                client_id: id,
                job: job.clone(),
                params: Value::Null,
            };
            self.emit(event);
        }
    }

    /// Algorithm offered by every client at its next login.
    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        for client in &mut self.clients {
            client.set_algorithm(algorithm);
        }
    }

    pub fn on_link_event(&mut self, event: LinkEvent, now: Instant) {
        let Some(client) = self.clients.get_mut(event.id.client) else {
            warn!(client = event.id.client, "Event for unknown client");
            return;
        };
        client.on_link_event(event.id.generation, event.kind, now);
        self.drain(now);
    }

    /// Handle queued client events until none are left. Handling one may
    /// queue more on other clients (disconnects, the next pool connecting).
    fn drain(&mut self, now: Instant) {
        loop {
            let mut handled = false;
            for id in 0..self.clients.len() {
                while let Some(event) = self.clients[id].poll_event() {
                    self.handle(id, event, now);
                    handled = true;
                }
            }
            if !handled {
                break;
            }
        }
    }

    fn handle(&mut self, id: usize, event: ClientEvent, now: Instant) {
        match event {
            ClientEvent::LoginSuccess => self.on_login_success(id),
            ClientEvent::JobReceived { job, params } => {
                if self.active == Some(id) {
                    self.emit(StrategyEvent::Job {
                        client_id: id,
                        job,
                        params,
                    });
                }
            }
            ClientEvent::ResultAccepted { result, error } => {
                self.emit(StrategyEvent::ResultAccepted {
                    client_id: id,
                    result,
                    error,
                });
            }
            ClientEvent::Closed { failures: None, .. } => {}
            ClientEvent::Closed {
                failures: Some(_),
                exhausted,
            } => self.on_close(id, exhausted, now),
        }
    }

    fn on_close(&mut self, id: usize, exhausted: bool, now: Instant) {
        if self.active == Some(id) {
            self.active = None;
            warn!(client = id, pool = %self.clients[id].pool().url, "Lost authoritative pool");
            self.emit(StrategyEvent::Paused);
        }

        // primary gets its whole budget before anyone else is tried
        if self.index == 0 && !exhausted {
            return;
        }

        if self.index == id && self.index + 1 < self.clients.len() {
            self.index += 1;
            info!(
                client = self.index,
                pool = %self.clients[self.index].pool().url,
                "Failing over"
            );
            self.clients[self.index].connect(self.connector.as_ref(), now);
        }
    }

    fn on_login_success(&mut self, id: usize) {
        let mut active = self.active;
        if id == 0 || active.is_none() {
            active = Some(id);
        }

        for other in 1..self.clients.len() {
            if active != Some(other) {
                self.clients[other].disconnect();
            }
        }

        if let Some(new) = active.filter(|&new| self.active != Some(new)) {
            self.index = new;
            self.active = Some(new);

            let client = &self.clients[new];
            info!(client = new, pool = %client.pool().url, "Pool active");
            let event = StrategyEvent::Active {
                client_id: new,
                pool: client.pool().url.clone(),
                ip: client.ip(),
                tls: client.tls_info().cloned(),
            };
            self.emit(event);
        }
    }

    fn emit(&self, event: StrategyEvent) {
        if self.events.send(event).is_err() {
            trace!("Strategy listener gone");
        }
    }
}
