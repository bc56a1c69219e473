//! Per-pool client state machine.
//!
//! A [`Client`] owns no socket and spawns nothing. It is driven from the
//! outside: [`Client::connect`] asks a [`Connector`] for a link, link events
//! are fed in with [`Client::on_link_event`], time advances through
//! [`Client::tick`], and everything the owner needs to know is queued as
//! [`ClientEvent`]s drained with [`Client::poll_event`].

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use strum::{Display, IntoEnumIterator};
use tokio::time::Instant;

use super::dialect::{Dialect, Notification, Session};
use super::error::{StratumError, StratumResult};
use super::hooks::{ClientHooks, NoHooks};
use super::link::{Connector, LinkEventKind, LinkHandle, LinkId};
use super::messages::{error_text, real_error, JsonRpcMessage};
use super::pool::Pool;
use crate::job::{Algorithm, Job, JobResult, SubmitResult};
use crate::tls::TlsInfo;
use crate::tracing::prelude::*;

/// Connect and login must complete within this time.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Interval between `keepalived` requests on idle sessions.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Failures after which the close event reports the budget exhausted.
    pub retries: u32,
    pub retry_pause: Duration,
    pub user_agent: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retries: 5,
            retry_pause: Duration::from_secs(5),
            user_agent: concat!("mujina-pool/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ClientState {
    Disconnected,
    Connecting,
    Proxying,
    TlsHandshake,
    LoggingIn,
    LoggedIn,
}

/// Events for the client's owner.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    LoginSuccess,
    /// New job; `params` is the raw notification payload.
    JobReceived { job: Job, params: Value },
    /// Pool answered a submission; `error` is `None` if it was accepted.
    ResultAccepted {
        result: SubmitResult,
        error: Option<String>,
    },
    /// Connection closed. `failures` is `None` for an intentional
    /// disconnect; `exhausted` means the retry budget has been used up.
    Closed {
        failures: Option<u32>,
        exhausted: bool,
    },
}

/// What an outstanding request id is waiting for.
#[derive(Debug)]
enum Pending {
    Login,
    Authorize,
    Submit(SubmitResult),
    KeepAlive,
}

pub struct Client {
    id: usize,
    pool: Pool,
    options: ClientOptions,
    hooks: Arc<dyn ClientHooks>,
    /// Overrides the pool's algorithm at the next login.
    algorithm: Option<Algorithm>,
    dialect: Dialect,
    state: ClientState,
    state_since: Instant,
    generation: u64,
    link: Option<LinkHandle>,
    session: Session,
    job: Option<Job>,
    job_params: Value,
    pending: HashMap<u64, Pending>,
    sequence: u64,
    job_sequence: u64,
    failures: u32,
    retry_at: Option<Instant>,
    keepalive_at: Option<Instant>,
    ip: Option<IpAddr>,
    tls: Option<TlsInfo>,
    accepted: u64,
    rejected: u64,
    events: VecDeque<ClientEvent>,
}

impl Client {
    pub fn new(id: usize, pool: Pool, options: ClientOptions) -> Self {
        let dialect = Dialect::from(pool.mode);
        Self {
            id,
            pool,
            options,
            hooks: Arc::new(NoHooks),
            algorithm: None,
            dialect,
            state: ClientState::Disconnected,
            state_since: Instant::now(),
            generation: 0,
            link: None,
            session: Session::default(),
            job: None,
            job_params: Value::Null,
            pending: HashMap::new(),
            sequence: 0,
            job_sequence: 0,
            failures: 0,
            retry_at: None,
            keepalive_at: None,
            ip: None,
            tls: None,
            accepted: 0,
            rejected: 0,
            events: VecDeque::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn is_logged_in(&self) -> bool {
        self.state == ClientState::LoggedIn
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    pub fn session_id(&self) -> &str {
        &self.session.id
    }

    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    pub fn tls_info(&self) -> Option<&TlsInfo> {
        self.tls.as_ref()
    }

    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Algorithm offered at the next login.
    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        self.algorithm = Some(algorithm);
    }

    pub fn set_hooks(&mut self, hooks: Arc<dyn ClientHooks>) {
        self.hooks = hooks;
    }

    pub fn poll_event(&mut self) -> Option<ClientEvent> {
        self.events.pop_front()
    }

    /// Start a connection attempt. No-op unless disconnected.
    pub fn connect(&mut self, connector: &dyn Connector, now: Instant) {
        if self.state != ClientState::Disconnected {
            return;
        }

        self.generation += 1;
        self.retry_at = None;
        self.dialect = Dialect::from(self.pool.mode);
        self.session = Session {
            algorithm: self.algorithm.or(self.pool.algorithm),
            ..Session::default()
        };
        self.ip = None;
        self.tls = None;
        self.set_state(ClientState::Connecting, now);

        info!(
            client = self.id,
            pool = %self.pool.url,
            attempt = self.failures + 1,
            "Connecting to pool"
        );
        let id = LinkId {
            client: self.id,
            generation: self.generation,
        };
        self.link = Some(connector.open(id, &self.pool));
    }

    /// Close on purpose: no retry, failures forgotten.
    pub fn disconnect(&mut self) {
        self.retry_at = None;
        self.failures = 0;

        if self.state == ClientState::Disconnected {
            return;
        }

        debug!(client = self.id, pool = %self.pool.url, "Disconnecting");
        self.teardown();
        self.events.push_back(ClientEvent::Closed {
            failures: None,
            exhausted: false,
        });
    }

    /// Retries, connect/login deadline and keepalive.
    pub fn tick(&mut self, now: Instant, connector: &dyn Connector) {
        match self.state {
            ClientState::Disconnected => {
                if self.retry_at.is_some_and(|at| now >= at) {
                    self.connect(connector, now);
                }
            }
            ClientState::LoggedIn => {
                if self.keepalive_at.is_some_and(|at| now >= at) {
                    self.keepalive(now);
                }
            }
            _ => {
                if now.duration_since(self.state_since) >= CONNECT_TIMEOUT {
                    self.fail(StratumError::Timeout, now);
                }
            }
        }
    }

    /// Feed an event from link `generation`. Events from abandoned links
    /// are ignored.
    pub fn on_link_event(&mut self, generation: u64, kind: LinkEventKind, now: Instant) {
        if generation != self.generation || self.state == ClientState::Disconnected {
            trace!(client = self.id, generation, "Ignoring event from stale link");
            return;
        }

        match kind {
            LinkEventKind::Connected { ip } => {
                self.ip = Some(ip);
                if self.pool.proxy.is_some() {
                    self.state = ClientState::Proxying;
                } else if self.pool.is_tls() {
                    self.state = ClientState::TlsHandshake;
                }
            }
            LinkEventKind::ProxyReady => {
                if self.pool.is_tls() {
                    self.state = ClientState::TlsHandshake;
                }
            }
            LinkEventKind::TlsReady(info) => {
                self.tls = Some(info);
            }
            LinkEventKind::Ready => self.login(now),
            LinkEventKind::Line(line) => self.handle_line(&line, now),
            LinkEventKind::Closed { error } => {
                let reason = error.unwrap_or_else(|| "connection closed".to_string());
                self.fail(StratumError::Transport(reason), now);
            }
        }
    }

    /// Send a result to the pool. Returns the request id the
    /// acknowledgement will carry.
    pub fn submit(&mut self, result: &JobResult) -> StratumResult<u64> {
        if self.state != ClientState::LoggedIn {
            return Err(StratumError::NotLoggedIn);
        }
        if result.client_id != self.session.id {
            return Err(StratumError::StaleResult(result.client_id.clone()));
        }
        if result.diff == 0 {
            return Err(StratumError::Protocol("result has zero difficulty".to_string()));
        }

        let id = self.next_id();
        let msg = self
            .dialect
            .submit_request(id, result, &self.session, &self.pool)?;
        self.send(&msg)?;
        self.pending.insert(
            id,
            Pending::Submit(SubmitResult::new(id, result.diff, result.actual_diff())),
        );

        debug!(
            client = self.id,
            job_id = %result.job_id,
            nonce = %result.nonce_hex(),
            seq = id,
            "Submitted result"
        );
        Ok(id)
    }

    fn set_state(&mut self, state: ClientState, now: Instant) {
        self.state = state;
        self.state_since = now;
    }

    fn next_id(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn send(&mut self, msg: &JsonRpcMessage) -> StratumResult<()> {
        let link = self.link.as_ref().ok_or(StratumError::NotLoggedIn)?;
        link.send(msg.to_line()?)
    }

    /// Connection failed: count it, drop the link, schedule the retry.
    fn fail(&mut self, err: StratumError, now: Instant) {
        if self.state == ClientState::Disconnected {
            return;
        }

        self.failures += 1;
        let exhausted = self.failures >= self.options.retries;
        if exhausted {
            warn!(
                client = self.id,
                pool = %self.pool.url,
                error = %err,
                "{}",
                StratumError::RetryBudgetExceeded(self.failures)
            );
        } else {
            warn!(
                client = self.id,
                pool = %self.pool.url,
                failures = self.failures,
                error = %err,
                "Pool connection failed"
            );
        }

        self.teardown();
        self.retry_at = Some(now + self.options.retry_pause);
        self.events.push_back(ClientEvent::Closed {
            failures: Some(self.failures),
            exhausted,
        });
    }

    fn teardown(&mut self) {
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.state = ClientState::Disconnected;
        self.pending.clear();
        self.session = Session::default();
        self.job = None;
        self.job_params = Value::Null;
        self.keepalive_at = None;
    }

    fn login(&mut self, now: Instant) {
        let algorithms: Vec<Algorithm> = match self.algorithm.or(self.pool.algorithm) {
            Some(algorithm) => vec![algorithm],
            None => Algorithm::iter().collect(),
        };

        let id = self.next_id();
        let mut msg =
            self.dialect
                .login_request(id, &self.pool, &self.options.user_agent, &algorithms);
        if let JsonRpcMessage::Request {
            params: Value::Object(params),
            ..
        } = &mut msg
        {
            self.hooks.on_login(self.id, params);
        }
        self.pending.insert(id, Pending::Login);
        self.state = ClientState::LoggingIn;

        if let Err(err) = self.send(&msg) {
            self.fail(err, now);
        }
    }

    fn keepalive(&mut self, now: Instant) {
        self.keepalive_at = Some(now + KEEPALIVE_INTERVAL);

        let id = self.next_id();
        let Some(msg) = self.dialect.keepalive_request(id, &self.session) else {
            return;
        };
        trace!(client = self.id, "Sending keepalive");
        self.pending.insert(id, Pending::KeepAlive);
        if let Err(err) = self.send(&msg) {
            self.fail(err, now);
        }
    }

    fn logged_in(&mut self, now: Instant) {
        self.set_state(ClientState::LoggedIn, now);
        self.failures = 0;
        if self.pool.keepalive {
            self.keepalive_at = Some(now + KEEPALIVE_INTERVAL);
        }

        info!(
            client = self.id,
            pool = %self.pool.url,
            ip = ?self.ip,
            tls = self.tls.as_ref().map(|t| t.version.as_str()).unwrap_or("none"),
            "Logged in"
        );
        self.events.push_back(ClientEvent::LoginSuccess);

        // Eth pools may notify before authorize completes
        if let Some(job) = &self.job {
            self.events.push_back(ClientEvent::JobReceived {
                job: job.clone(),
                params: self.job_params.clone(),
            });
        }
    }

    fn handle_line(&mut self, line: &str, now: Instant) {
        let msg: JsonRpcMessage = match serde_json::from_str(line) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(client = self.id, error = %e, line, "Dropping malformed message");
                return;
            }
        };

        trace!(
            client = self.id,
            id = ?msg.id(),
            method = msg.method().unwrap_or("-"),
            "Received"
        );
        match msg {
            JsonRpcMessage::Request { method, params, .. } => {
                self.handle_notification(&method, params, now)
            }
            JsonRpcMessage::Response { id, result, error } => {
                self.handle_response(id, result, error, now)
            }
        }
    }

    fn handle_notification(&mut self, method: &str, params: Value, now: Instant) {
        let notification =
            match self
                .dialect
                .parse_notification(method, &params, &self.session, &self.pool)
            {
                Ok(n) => n,
                Err(e) => {
                    warn!(client = self.id, method, error = %e, "Dropping invalid notification");
                    return;
                }
            };

        match notification {
            Notification::Job(job) if !self.hooks.verify_algorithm(self.id, job.algorithm()) => {
                warn!(
                    client = self.id,
                    job_id = job.id(),
                    error = %StratumError::AlgorithmRefused(job.algorithm()),
                    "Dropping job"
                );
            }
            Notification::Job(job) => self.set_job(*job, params, now),
            Notification::SetTarget(target) => {
                debug!(
                    client = self.id,
                    share_target = %format!("{:016x}", target),
                    "Share target changed"
                );
                self.session.target = target;
            }
            Notification::SetExtraNonce(extra_nonce) => {
                debug!(
                    client = self.id,
                    extra_nonce = %hex::encode(&extra_nonce),
                    "Extra nonce changed"
                );
                self.session.extra_nonce = Some(extra_nonce);
            }
            Notification::Reconnect => {
                self.fail(StratumError::Transport("pool requested reconnect".to_string()), now)
            }
            Notification::Ignored => {
                debug!(client = self.id, method, "Ignoring notification");
            }
        }
    }

    fn set_job(&mut self, mut job: Job, params: Value, now: Instant) {
        if self.job.as_ref() == Some(&job) {
            warn!(client = self.id, job_id = job.id(), "Duplicate job received, reconnecting");
            return self.fail(StratumError::Protocol("duplicate job".to_string()), now);
        }

        self.job_sequence += 1;
        job.set_sequence(self.job_sequence);
        self.session.track_job(&job);
        debug!(
            client = self.id,
            job_id = job.id(),
            algo = %job.algorithm(),
            diff = job.diff(),
            height = job.height(),
            "New job"
        );

        self.job = Some(job.clone());
        self.job_params = params.clone();
        if self.state == ClientState::LoggedIn {
            self.events.push_back(ClientEvent::JobReceived { job, params });
        }
    }

    fn handle_response(
        &mut self,
        id: u64,
        result: Option<Value>,
        error: Option<Value>,
        now: Instant,
    ) {
        let Some(pending) = self.pending.remove(&id) else {
            debug!(client = self.id, id, "Response to unknown request");
            return;
        };

        match pending {
            Pending::Login => {
                if let Some(err) = real_error(&error) {
                    let err = StratumError::LoginRejected(error_text(err));
                    return self.fail(err, now);
                }
                let result = result.unwrap_or(Value::Null);
                let outcome = match self.dialect {
                    Dialect::Default => self.on_login(&result, now),
                    Dialect::Eth => self.on_subscribe(&result),
                };
                if let Err(err) = outcome {
                    self.fail(err, now);
                }
            }
            Pending::Authorize => {
                if let Some(err) = real_error(&error) {
                    return self.fail(StratumError::LoginRejected(error_text(err)), now);
                }
                if result != Some(Value::Bool(true)) {
                    let err = StratumError::LoginRejected("authorization refused".to_string());
                    return self.fail(err, now);
                }
                self.logged_in(now);
            }
            Pending::Submit(mut submit) => {
                submit.done();
                let outcome = self.dialect.submit_outcome(&result, &error);
                match &outcome {
                    None => {
                        self.accepted += 1;
                        info!(
                            client = self.id,
                            accepted = self.accepted,
                            rejected = self.rejected,
                            diff = submit.diff,
                            latency_ms = submit.elapsed().map(|d| d.as_millis() as u64),
                            "Result accepted"
                        );
                    }
                    Some(reason) => {
                        self.rejected += 1;
                        warn!(
                            client = self.id,
                            accepted = self.accepted,
                            rejected = self.rejected,
                            reason = %reason,
                            "Result rejected"
                        );
                    }
                }
                self.events.push_back(ClientEvent::ResultAccepted {
                    result: submit,
                    error: outcome,
                });
            }
            Pending::KeepAlive => {
                if let Some(err) = real_error(&error) {
                    debug!(client = self.id, error = %error_text(err), "Keepalive refused");
                }
            }
        }
    }

    fn on_login(&mut self, result: &Value, now: Instant) -> StratumResult<()> {
        let login = Dialect::parse_login(result, self.pool.mode)?;
        self.session.id = login.session_id;

        if login.dialect == Dialect::Eth {
            if let Some(algorithm) = login.algorithm {
                if !self.hooks.verify_algorithm(self.id, algorithm) {
                    return Err(StratumError::AlgorithmRefused(algorithm));
                }
                self.algorithm = Some(algorithm);
            }
            info!(
                client = self.id,
                pool = %self.pool.url,
                algo = ?login.algorithm,
                "Pool speaks the Eth dialect, switching"
            );
            self.dialect = Dialect::Eth;
            self.session.algorithm = login.algorithm;
            self.session.extra_nonce = login.extra_nonce;
            self.session.extra_nonce2_size = login.extra_nonce2_size;
            self.logged_in(now);
            return Ok(());
        }

        let params = login
            .job
            .ok_or_else(|| StratumError::Protocol("login result has no job".to_string()))?;
        let Notification::Job(job) =
            self.dialect
                .parse_notification("job", &params, &self.session, &self.pool)?
        else {
            return Err(StratumError::Protocol("login job not understood".to_string()));
        };
        if !self.hooks.verify_algorithm(self.id, job.algorithm()) {
            return Err(StratumError::AlgorithmRefused(job.algorithm()));
        }

        self.set_job(*job, params, now);
        self.logged_in(now);
        Ok(())
    }

    fn on_subscribe(&mut self, result: &Value) -> StratumResult<()> {
        let (extra_nonce, size) = Dialect::parse_subscribe(result, self.session.algorithm)?;
        self.session.id = format!("eth-{}-{}", self.id, self.generation);
        self.session.extra_nonce = Some(extra_nonce);
        self.session.extra_nonce2_size = size;

        let id = self.next_id();
        let msg = self.dialect.authorize_request(id, &self.pool);
        self.pending.insert(id, Pending::Authorize);
        self.send(&msg)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("pool", &self.pool.url.to_string())
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("failures", &self.failures)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stratum::dialect::ProtocolMode;
    use crate::stratum::link::mock::{MockConnector, MockLink};
    use crate::stratum::url::PoolUrl;
    use serde_json::json;

    const SEED: &str = "1111111111111111111111111111111111111111111111111111111111111111";

    fn pool() -> Pool {
        let mut pool = Pool::new(PoolUrl::new("pool.example.com", 3333, false), "wallet");
        pool.algorithm = Some(Algorithm::Rx0);
        pool
    }

    fn rx_job(job_id: &str, fill: &str) -> Value {
        json!({
            "job_id": job_id,
            "blob": fill.repeat(76),
            "target": "e4a63d00",
            "seed_hash": SEED,
        })
    }

    fn options(retries: u32) -> ClientOptions {
        ClientOptions {
            retries,
            retry_pause: Duration::from_secs(5),
            user_agent: "test".to_string(),
        }
    }

    struct Harness {
        client: Client,
        connector: MockConnector,
        link: MockLink,
        now: Instant,
    }

    impl Harness {
        fn new(pool: Pool, retries: u32) -> Self {
            let connector = MockConnector::default();
            let mut client = Client::new(0, pool, options(retries));
            let now = Instant::now();
            client.connect(&connector, now);
            let link = connector.take().pop().unwrap();
            Self {
                client,
                connector,
                link,
                now,
            }
        }

        fn event(&mut self, kind: LinkEventKind) {
            let generation = self.client.generation();
            self.client.on_link_event(generation, kind, self.now);
        }

        fn ready(&mut self) {
            self.event(LinkEventKind::Connected {
                ip: "192.0.2.1".parse().unwrap(),
            });
            self.event(LinkEventKind::Ready);
        }

        fn line(&mut self, value: Value) {
            self.event(LinkEventKind::Line(value.to_string()));
        }

        fn events(&mut self) -> Vec<ClientEvent> {
            std::iter::from_fn(|| self.client.poll_event()).collect()
        }

        /// Connect and log in with the default dialect.
        fn logged_in(pool: Pool) -> Self {
            let mut h = Self::new(pool, 5);
            h.ready();
            let job = rx_job("j1", "00");
            h.line(json!({"id": 1, "result": {"id": "s1", "job": job, "status": "OK"}}));
            h.events();
            h.link.written();
            h
        }
    }

    #[test]
    fn test_default_login() {
        let mut h = Harness::new(pool(), 5);
        assert_eq!(h.client.state(), ClientState::Connecting);

        h.ready();
        assert_eq!(h.client.state(), ClientState::LoggingIn);
        let written = h.link.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0]["method"], "login");
        assert_eq!(written[0]["params"]["algo"], json!(["rx/0"]));

        h.line(json!({"id": 1, "jsonrpc": "2.0", "error": null,
            "result": {"id": "s1", "job": rx_job("j1", "00"), "status": "OK"}}));
        assert!(h.client.is_logged_in());
        assert_eq!(h.client.ip(), Some("192.0.2.1".parse().unwrap()));

        let events = h.events();
        assert!(matches!(events[0], ClientEvent::LoginSuccess));
        let ClientEvent::JobReceived { job, .. } = &events[1] else {
            panic!("expected job after login");
        };
        assert_eq!(job.id(), "j1");
        assert_eq!(job.client_id(), "s1");
        assert_eq!(job.sequence(), 1);
    }

    #[test]
    fn test_login_rejected_schedules_retry() {
        let mut h = Harness::new(pool(), 5);
        h.ready();
        h.line(json!({"id": 1, "error": {"code": -1, "message": "Invalid address"}}));

        assert_eq!(h.client.state(), ClientState::Disconnected);
        assert!(h.link.is_closed());
        assert!(matches!(
            h.events()[..],
            [ClientEvent::Closed {
                failures: Some(1),
                exhausted: false
            }]
        ));

        // not yet
        h.client.tick(h.now + Duration::from_secs(4), &h.connector);
        assert!(h.connector.take().is_empty());

        h.client.tick(h.now + Duration::from_secs(5), &h.connector);
        let links = h.connector.take();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].id.generation, 2);
        assert_eq!(h.client.state(), ClientState::Connecting);
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let mut h = Harness::new(pool(), 1);
        h.event(LinkEventKind::Closed {
            error: Some("connection refused".to_string()),
        });
        assert!(matches!(
            h.events()[..],
            [ClientEvent::Closed {
                failures: Some(1),
                exhausted: true
            }]
        ));
    }

    #[test]
    fn test_zero_budget_exhausts_immediately() {
        let mut h = Harness::new(pool(), 0);
        h.event(LinkEventKind::Closed { error: None });
        assert!(matches!(
            h.events()[..],
            [ClientEvent::Closed {
                exhausted: true,
                ..
            }]
        ));
    }

    #[test]
    fn test_stale_link_events_ignored() {
        let mut h = Harness::new(pool(), 5);
        h.event(LinkEventKind::Closed { error: None });
        h.events();
        h.client.tick(h.now + Duration::from_secs(5), &h.connector);
        assert_eq!(h.client.generation(), 2);

        // late close from the first link
        h.client
            .on_link_event(1, LinkEventKind::Closed { error: None }, h.now);
        assert_eq!(h.client.state(), ClientState::Connecting);
        assert!(h.events().is_empty());
    }

    #[test]
    fn test_login_timeout() {
        let mut h = Harness::new(pool(), 5);
        h.ready();
        h.client.tick(h.now + Duration::from_secs(19), &h.connector);
        assert_eq!(h.client.state(), ClientState::LoggingIn);

        h.client.tick(h.now + CONNECT_TIMEOUT, &h.connector);
        assert_eq!(h.client.state(), ClientState::Disconnected);
        assert!(matches!(
            h.events()[..],
            [ClientEvent::Closed {
                failures: Some(1),
                ..
            }]
        ));
    }

    #[test]
    fn test_malformed_messages_are_dropped() {
        let mut h = Harness::logged_in(pool());
        h.event(LinkEventKind::Line("{not json".to_string()));
        h.line(json!({"method": "job", "params": {"job_id": "j2"}}));
        let bad_blob = json!({"job_id": "j2", "blob": "zz", "target": "e4a63d00"});
        h.line(json!({"method": "job", "params": bad_blob}));

        assert!(h.client.is_logged_in());
        assert!(h.events().is_empty());
        assert_eq!(h.client.job().unwrap().id(), "j1");
    }

    #[test]
    fn test_reissued_work_is_a_new_job() {
        let mut h = Harness::logged_in(pool());

        // same blob and target under a new id
        h.line(json!({"method": "job", "params": rx_job("j1b", "00")}));
        let events = h.events();
        let [ClientEvent::JobReceived { job, params }] = &events[..] else {
            panic!("expected one job");
        };
        assert_eq!(job.id(), "j1b");
        assert_eq!(job.sequence(), 2);
        assert_eq!(params["job_id"], "j1b");

        let result = JobResult::new(job, 7, [0; 32]);
        h.client.submit(&result).unwrap();
        assert_eq!(h.link.written()[0]["params"]["job_id"], "j1b");
    }

    #[test]
    fn test_duplicate_job_reconnects() {
        let mut h = Harness::logged_in(pool());

        h.line(json!({"method": "job", "params": rx_job("j1", "00")}));
        assert_eq!(h.client.state(), ClientState::Disconnected);
        assert!(h.link.is_closed());
        assert!(matches!(
            h.events()[..],
            [ClientEvent::Closed {
                failures: Some(1),
                exhausted: false
            }]
        ));

        h.client.tick(h.now + Duration::from_secs(5), &h.connector);
        assert_eq!(h.connector.take().len(), 1);
    }

    #[test]
    fn test_submit() {
        let mut h = Harness::logged_in(pool());
        let job = h.client.job().unwrap().clone();

        let result = JobResult::new(&job, 0x0102_0304, [0xaa; 32]);
        let id = h.client.submit(&result).unwrap();
        assert_eq!(id, 2);

        let written = h.link.written();
        assert_eq!(written[0]["method"], "submit");
        assert_eq!(written[0]["id"], 2);
        assert_eq!(written[0]["params"]["id"], "s1");
        assert_eq!(written[0]["params"]["job_id"], "j1");
        assert_eq!(written[0]["params"]["nonce"], "04030201");
        assert_eq!(written[0]["params"]["result"], "aa".repeat(32));

        let second = h.client.submit(&result).unwrap();
        assert!(second > id);

        h.line(json!({"id": id, "result": {"status": "OK"}}));
        h.line(json!({"id": second, "error": {"code": -1, "message": "Duplicate share"}}));
        let events = h.events();
        assert!(matches!(
            &events[0],
            ClientEvent::ResultAccepted { result, error: None } if result.seq == id
        ));
        assert!(matches!(
            &events[1],
            ClientEvent::ResultAccepted { error: Some(e), .. } if e == "Duplicate share"
        ));
        assert_eq!(h.client.accepted(), 1);
        assert_eq!(h.client.rejected(), 1);
    }

    #[test]
    fn test_submit_checks_session() {
        let mut h = Harness::new(pool(), 5);
        let mut job = Job::new(Algorithm::Rx0, false, "s1");
        job.set_blob(&"00".repeat(76)).unwrap();
        job.set_target("e4a63d00").unwrap();
        let result = JobResult::new(&job, 1, [0; 32]);
        assert!(matches!(h.client.submit(&result), Err(StratumError::NotLoggedIn)));

        let mut h = Harness::logged_in(pool());
        let stale = JobResult::new(&Job::new(Algorithm::Rx0, false, "old-session"), 1, [0; 32]);
        assert!(matches!(h.client.submit(&stale), Err(StratumError::StaleResult(_))));
        assert!(h.link.written().is_empty());
    }

    #[test]
    fn test_forgets_in_flight_results_on_close() {
        let mut h = Harness::logged_in(pool());
        let job = h.client.job().unwrap().clone();
        let id = h.client.submit(&JobResult::new(&job, 1, [0; 32])).unwrap();

        h.event(LinkEventKind::Closed { error: None });
        h.events();
        assert!(h.client.job().is_none());

        // reply arriving on the next connection is not matched
        h.client.tick(h.now + Duration::from_secs(5), &h.connector);
        h.ready();
        h.line(json!({"id": id, "result": {"status": "OK"}}));
        assert!(!h
            .events()
            .iter()
            .any(|e| matches!(e, ClientEvent::ResultAccepted { .. })));
    }

    #[test]
    fn test_intentional_disconnect() {
        let mut h = Harness::logged_in(pool());
        h.client.disconnect();
        assert!(h.link.is_closed());
        assert!(matches!(
            h.events()[..],
            [ClientEvent::Closed {
                failures: None,
                exhausted: false
            }]
        ));

        // idempotent, and no retry
        h.client.disconnect();
        assert!(h.events().is_empty());
        h.client.tick(h.now + Duration::from_secs(60), &h.connector);
        assert!(h.connector.take().is_empty());
    }

    #[test]
    fn test_reconnect_request_counts_as_close() {
        let mut h = Harness::logged_in(pool());
        h.line(json!({"method": "client.reconnect", "params": []}));
        assert_eq!(h.client.state(), ClientState::Disconnected);
        assert!(matches!(
            h.events()[..],
            [ClientEvent::Closed {
                failures: Some(1),
                ..
            }]
        ));
    }

    #[test]
    fn test_keepalive() {
        let mut pool = pool();
        pool.keepalive = true;
        let mut h = Harness::logged_in(pool);

        h.client.tick(h.now + Duration::from_secs(59), &h.connector);
        assert!(h.link.written().is_empty());

        h.client.tick(h.now + KEEPALIVE_INTERVAL, &h.connector);
        let written = h.link.written();
        assert_eq!(written[0]["method"], "keepalived");
        assert_eq!(written[0]["params"]["id"], "s1");
    }

    #[test]
    fn test_login_requires_job_in_default_mode() {
        let mut h = Harness::new(pool(), 5);
        h.ready();
        h.line(json!({"id": 1, "result": {"id": "s1", "status": "OK"}}));
        assert_eq!(h.client.state(), ClientState::Disconnected);
    }

    fn kawpow_pool() -> Pool {
        let mut pool = Pool::new(PoolUrl::new("rvn.example.com", 4444, false), "wallet");
        pool.algorithm = Some(Algorithm::KawPow);
        pool.mode = ProtocolMode::Eth;
        pool
    }

    fn notify(job_id: &str) -> Value {
        json!({
            "id": null,
            "method": "mining.notify",
            "params": [
                job_id,
                format!("0x{}", "22".repeat(32)),
                format!("0x{}", "33".repeat(32)),
                format!("0x00000000ffff0000{}", "0".repeat(48)),
                true,
                1200000,
                "1b00ffff"
            ]
        })
    }

    #[test]
    fn test_eth_login_and_submit() {
        let mut h = Harness::new(kawpow_pool(), 5);
        h.ready();
        let written = h.link.written();
        assert_eq!(written[0]["method"], "mining.subscribe");

        let subscriptions = json!([["mining.notify", "abc", "EthereumStratum/1.0.0"], "ab12"]);
        h.line(json!({"id": 1, "result": subscriptions, "error": null}));
        let written = h.link.written();
        assert_eq!(written[0]["method"], "mining.authorize");
        assert_eq!(written[0]["params"], json!(["wallet", "x"]));

        // work may arrive before the authorize reply
        h.line(notify("e1"));
        assert!(h.events().is_empty());

        h.line(json!({"id": 2, "result": true, "error": null}));
        let events = h.events();
        assert!(matches!(events[0], ClientEvent::LoginSuccess));
        let ClientEvent::JobReceived { job, .. } = &events[1] else {
            panic!("expected job");
        };
        assert_eq!(job.algorithm(), Algorithm::KawPow);
        assert_eq!(job.extra_nonce(), Some(&[0xab, 0x12][..]));
        assert_eq!(job.height(), 1200000);

        let result =
            JobResult::new(job, 0xab12_0000_0000_0001, [0; 32]).with_kawpow([4; 32], [5; 32]);
        let id = h.client.submit(&result).unwrap();
        let written = h.link.written();
        assert_eq!(written[0]["method"], "mining.submit");
        assert_eq!(written[0]["params"][2], "0xab12000000000001");

        h.line(json!({"id": id, "result": true}));
        assert!(matches!(
            h.events()[..],
            [ClientEvent::ResultAccepted { error: None, .. }]
        ));
    }

    #[test]
    fn test_eth_authorize_refused() {
        let mut h = Harness::new(kawpow_pool(), 5);
        h.ready();
        h.line(json!({"id": 1, "result": [null, "ab12"]}));
        h.line(json!({"id": 2, "result": false, "error": [24, "Unauthorized worker", null]}));
        assert_eq!(h.client.state(), ClientState::Disconnected);
    }

    #[test]
    fn test_eth_set_target_applies_to_next_job() {
        let mut h = Harness::new(kawpow_pool(), 5);
        h.ready();
        h.line(json!({"id": 1, "result": [null, "ab12"]}));
        h.line(json!({"id": 2, "result": true}));
        h.events();

        h.line(json!({"method": "mining.set_difficulty", "params": [2]}));
        let mut msg = notify("e2");
        msg["params"][3] = Value::Null;
        h.line(msg);

        let events = h.events();
        let [ClientEvent::JobReceived { job, .. }] = &events[..] else {
            panic!("expected job");
        };
        assert_eq!(job.target(), u64::MAX / 2);
    }

    #[test]
    fn test_auto_mode_switches_dialect() {
        let mut pool = pool();
        pool.mode = ProtocolMode::Auto;
        let mut h = Harness::new(pool, 5);
        h.ready();
        let result = json!({"id": "s9", "algo": "kawpow", "extra_nonce": "ab12"});
        h.line(json!({"id": 1, "result": result}));

        assert!(h.client.is_logged_in());
        assert_eq!(h.client.dialect(), Dialect::Eth);
        assert!(matches!(h.events()[..], [ClientEvent::LoginSuccess]));

        h.line(notify("e1"));
        let events = h.events();
        let [ClientEvent::JobReceived { job, .. }] = &events[..] else {
            panic!("expected job");
        };
        assert_eq!(job.client_id(), "s9");
    }

    fn ghostrider_notify(job_id: &str) -> Value {
        json!({
            "method": "mining.notify",
            "params": [
                job_id,
                "11".repeat(32),
                "01",
                "02",
                [],
                "20000000",
                "1b0404cb",
                "5f5e1000",
                true
            ]
        })
    }

    #[test]
    fn test_auto_mode_ghostrider() {
        let mut pool = pool();
        pool.mode = ProtocolMode::Auto;
        let mut h = Harness::new(pool, 5);
        h.ready();
        let result = json!({
            "id": "s9",
            "algo": "ghostrider",
            "extra_nonce": "aabbccdd",
            "extra_nonce2_size": 4,
        });
        h.line(json!({"id": 1, "result": result}));
        assert!(h.client.is_logged_in());
        assert_eq!(h.client.dialect(), Dialect::Eth);
        h.events();

        h.line(json!({"method": "mining.set_difficulty", "params": [1]}));
        h.line(ghostrider_notify("g1"));
        let events = h.events();
        let [ClientEvent::JobReceived { job, .. }] = &events[..] else {
            panic!("expected job");
        };
        assert_eq!(job.algorithm(), Algorithm::GhostRider);
        assert_eq!(job.blob().len(), 80);
        assert_eq!(job.target(), u64::MAX / 65536);

        let result = JobResult::new(job, 0x0000_00ff, [0; 32]);
        h.client.submit(&result).unwrap();
        let written = h.link.written();
        assert_eq!(written[0]["method"], "mining.submit");
        assert_eq!(
            written[0]["params"],
            json!(["wallet", "g1", "00000000", "5f5e1000", "000000ff"])
        );
    }

    struct OnlyRandomX;

    impl ClientHooks for OnlyRandomX {
        fn on_login(&self, client_id: usize, params: &mut serde_json::Map<String, Value>) {
            params.insert("rigid".to_string(), json!(format!("rig-{}", client_id)));
        }

        fn verify_algorithm(&self, _client_id: usize, algorithm: Algorithm) -> bool {
            algorithm.family() == crate::job::Family::RandomX
        }
    }

    #[test]
    fn test_hooks_adjust_login() {
        let mut h = Harness::new(pool(), 5);
        h.client.set_hooks(Arc::new(OnlyRandomX));
        h.ready();
        let written = h.link.written();
        assert_eq!(written[0]["method"], "login");
        assert_eq!(written[0]["params"]["rigid"], "rig-0");
    }

    #[test]
    fn test_hooks_refuse_login_algorithm() {
        let mut h = Harness::new(pool(), 5);
        h.client.set_hooks(Arc::new(OnlyRandomX));
        h.ready();
        let mut job = rx_job("j1", "00");
        job["algo"] = json!("cn/r");
        h.line(json!({"id": 1, "result": {"id": "s1", "job": job}}));

        assert_eq!(h.client.state(), ClientState::Disconnected);
        assert!(matches!(
            h.events()[..],
            [ClientEvent::Closed {
                failures: Some(1),
                ..
            }]
        ));
    }

    #[test]
    fn test_hooks_refuse_auto_switch() {
        let mut pool = pool();
        pool.mode = ProtocolMode::Auto;
        let mut h = Harness::new(pool, 5);
        h.client.set_hooks(Arc::new(OnlyRandomX));
        h.ready();
        let result = json!({"id": "s9", "algo": "kawpow", "extra_nonce": "ab12"});
        h.line(json!({"id": 1, "result": result}));
        assert_eq!(h.client.state(), ClientState::Disconnected);
    }

    #[test]
    fn test_hooks_drop_refused_jobs() {
        let mut h = Harness::logged_in(pool());
        h.client.set_hooks(Arc::new(OnlyRandomX));

        let mut job = rx_job("j2", "01");
        job["algo"] = json!("cn/r");
        h.line(json!({"method": "job", "params": job}));
        assert!(h.client.is_logged_in());
        assert!(h.events().is_empty());
        assert_eq!(h.client.job().unwrap().id(), "j1");

        let mut job = rx_job("j3", "02");
        job["algo"] = json!("rx/wow");
        h.line(json!({"method": "job", "params": job}));
        assert_eq!(h.events().len(), 1);
    }
}
