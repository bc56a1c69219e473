//! Transport between a client state machine and its pool.
//!
//! A [`Connector`] opens a link for a client and returns a [`LinkHandle`]
//! the client writes lines to. Everything that happens on the link (stages
//! of connection setup, received lines, closure) comes back as a
//! [`LinkEvent`] on a channel owned by the event loop. Events carry the
//! client index and connection generation, so events from a link the client
//! has since abandoned can be recognized and ignored.
//!
//! [`TcpConnector`] is the real thing: one tokio task per connection doing
//! DNS, TCP, the optional SOCKS5 and TLS handshakes, and line framing.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::codec::LineCodec;
use super::error::{StratumError, StratumResult};
use super::pool::Pool;
use super::socks5::{Socks5, Socks5Step};
use crate::dns::DnsCache;
use crate::tls::{client_config, TlsInfo, TlsProtocols, TlsSession};
use crate::tracing::prelude::*;

/// Identifies one connection attempt of one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId {
    pub client: usize,
    pub generation: u64,
}

/// Something that happened on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    /// TCP connection established
    Connected { ip: IpAddr },
    /// SOCKS5 tunnel established
    ProxyReady,
    /// TLS handshake completed
    TlsReady(TlsInfo),
    /// Application data may flow
    Ready,
    /// One line received from the pool
    Line(String),
    /// Link is gone; `error` is `None` for an orderly close we asked for
    Closed { error: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub id: LinkId,
    pub kind: LinkEventKind,
}

/// What the client can ask of its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Send(String),
    Close,
}

/// Client's end of a link. Dropping it closes the link.
#[derive(Debug)]
pub struct LinkHandle {
    tx: mpsc::UnboundedSender<LinkCommand>,
}

impl LinkHandle {
    pub fn new(tx: mpsc::UnboundedSender<LinkCommand>) -> Self {
        Self { tx }
    }

    /// Queue a line for the pool; the link adds the terminator.
    pub fn send(&self, line: String) -> StratumResult<()> {
        self.tx
            .send(LinkCommand::Send(line))
            .map_err(|_| StratumError::Transport("link closed".to_string()))
    }

    pub fn close(self) {
        let _ = self.tx.send(LinkCommand::Close);
    }
}

/// Opens links to pools.
pub trait Connector: Send + Sync {
    fn open(&self, id: LinkId, pool: &Pool) -> LinkHandle;
}

/// Connection settings shared by every link a [`TcpConnector`] opens.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub dns_ipv6: bool,
    pub dns_ttl: Duration,
    pub tls_protocols: TlsProtocols,
}

/// Production connector: spawns one task per link.
pub struct TcpConnector {
    events: mpsc::UnboundedSender<LinkEvent>,
    dns: Arc<DnsCache>,
    options: LinkOptions,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl TcpConnector {
    pub fn new(
        events: mpsc::UnboundedSender<LinkEvent>,
        dns: Arc<DnsCache>,
        options: LinkOptions,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            events,
            dns,
            options,
            tracker,
            shutdown,
        }
    }
}

impl Connector for TcpConnector {
    fn open(&self, id: LinkId, pool: &Pool) -> LinkHandle {
        let (tx, commands) = mpsc::unbounded_channel();
        let link = Link {
            id,
            pool: pool.clone(),
            dns: self.dns.clone(),
            options: self.options.clone(),
            events: self.events.clone(),
            shutdown: self.shutdown.clone(),
        };
        self.tracker.spawn(link.run(commands));
        LinkHandle::new(tx)
    }
}

const READ_BUF_SIZE: usize = 16 * 1024;

/// One connection's I/O task.
struct Link {
    id: LinkId,
    pool: Pool,
    dns: Arc<DnsCache>,
    options: LinkOptions,
    events: mpsc::UnboundedSender<LinkEvent>,
    shutdown: CancellationToken,
}

/// TCP stream, possibly wrapped in TLS.
struct Wire {
    stream: TcpStream,
    tls: Option<TlsSession>,
    buf: Vec<u8>,
}

impl Wire {
    async fn write(&mut self, data: &[u8]) -> StratumResult<()> {
        match &mut self.tls {
            Some(tls) => {
                tls.send(data)?;
                let out = tls.take_outgoing();
                self.stream.write_all(&out).await?;
            }
            None => self.stream.write_all(data).await?,
        }
        Ok(())
    }

    /// Read once; plaintext is appended to `plain`. `false` on EOF.
    async fn read(&mut self, plain: &mut BytesMut) -> StratumResult<bool> {
        let n = self.stream.read(&mut self.buf).await?;
        if n == 0 {
            return Ok(false);
        }
        match &mut self.tls {
            Some(tls) => {
                let mut decrypted = Vec::new();
                tls.feed(&self.buf[..n], &mut decrypted)?;
                plain.extend_from_slice(&decrypted);
                let out = tls.take_outgoing();
                if !out.is_empty() {
                    self.stream.write_all(&out).await?;
                }
            }
            None => plain.extend_from_slice(&self.buf[..n]),
        }
        Ok(true)
    }

    /// Say goodbye to a TLS peer; the socket closes when dropped.
    async fn close(&mut self) {
        if let Some(tls) = &mut self.tls {
            tls.close();
            let out = tls.take_outgoing();
            let _ = self.stream.write_all(&out).await;
        }
    }
}

impl Link {
    async fn run(self, mut commands: mpsc::UnboundedReceiver<LinkCommand>) {
        let error = tokio::select! {
            result = self.drive(&mut commands) => result.err().map(|e| e.to_string()),
            _ = self.shutdown.cancelled() => None,
        };

        if let Some(error) = &error {
            debug!(client = self.id.client, pool = %self.pool.url, error = %error, "Link failed");
        }
        self.emit(LinkEventKind::Closed { error });
    }

    fn emit(&self, kind: LinkEventKind) {
        // Event loop gone means we're shutting down
        let _ = self.events.send(LinkEvent { id: self.id, kind });
    }

    async fn drive(
        &self,
        commands: &mut mpsc::UnboundedReceiver<LinkCommand>,
    ) -> StratumResult<()> {
        // The client may give up on us at any point of the setup
        let (mut wire, mut plain) = tokio::select! {
            setup = self.establish() => setup?,
            _ = released(commands) => {
                debug!(client = self.id.client, pool = %self.pool.url, "Link closed during setup");
                return Ok(());
            }
        };
        self.emit(LinkEventKind::Ready);

        let mut codec = LineCodec::new();
        loop {
            while let Some(line) = codec.decode(&mut plain)? {
                trace!(client = self.id.client, rx = %line, "Received");
                self.emit(LinkEventKind::Line(line));
            }

            tokio::select! {
                command = commands.recv() => match command {
                    Some(LinkCommand::Send(line)) => {
                        trace!(client = self.id.client, tx = %line, "Sending");
                        let mut out = BytesMut::new();
                        codec.encode(line, &mut out)?;
                        wire.write(&out).await?;
                    }
                    Some(LinkCommand::Close) | None => {
                        wire.close().await;
                        return Ok(());
                    }
                },
                open = wire.read(&mut plain) => {
                    if !open? {
                        return Err(StratumError::Transport(
                            "connection closed by pool".to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// DNS, TCP, proxy and TLS. Returns the wire and any application data
    /// that arrived along with the handshakes.
    async fn establish(&self) -> StratumResult<(Wire, BytesMut)> {
        let (host, port) = match &self.pool.proxy {
            Some(proxy) => (proxy.host.clone(), proxy.port),
            None => (self.pool.url.host.clone(), self.pool.url.port),
        };

        let records = self.dns.resolve(&host, self.options.dns_ttl).await?;
        let ip = records
            .get(self.options.dns_ipv6)
            .ok_or_else(|| StratumError::Transport(format!("no address for {}", host)))?;

        debug!(client = self.id.client, host = %host, ip = %ip, port, "Connecting");
        let stream = TcpStream::connect(SocketAddr::new(ip, port)).await?;
        stream.set_nodelay(true)?;
        self.emit(LinkEventKind::Connected { ip });

        let mut wire = Wire {
            stream,
            tls: None,
            buf: vec![0; READ_BUF_SIZE],
        };
        let mut plain = Vec::new();

        if self.pool.proxy.is_some() {
            plain = self.socks5(&mut wire).await?;
            self.emit(LinkEventKind::ProxyReady);
        }

        if self.pool.is_tls() {
            let info = self.tls_handshake(&mut wire, &mut plain).await?;
            self.emit(LinkEventKind::TlsReady(info));
        }

        Ok((wire, BytesMut::from(&plain[..])))
    }

    /// Returns any pool bytes that arrived with the proxy's reply.
    async fn socks5(&self, wire: &mut Wire) -> StratumResult<Vec<u8>> {
        let mut socks = Socks5::new(self.pool.url.host.clone(), self.pool.url.port);
        wire.stream.write_all(&socks.start()).await?;

        loop {
            let n = wire.stream.read(&mut wire.buf).await?;
            if n == 0 {
                return Err(StratumError::Transport(
                    "proxy closed connection".to_string(),
                ));
            }
            match socks.read(&wire.buf[..n])? {
                Socks5Step::Pending => {}
                Socks5Step::Send(data) => wire.stream.write_all(&data).await?,
                Socks5Step::Ready(early) => return Ok(early),
            }
        }
    }

    /// Bytes already read (e.g. after the proxy reply) are ciphertext; on
    /// return `plain` holds any application data that came with the
    /// handshake.
    async fn tls_handshake(
        &self,
        wire: &mut Wire,
        plain: &mut Vec<u8>,
    ) -> StratumResult<TlsInfo> {
        let config = client_config(&self.pool.verification(), self.options.tls_protocols)?;
        let mut session = TlsSession::client(config, &self.pool.url.host)?;

        let early = std::mem::take(plain);
        if !early.is_empty() {
            session.feed(&early, plain)?;
        }

        loop {
            let out = session.take_outgoing();
            if !out.is_empty() {
                wire.stream.write_all(&out).await?;
            }
            if session.is_ready() {
                break;
            }

            let n = wire.stream.read(&mut wire.buf).await?;
            if n == 0 {
                return Err(StratumError::Transport(
                    "connection closed during TLS handshake".to_string(),
                ));
            }
            session.feed(&wire.buf[..n], plain)?;
        }

        let info = session
            .info()
            .cloned()
            .ok_or_else(|| StratumError::Transport("TLS session not ready".to_string()))?;
        debug!(
            client = self.id.client,
            version = %info.version,
            fingerprint = info.fingerprint.as_deref().unwrap_or("-"),
            "TLS established"
        );
        wire.tls = Some(session);
        Ok(info)
    }
}

/// Resolves once the client closes or drops its handle.
async fn released(commands: &mut mpsc::UnboundedReceiver<LinkCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            LinkCommand::Close => return,
            LinkCommand::Send(line) => {
                warn!(tx = %line, "Dropping line sent before link is ready")
            }
        }
    }
}

/// Connector for tests: records what was opened and exposes each link's
/// command channel.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::Value;

    pub(crate) struct MockLink {
        pub id: LinkId,
        pub host: String,
        rx: mpsc::UnboundedReceiver<LinkCommand>,
    }

    impl MockLink {
        /// Lines the client has written so far, parsed as JSON.
        pub fn written(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(command) = self.rx.try_recv() {
                if let LinkCommand::Send(line) = command {
                    out.push(serde_json::from_str(line.trim_end()).expect("client wrote bad JSON"));
                }
            }
            out
        }

        /// Whether the client has let go of the link.
        pub fn is_closed(&mut self) -> bool {
            loop {
                match self.rx.try_recv() {
                    Ok(LinkCommand::Close) => return true,
                    Ok(LinkCommand::Send(_)) => continue,
                    Err(mpsc::error::TryRecvError::Empty) => return false,
                    Err(mpsc::error::TryRecvError::Disconnected) => return true,
                }
            }
        }
    }

    #[derive(Default)]
    pub(crate) struct MockConnector {
        opened: Mutex<Vec<MockLink>>,
    }

    impl MockConnector {
        /// Links opened since the last call.
        pub fn take(&self) -> Vec<MockLink> {
            std::mem::take(&mut *self.opened.lock())
        }
    }

    impl Connector for MockConnector {
        fn open(&self, id: LinkId, pool: &Pool) -> LinkHandle {
            let (tx, rx) = mpsc::unbounded_channel();
            self.opened.lock().push(MockLink {
                id,
                host: pool.url.host.clone(),
                rx,
            });
            LinkHandle::new(tx)
        }
    }
}
