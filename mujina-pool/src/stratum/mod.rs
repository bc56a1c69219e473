//! Stratum mining pool client.
//!
//! Pools speak line-delimited JSON-RPC over TCP, optionally through a SOCKS5
//! proxy and optionally wrapped in TLS.
//!
//! # Protocol Overview
//!
//! Stratum is a bidirectional, event-driven protocol:
//!
//! - **Client requests**: login (or subscribe + authorize), submit, keepalive
//! - **Server notifications**: new jobs, target and extra nonce changes,
//!   reconnect requests
//! - **Server responses**: results for client requests (object, boolean or
//!   error member)
//!
//! Two dialects exist, see [`dialect`](self::dialect) for the details.
//!
//! # Architecture
//!
//! [`Client`] is a sans-io state machine: it never touches a socket. The
//! owner opens links through a [`Connector`], feeds back [`LinkEvent`]s and
//! drains [`ClientEvent`]s. The production [`TcpConnector`] runs one tokio
//! task per connection; tests use a channel-backed mock.
//!
//! ```rust,ignore
//! let mut client = Client::new(0, pool, ClientOptions::default());
//! client.connect(&connector, Instant::now());
//!
//! while let Some(event) = link_rx.recv().await {
//!     client.on_link_event(event.id.generation, event.kind, Instant::now());
//!     while let Some(event) = client.poll_event() {
//!         match event {
//!             ClientEvent::JobReceived { job, .. } => { /* hand to hashers */ }
//!             ClientEvent::Closed { .. } => { /* retry is scheduled */ }
//!             // ...
//!         }
//!     }
//! }
//! ```

mod client;
mod codec;
pub mod dialect;
mod error;
mod hooks;
mod link;
mod messages;
mod pool;
mod socks5;
mod url;

pub use client::{
    Client, ClientEvent, ClientOptions, ClientState, CONNECT_TIMEOUT, KEEPALIVE_INTERVAL,
};
pub use codec::{LineCodec, MAX_LINE_LEN};
pub use dialect::{Dialect, ProtocolMode};
pub use error::{StratumError, StratumResult};
pub use hooks::{AlgorithmFilter, ClientHooks, NoHooks};
pub use link::{
    Connector, LinkCommand, LinkEvent, LinkEventKind, LinkHandle, LinkId, LinkOptions,
    TcpConnector,
};
pub use messages::JsonRpcMessage;
pub use pool::Pool;
pub use socks5::{Socks5, Socks5Step};
pub use url::{PoolUrl, ProxyUrl, DEFAULT_PORT};

#[cfg(test)]
pub(crate) use link::mock;
