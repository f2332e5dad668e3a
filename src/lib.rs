//! A multi-transport communication library: logical endpoints exchanging
//! byte messages over framed TCP (inter-node) or shared memory (intra-node).
//!
//! - **Layered architecture:** a communication [`Engine`] owns endpoints and
//!   transports; a [`TransportFacade`] multiplexes endpoints over one
//!   concrete transport; concrete transports move the bytes
//! - **Framed TCP transport:** fixed-offset frames over a single stream
//!   connection, driven by a send worker and a receive worker per transport,
//!   with bounded RX/TX buffer pools
//! - **Shared-memory transport:** fixed-size blocks of a shared mapping
//!   handed between exactly two peers through a free-list discipline
//! - **Event-based receives:** completions surface on each endpoint's event
//!   queue; [`Endpoint::recv`] blocks until the next payload
//!
//! # Quick Start
//!
//! ## Option 1: Engine (Auto mode)
//!
//! An `Auto` engine discovers local interfaces, listens on each, and picks
//! the right one when connecting:
//!
//! ```no_run
//! use commkit::prelude::*;
//!
//! fn main() -> Result<(), Error> {
//!     let engine = EngineCfg { mode: EngineMode::Auto }.init()?;
//!
//!     // Reaches the destination through whichever local interface shares
//!     // a network with it.
//!     let ep = engine.connect("192.168.1.40")?;
//!     ep.send(b"hello")?;
//!     let reply = ep.recv()?;
//!     println!("reply: {} bytes", reply.len());
//!     ep.disconnect()
//! }
//! ```
//!
//! ## Option 2: Raw TCP transport
//!
//! The transport layer can be driven directly for full control over
//! framing:
//!
//! ```no_run
//! use commkit::prelude::*;
//!
//! fn main() -> Result<(), Error> {
//!     // Accept one connection on the loopback interface.
//!     let server = TcpTransportCfg {
//!         interface: "127.0.0.1".to_string(),
//!         port_low: 50000,
//!         port_high: 50000,
//!         accept: true,
//!         ..Default::default()
//!     }
//!     .init()?;
//!
//!     // Drain one data message and hand its buffer back to the pool.
//!     if let Some(rx) = server.recv_rx() {
//!         let payload = frame::payload(&rx)?.to_vec();
//!         println!("received {} bytes", payload.len());
//!         server.return_rx(rx)?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Typed `*Cfg` structs cover everything; each also loads from the
//! [`config`](https://docs.rs/config/) crate via `from_config`, with
//! `{name}.{key}` lookups falling back to plain `{key}` so several
//! instances can share one configuration source.
//!
//! | Key | Applies to | Description |
//! |-----|------------|-------------|
//! | `engine_mode` | engine | `"minimalist"` (default) or `"auto"` |
//! | `interface` | TCP | local IPv4 address, e.g. `"127.0.0.1"` |
//! | `port_low`, `port_high` | TCP | inclusive usable port range |
//! | `accept` | TCP | accept an inbound connection at init |
//! | `max_retry` | TCP | dial attempts before giving up (default 5) |
//! | `mtu` | TCP | on-wire frame size in bytes (default 4096) |
//! | `peer1`, `peer2` | SM | the two peer identifiers |
//! | `block_size`, `num_blocks` | SM | segment geometry (default 4096 × 512) |

mod config;
mod endpoint;
mod engine;
mod error;
mod event;
mod netutil;
mod pool;
pub mod transport;

pub use endpoint::{Connection, Endpoint};
pub use engine::{Engine, EngineCfg, EngineMode};
pub use error::Error;
pub use event::{Event, EventKind, EventQueue};
pub use netutil::{generate_id, local_interfaces, same_network, NetIface, ENDPOINT_ID_LEN};
pub use pool::BufferPool;
pub use transport::{
    ConcreteTransport, SmBlock, SmTransport, SmTransportCfg, TcpStatus, TcpTransport,
    TcpTransportCfg, TransportFacade, TransportKind,
};

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::endpoint::{Connection, Endpoint};
    pub use crate::engine::{Engine, EngineCfg, EngineMode};
    pub use crate::error::Error;
    pub use crate::netutil::NetIface;
    pub use crate::transport::frame;
    pub use crate::transport::{
        ConcreteTransport, SmTransport, SmTransportCfg, TcpStatus, TcpTransport, TcpTransportCfg,
        TransportFacade, TransportKind,
    };
}
