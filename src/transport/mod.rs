//! Transport layer: concrete transports and the facade that multiplexes
//! endpoints over them.
//!
//! A [`TransportFacade`] wraps exactly one concrete transport (TCP or
//! shared memory) and routes incoming framed messages to the right endpoint
//! by destination identifier. Concrete transports are selected with the
//! [`ConcreteTransport`] tag; dispatch is a match on the active variant.

pub mod frame;
mod sm;
mod tcp;

pub use sm::{SmBlock, SmTransport, SmTransportCfg};
pub use tcp::{TcpStatus, TcpTransport, TcpTransportCfg};

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::engine::EngineShared;
use crate::error::Error;
use crate::event::{Event, EventKind, EventQueue};
use crate::netutil::NetIface;

const DEFAULT_NUM_EVENTS: usize = 1024;

/// Which concrete transport a facade carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Inter-node framed TCP.
    Tcp,
    /// Intra-node shared memory.
    Sm,
}

/// A concrete transport handle, tagged by protocol.
#[derive(Debug, Clone)]
pub enum ConcreteTransport {
    /// A TCP transport (see [`TcpTransportCfg::init`]).
    Tcp(Arc<TcpTransport>),
    /// A shared-memory transport (see [`SmTransportCfg::init`]).
    Sm(Arc<SmTransport>),
}

impl ConcreteTransport {
    /// The protocol tag of this handle.
    pub fn kind(&self) -> TransportKind {
        match self {
            ConcreteTransport::Tcp(_) => TransportKind::Tcp,
            ConcreteTransport::Sm(_) => TransportKind::Sm,
        }
    }
}

/// Facade over one concrete transport.
///
/// Owned by the engine; endpoints hold shared handles. The facade keeps the
/// map from wire-level endpoint identifiers to local endpoint ids that the
/// receive dispatch path uses.
#[derive(Debug)]
pub struct TransportFacade {
    engine: RwLock<Weak<EngineShared>>,
    concrete: RwLock<Option<ConcreteTransport>>,
    // Wire-level endpoint id -> local endpoint id.
    eps: RwLock<HashMap<String, String>>,
    events: EventQueue,
    iface: RwLock<Option<NetIface>>,
}

impl TransportFacade {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            engine: RwLock::new(Weak::new()),
            concrete: RwLock::new(None),
            eps: RwLock::new(HashMap::new()),
            events: EventQueue::new(DEFAULT_NUM_EVENTS),
            iface: RwLock::new(None),
        })
    }

    // ============================================================================
    // Concrete-Transport Management
    // ============================================================================

    /// Installs a concrete transport. Fails with [`Error::AlreadySet`] if
    /// one is already present.
    pub fn add(&self, concrete: ConcreteTransport) -> Result<(), Error> {
        let mut slot = self.concrete.write().expect("concrete lock poisoned");
        if slot.is_some() {
            return Err(Error::AlreadySet);
        }
        debug!(kind = ?concrete.kind(), "adding concrete transport");
        *slot = Some(concrete);
        Ok(())
    }

    /// The protocol tag of the installed concrete transport.
    pub fn kind(&self) -> Option<TransportKind> {
        self.concrete
            .read()
            .expect("concrete lock poisoned")
            .as_ref()
            .map(ConcreteTransport::kind)
    }

    /// The installed TCP transport, when the concrete is TCP.
    pub fn tcp(&self) -> Option<Arc<TcpTransport>> {
        match &*self.concrete.read().expect("concrete lock poisoned") {
            Some(ConcreteTransport::Tcp(tcp)) => Some(Arc::clone(tcp)),
            _ => None,
        }
    }

    /// The installed shared-memory transport, when the concrete is SM.
    pub fn sm(&self) -> Option<Arc<SmTransport>> {
        match &*self.concrete.read().expect("concrete lock poisoned") {
            Some(ConcreteTransport::Sm(sm)) => Some(Arc::clone(sm)),
            _ => None,
        }
    }

    // ============================================================================
    // Data Operations
    // ============================================================================

    /// Sends `msg` on behalf of endpoint `ep_id`.
    ///
    /// TCP: frames a DATAMSG with `src = ep_id` and, when the transport has
    /// handshaken with a remote endpoint, `dst` set to it. SM: `ep_id`
    /// names the destination peer.
    pub fn send(&self, ep_id: &str, msg: &[u8]) -> Result<(), Error> {
        match &*self.concrete.read().expect("concrete lock poisoned") {
            Some(ConcreteTransport::Tcp(tcp)) => {
                let hdr = frame::TcpHeader {
                    msg_type: frame::DATAMSG.to_string(),
                    src: ep_id.to_string(),
                    dst: tcp.first_remote_ep().unwrap_or_default(),
                };
                tcp.send_msg(&hdr, msg)
            }
            Some(ConcreteTransport::Sm(sm)) => sm.send(ep_id, msg),
            None => Err(Error::InvalidState),
        }
    }

    /// Dispatches one received frame to its destination endpoint.
    ///
    /// Blocks on the TCP receive queue, resolves the frame's destination via
    /// [`lookup_receiver`](Self::lookup_receiver), and emits a user-data
    /// event on that endpoint's queue. The returned bytes are intentionally
    /// empty: consumers drain payloads through [`Endpoint::recv`].
    pub fn recv(&self) -> Result<Vec<u8>, Error> {
        let tcp = match &*self.concrete.read().expect("concrete lock poisoned") {
            Some(ConcreteTransport::Tcp(tcp)) => Arc::clone(tcp),
            // Shared memory needs the receiving peer's id; use
            // `SmTransport::recv` directly.
            Some(ConcreteTransport::Sm(_)) => return Err(Error::InvalidState),
            None => return Err(Error::InvalidState),
        };

        // Poll rather than park on the queue: endpoint event threads drain
        // the same queue and must not find it locked.
        loop {
            if self.try_dispatch()? {
                return Ok(Vec::new());
            }
            if tcp.recv_queue_closed() {
                return Err(Error::PeerClosed);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
    }

    /// Dispatches one queued frame to its destination endpoint, without
    /// blocking.
    ///
    /// `Ok(true)` means a frame was delivered; `Ok(false)` means nothing was
    /// queued (shared memory never queues here). The RX buffer always goes
    /// back to its pool; a frame whose destination cannot be resolved, or
    /// that cannot be decoded, is consumed and surfaces as an error.
    pub fn try_dispatch(&self) -> Result<bool, Error> {
        let Some(tcp) = self.tcp() else {
            return Ok(false);
        };
        let Some(rx) = tcp.try_recv_rx() else {
            return Ok(false);
        };

        let dispatched = self.dispatch_frame(&rx);
        if let Err(err) = tcp.return_rx(rx) {
            warn!(?err, "unable to return RX buffer");
        }
        dispatched.map(|()| true)
    }

    // Resolves the frame's destination endpoint and emits a user-data event
    // carrying the payload on its queue.
    fn dispatch_frame(&self, rx: &[u8]) -> Result<(), Error> {
        let dst = frame::id_str(frame::dst(rx)).to_string();
        let Some(ep) = self.lookup_receiver(&dst) else {
            warn!("received a message for an unknown endpoint");
            return Err(Error::EndpointNotFound);
        };
        let payload = frame::payload(rx)?;
        ep.deliver(payload);
        Ok(())
    }

    /// Resolves an endpoint identifier seen on the wire to the local
    /// endpoint it is bound to on this transport.
    pub fn lookup_receiver(&self, id: &str) -> Option<Arc<Endpoint>> {
        let local = self.eps.read().expect("eps lock poisoned").get(id).cloned()?;
        let engine = self.engine.read().expect("engine link poisoned").upgrade()?;
        engine.lookup_ep(&local)
    }

    // ============================================================================
    // Connection Management
    // ============================================================================

    /// Connects to a remote node: creates a fresh endpoint through the
    /// engine, attaches this facade to it, dials through the concrete TCP
    /// transport, and registers the returned remote endpoint id.
    pub fn connect(self: &Arc<Self>, remote_addr: &str) -> Result<Arc<Endpoint>, Error> {
        let engine = self
            .engine
            .read()
            .expect("engine link poisoned")
            .upgrade()
            .ok_or(Error::InvalidState)?;
        let ep = engine.create_endpoint()?;
        ep.attach_transport(Arc::clone(self));
        ep.record_connection(Arc::clone(self));

        match &*self.concrete.read().expect("concrete lock poisoned") {
            Some(ConcreteTransport::Tcp(tcp)) => {
                let remote_ep = tcp.connect(ep.id(), remote_addr)?;
                self.register_receiver(&remote_ep, ep.id());
                // Replies address this endpoint by its own id.
                self.register_receiver(ep.id(), ep.id());
                Ok(ep)
            }
            // Shared memory has no connection establishment.
            Some(ConcreteTransport::Sm(_)) => Err(Error::InvalidState),
            None => Err(Error::InvalidState),
        }
    }

    /// Closes the concrete transport's connection.
    pub fn close(&self) -> Result<(), Error> {
        match &*self.concrete.read().expect("concrete lock poisoned") {
            Some(ConcreteTransport::Tcp(tcp)) => tcp.close(),
            Some(ConcreteTransport::Sm(sm)) => sm.fini(),
            None => Err(Error::InvalidState),
        }
    }

    /// Finalizes the facade: releases the concrete transport's connection
    /// and emits a termination event on the facade's queue. Endpoint event
    /// threads stop polling the facade once they see the event.
    pub fn fini(&self) -> Result<(), Error> {
        match &*self.concrete.read().expect("concrete lock poisoned") {
            Some(ConcreteTransport::Tcp(tcp)) => tcp.fini()?,
            Some(ConcreteTransport::Sm(sm)) => match sm.fini() {
                // Already torn down is fine here.
                Ok(()) | Err(Error::InvalidState) => {}
                Err(err) => return Err(err),
            },
            None => {}
        }

        let mut evt = self.events.get();
        evt.kind = EventKind::Term;
        evt.data = Vec::new();
        self.events.emit(evt);
        Ok(())
    }

    /// The next transport-level event, if one is queued. Hand consumed
    /// events back through [`ret_event`](Self::ret_event).
    pub fn try_next_event(&self) -> Option<Event> {
        self.events.try_next()
    }

    /// Returns a consumed transport-level event to the facade's pool.
    pub fn ret_event(&self, evt: Event) {
        self.events.ret(evt)
    }

    // ============================================================================
    // Engine Wiring
    // ============================================================================

    pub(crate) fn set_engine(&self, engine: Weak<EngineShared>) {
        *self.engine.write().expect("engine link poisoned") = engine;
    }

    pub(crate) fn register_receiver(&self, wire_id: &str, local_id: &str) {
        self.eps
            .write()
            .expect("eps lock poisoned")
            .insert(wire_id.to_string(), local_id.to_string());
    }

    // Binds a wire id only if no endpoint claimed it yet; the first
    // endpoint associated with an accepting transport owns its handshake
    // id.
    pub(crate) fn register_receiver_if_absent(&self, wire_id: &str, local_id: &str) {
        self.eps
            .write()
            .expect("eps lock poisoned")
            .entry(wire_id.to_string())
            .or_insert_with(|| local_id.to_string());
    }

    pub(crate) fn set_iface(&self, iface: NetIface) {
        *self.iface.write().expect("iface lock poisoned") = Some(iface);
    }

    /// The local interface this facade was bound to, in Auto mode.
    pub fn iface(&self) -> Option<NetIface> {
        self.iface.read().expect("iface lock poisoned").clone()
    }
}
