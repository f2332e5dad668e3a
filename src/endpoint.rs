//! Endpoints: logically addressable communication participants.
//!
//! An endpoint owns a queue of receive-completion events and forwards sends
//! to the first transport it is attached to. A per-endpoint event thread
//! bridges transport framing and the endpoint's blocking [`recv`]: it
//! drives each attached facade's dispatch, which resolves a frame's
//! destination endpoint and emits a user-data event on that endpoint's
//! queue.
//!
//! [`recv`]: Endpoint::recv

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::EngineShared;
use crate::error::Error;
use crate::event::{EventKind, EventQueue};
use crate::transport::TransportFacade;

const DEFAULT_EP_NUM_EVTS: usize = 4096;

// How long the event thread sleeps when no transport had anything queued.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A connection opened through a transport facade, tracked so
/// [`Endpoint::disconnect`] can close it.
#[derive(Debug)]
pub struct Connection {
    transport: Arc<TransportFacade>,
}

impl Connection {
    /// Closes the underlying concrete transport's connection.
    pub fn close(&self) -> Result<(), Error> {
        self.transport.close()
    }
}

/// A logically addressable communication participant.
///
/// Created through [`Engine::create_endpoint`](crate::Engine::create_endpoint)
/// or implicitly by a facade's `connect`.
#[derive(Debug)]
pub struct Endpoint {
    id: String,
    engine: Weak<EngineShared>,
    transports: RwLock<Vec<Arc<TransportFacade>>>,
    conns: Mutex<Vec<Connection>>,
    rx_events: EventQueue,
    disconnected: AtomicBool,
}

impl Endpoint {
    pub(crate) fn new(id: String, engine: Weak<EngineShared>) -> Arc<Self> {
        Arc::new(Self {
            id,
            engine,
            transports: RwLock::new(Vec::new()),
            conns: Mutex::new(Vec::new()),
            rx_events: EventQueue::new(DEFAULT_EP_NUM_EVTS),
            disconnected: AtomicBool::new(false),
        })
    }

    /// The endpoint's 256-character identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sends `data` over the endpoint's first transport.
    pub fn send(&self, data: &[u8]) -> Result<(), Error> {
        let transport = self
            .transports
            .read()
            .expect("transports lock poisoned")
            .first()
            .cloned()
            .ok_or(Error::InvalidState)?;
        transport.send(&self.id, data)
    }

    /// Blocks until the next receive completion and yields its payload.
    ///
    /// The payload is moved out of the event and the event goes back to the
    /// inactive pool, so the returned bytes are decoupled from any transport
    /// buffer.
    pub fn recv(&self) -> Result<Vec<u8>, Error> {
        let mut evt = self.rx_events.next();
        match evt.kind {
            EventKind::UserData => {
                let data = std::mem::take(&mut evt.data);
                self.rx_events.ret(evt);
                Ok(data)
            }
            EventKind::Term => {
                self.rx_events.ret(evt);
                Err(Error::PeerClosed)
            }
        }
    }

    /// Returns the next payload if a receive completion is already queued.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        let mut evt = self.rx_events.try_next()?;
        match evt.kind {
            EventKind::UserData => {
                let data = std::mem::take(&mut evt.data);
                self.rx_events.ret(evt);
                Some(data)
            }
            EventKind::Term => {
                self.rx_events.ret(evt);
                None
            }
        }
    }

    /// Closes every connection of this endpoint and stops its event thread.
    ///
    /// A failing close does not stop the remaining ones; any failure turns
    /// into a single summary error once all closes were attempted.
    pub fn disconnect(&self) -> Result<(), Error> {
        self.disconnected.store(true, Ordering::Release);

        let conns: Vec<Connection> = self
            .conns
            .lock()
            .expect("connections lock poisoned")
            .drain(..)
            .collect();
        let total = conns.len();
        let mut failed = 0;
        for conn in &conns {
            if let Err(err) = conn.close() {
                // Keep closing: the peer may already have torn this one down.
                warn!(?err, "connection close failed");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(Error::Disconnect { failed, total });
        }
        Ok(())
    }

    // ============================================================================
    // Wiring
    // ============================================================================

    pub(crate) fn attach_transport(&self, facade: Arc<TransportFacade>) {
        self.transports
            .write()
            .expect("transports lock poisoned")
            .push(facade);
    }

    pub(crate) fn record_connection(&self, facade: Arc<TransportFacade>) {
        self.conns
            .lock()
            .expect("connections lock poisoned")
            .push(Connection { transport: facade });
    }

    // Emits a user-data event carrying a copy of `payload`.
    pub(crate) fn deliver(&self, payload: &[u8]) {
        let mut evt = self.rx_events.get();
        evt.kind = EventKind::UserData;
        evt.data.clear();
        evt.data.extend_from_slice(payload);
        self.rx_events.emit(evt);
    }

    // ============================================================================
    // Event Thread
    // ============================================================================

    // Bridges transport framing to endpoint event queues: drives each
    // attached facade's dispatch without blocking, which resolves every
    // frame's destination endpoint before delivering. A facade that emits
    // a termination event is dropped from the polling set.
    pub(crate) fn start_event_thread(self: &Arc<Self>) {
        let ep = Arc::clone(self);
        thread::spawn(move || {
            debug!("event thread started");
            let mut finished: HashSet<usize> = HashSet::new();
            loop {
                if ep.disconnected.load(Ordering::Acquire) {
                    debug!("endpoint disconnected; event thread terminating");
                    return;
                }
                if ep.engine.strong_count() == 0 {
                    debug!("engine gone; event thread terminating");
                    return;
                }

                let transports: Vec<Arc<TransportFacade>> = ep
                    .transports
                    .read()
                    .expect("transports lock poisoned")
                    .clone();

                let mut progressed = false;
                // The transports list is append-only, so indices stay
                // stable across iterations.
                for (i, facade) in transports.iter().enumerate() {
                    if finished.contains(&i) {
                        continue;
                    }

                    if let Some(evt) = facade.try_next_event() {
                        let term = evt.kind == EventKind::Term;
                        facade.ret_event(evt);
                        if term {
                            debug!("transport finalized; event thread stops polling it");
                            finished.insert(i);
                            continue;
                        }
                    }

                    loop {
                        match facade.try_dispatch() {
                            Ok(true) => progressed = true,
                            Ok(false) => break,
                            Err(err) => {
                                // The frame was consumed; the failure stays
                                // contained here.
                                warn!(?err, "receive dispatch failed");
                                progressed = true;
                            }
                        }
                    }
                }

                if !progressed {
                    thread::sleep(EVENT_POLL_INTERVAL);
                }
            }
        });
    }
}
