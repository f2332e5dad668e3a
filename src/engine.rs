//! The communication engine: top-level orchestrator owning endpoints and
//! transport facades.
//!
//! In `Auto` mode the engine discovers local network interfaces and
//! pre-instantiates a listening TCP transport for each usable one, so a
//! `connect` only has to pick the interface that shares a network with the
//! destination. In `Minimalist` mode it hosts exactly the transports the
//! application adds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use ::config::Config;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, instrument, warn};

use crate::config::lookup_string;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::netutil::{self, NetIface};
use crate::transport::{ConcreteTransport, TcpTransportCfg, TransportFacade};

const DEFAULT_TCP_PORT_LOW: u16 = 50000;
const DEFAULT_TCP_PORT_HIGH: u16 = 50100;

/// How much an engine sets up on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineMode {
    /// Only host explicitly-added transports.
    #[default]
    Minimalist,
    /// Discover local interfaces and pre-instantiate listening TCP
    /// transports for them.
    Auto,
}

/// Configuration of a communication engine.
#[derive(Debug, Clone, Default)]
pub struct EngineCfg {
    /// The engine's mode.
    pub mode: EngineMode,
}

impl EngineCfg {
    /// Builds a configuration from the `engine_mode` key (`"minimalist"` or
    /// `"auto"`), defaulting to minimalist.
    pub fn from_config(config: &Config, name: &str) -> Result<Self, Error> {
        let mode = match lookup_string(config, name, "engine_mode") {
            Ok(mode) => match mode.as_str() {
                "minimalist" => EngineMode::Minimalist,
                "auto" => EngineMode::Auto,
                _ => return Err(Error::InvalidEngineMode { got: mode }),
            },
            Err(_) => EngineMode::Minimalist,
        };
        Ok(Self { mode })
    }

    /// Creates the engine. In `Auto` mode this enumerates local interfaces
    /// and starts a background-accepting TCP transport for every interface
    /// with a `/8` or `/24` address.
    pub fn init(self) -> Result<Engine, Error> {
        let ifaces = match self.mode {
            EngineMode::Auto => netutil::local_interfaces()?,
            EngineMode::Minimalist => Vec::new(),
        };

        let shared = Arc::new(EngineShared {
            cfg: self,
            ifaces,
            transports: RwLock::new(Vec::new()),
            eps: RwLock::new(HashMap::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        });

        if shared.cfg.mode == EngineMode::Auto {
            for iface in shared.ifaces.clone() {
                if iface.addr.ends_with("/8") || iface.addr.ends_with("/24") {
                    shared.create_auto_tcp_transport(&iface)?;
                }
            }
        }

        Ok(Engine { shared })
    }
}

/// A communication engine. An application may run several.
#[derive(Debug)]
pub struct Engine {
    shared: Arc<EngineShared>,
}

#[derive(Debug)]
pub(crate) struct EngineShared {
    cfg: EngineCfg,
    ifaces: Vec<NetIface>,
    transports: RwLock<Vec<Arc<TransportFacade>>>,
    eps: RwLock<HashMap<String, Arc<Endpoint>>>,
    rng: Mutex<StdRng>,
}

impl Engine {
    /// The engine's mode.
    pub fn mode(&self) -> EngineMode {
        self.shared.cfg.mode
    }

    /// The local interfaces discovered at init (`Auto` mode only).
    pub fn interfaces(&self) -> &[NetIface] {
        &self.shared.ifaces
    }

    /// Wraps a concrete transport in a facade, appends it, and back-links
    /// the facade to this engine.
    pub fn add_transport(
        &self,
        concrete: ConcreteTransport,
    ) -> Result<Arc<TransportFacade>, Error> {
        self.shared.add_transport(concrete)
    }

    /// The facades currently hosted by this engine.
    pub fn transports(&self) -> Vec<Arc<TransportFacade>> {
        self.shared
            .transports
            .read()
            .expect("transports lock poisoned")
            .clone()
    }

    /// Creates an endpoint with a fresh collision-checked identifier and
    /// starts its event thread.
    pub fn create_endpoint(&self) -> Result<Arc<Endpoint>, Error> {
        self.shared.create_endpoint()
    }

    /// Looks an endpoint up by its identifier.
    pub fn lookup_ep(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.shared.lookup_ep(id)
    }

    /// Connects to a remote node identified by an IPv4 address (`Auto` mode
    /// only).
    ///
    /// Tries every local interface whose address contains `remote_addr` or
    /// whose network contains it; the first facade that connects supplies
    /// the endpoint.
    #[instrument(skip(self))]
    pub fn connect(&self, remote_addr: &str) -> Result<Arc<Endpoint>, Error> {
        if self.shared.cfg.mode != EngineMode::Auto {
            return Err(Error::InvalidState);
        }

        for iface in &self.shared.ifaces {
            if !iface.addr.contains(remote_addr)
                && !netutil::same_network(remote_addr, &iface.addr)
            {
                continue;
            }
            let Some(facade) = self.shared.transport_for_iface(iface) else {
                debug!(iface = %iface.name, "no transport bound to interface");
                continue;
            };
            match facade.connect(remote_addr) {
                Ok(ep) => return Ok(ep),
                Err(err) => {
                    // Another interface may still reach the destination.
                    warn!(?err, iface = %iface.name, "connect through interface failed");
                    continue;
                }
            }
        }

        Err(Error::NoRoute {
            addr: remote_addr.to_string(),
        })
    }
}

impl EngineShared {
    fn add_transport(
        self: &Arc<Self>,
        concrete: ConcreteTransport,
    ) -> Result<Arc<TransportFacade>, Error> {
        let facade = TransportFacade::new();
        facade.add(concrete)?;
        facade.set_engine(Arc::downgrade(self));
        self.transports
            .write()
            .expect("transports lock poisoned")
            .push(Arc::clone(&facade));
        Ok(facade)
    }

    pub(crate) fn create_endpoint(self: &Arc<Self>) -> Result<Arc<Endpoint>, Error> {
        // Collisions are negligible over an engine's lifetime but the map is
        // still the authority.
        let id = {
            let mut rng = self.rng.lock().expect("rng lock poisoned");
            let eps = self.eps.read().expect("endpoint map lock poisoned");
            loop {
                let id = netutil::generate_id(&mut *rng);
                if !eps.contains_key(&id) {
                    break id;
                }
            }
        };

        let ep = Endpoint::new(id.clone(), Arc::downgrade(self));
        self.eps
            .write()
            .expect("endpoint map lock poisoned")
            .insert(id.clone(), Arc::clone(&ep));
        let id_prefix = &id[..12];
        info!(ep = %id_prefix, "endpoint created");

        // Endpoints automatically serve the transports that accept inbound
        // connections. Remote peers address such a transport by the id its
        // handshake advertises, so the first endpoint bound to it also
        // claims that wire id.
        for facade in self
            .transports
            .read()
            .expect("transports lock poisoned")
            .iter()
        {
            if let Some(tcp) = facade.tcp() {
                if tcp.is_accepting_configured() {
                    ep.attach_transport(Arc::clone(facade));
                    facade.register_receiver(&id, &id);
                    if let Some(server_id) = tcp.first_receiver_ep() {
                        facade.register_receiver_if_absent(&server_id, &id);
                    }
                }
            }
        }

        ep.start_event_thread();

        Ok(ep)
    }

    pub(crate) fn lookup_ep(&self, id: &str) -> Option<Arc<Endpoint>> {
        self.eps
            .read()
            .expect("endpoint map lock poisoned")
            .get(id)
            .cloned()
    }

    fn transport_for_iface(&self, iface: &NetIface) -> Option<Arc<TransportFacade>> {
        self.transports
            .read()
            .expect("transports lock poisoned")
            .iter()
            .find(|facade| facade.iface().as_ref() == Some(iface))
            .cloned()
    }

    fn create_auto_tcp_transport(
        self: &Arc<Self>,
        iface: &NetIface,
    ) -> Result<Arc<TransportFacade>, Error> {
        let ip = iface
            .addr
            .rsplit_once('/')
            .map(|(ip, _)| ip)
            .unwrap_or(&iface.addr);
        info!(iface = %iface.name, ip, "instantiating TCP transport");

        let cfg = TcpTransportCfg {
            interface: ip.to_string(),
            port_low: DEFAULT_TCP_PORT_LOW,
            port_high: DEFAULT_TCP_PORT_HIGH,
            accept: true,
            do_not_block_on_accept: true,
            ..Default::default()
        };
        let tcp = cfg.init()?;

        let facade = self.add_transport(ConcreteTransport::Tcp(tcp))?;
        facade.set_iface(iface.clone());
        Ok(facade)
    }
}
