//! TCP transport implementation.
//!
//! Frames messages over a single accepted or dialed stream connection. Each
//! established transport runs two long-lived worker threads: the send worker
//! drains a bounded channel of TX buffers onto the socket, and the receive
//! worker reads one full frame at a time and dispatches it by message tag.
//! Connection establishment is a CONNREQ/CONNACK handshake performed
//! synchronously before the receive worker starts.

use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::mpsc::{Receiver, Sender, SyncSender, TrySendError};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use ::config::Config;
use tracing::{debug, error, info, trace, warn};

use crate::config::{lookup_bool, lookup_int, lookup_string};
use crate::error::Error;
use crate::netutil;
use crate::pool::BufferPool;
use crate::transport::frame::{self, TcpHeader, PAYLOAD_OFFSET};

const DEFAULT_MAX_RETRY: u32 = 5;
const DEFAULT_NUM_RX: usize = 1024;
const DEFAULT_NUM_TX: usize = 1024;
const DEFAULT_MTU: usize = 4096;

/// Lifecycle of a TCP transport's one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpStatus {
    /// No connection yet.
    Idle,
    /// Dialing a remote listener.
    Dialing,
    /// Waiting for an inbound connection.
    Accepting,
    /// Handshake complete; workers running.
    Connected,
    /// Connection torn down; workers have exited or are exiting.
    Closed,
}

/// Configuration of a TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransportCfg {
    /// Local IPv4 address to listen on, or the default dial interface.
    pub interface: String,
    /// Lowest usable port; the listener binds here.
    pub port_low: u16,
    /// Highest usable port (inclusive).
    pub port_high: u16,
    /// Whether this transport accepts an incoming connection at init.
    pub accept: bool,
    /// Run the accept sequence on a background thread so `init` returns
    /// immediately.
    pub do_not_block_on_accept: bool,
    /// Maximum dial attempts before `connect` gives up.
    pub max_retry: u32,
    /// Frame size; every frame occupies exactly this many bytes on the wire.
    pub mtu: usize,
    /// Number of receive buffers.
    pub num_rx: usize,
    /// Number of transmit buffers; also the send-channel depth.
    pub num_tx: usize,
}

impl Default for TcpTransportCfg {
    fn default() -> Self {
        Self {
            interface: "127.0.0.1".to_string(),
            port_low: 0,
            port_high: 0,
            accept: false,
            do_not_block_on_accept: false,
            max_retry: DEFAULT_MAX_RETRY,
            mtu: DEFAULT_MTU,
            num_rx: DEFAULT_NUM_RX,
            num_tx: DEFAULT_NUM_TX,
        }
    }
}

impl TcpTransportCfg {
    /// Builds a configuration from namespaced `config` keys, falling back to
    /// the defaults above for anything unset.
    ///
    /// Recognized keys: `interface`, `port_low`, `port_high`, `accept`,
    /// `max_retry`, `mtu`.
    pub fn from_config(config: &Config, name: &str) -> Result<Self, Error> {
        let mut cfg = Self::default();
        if let Ok(interface) = lookup_string(config, name, "interface") {
            cfg.interface = interface;
        }
        if let Ok(port) = lookup_int(config, name, "port_low") {
            cfg.port_low = port as u16;
        }
        if let Ok(port) = lookup_int(config, name, "port_high") {
            cfg.port_high = port as u16;
        }
        if let Ok(accept) = lookup_bool(config, name, "accept") {
            cfg.accept = accept;
        }
        if let Ok(max_retry) = lookup_int(config, name, "max_retry") {
            cfg.max_retry = max_retry as u32;
        }
        if let Ok(mtu) = lookup_int(config, name, "mtu") {
            cfg.mtu = mtu as usize;
        }
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.port_low > self.port_high {
            return Err(Error::InvalidConfig(format!(
                "port_low {} exceeds port_high {}",
                self.port_low, self.port_high
            )));
        }
        if self.mtu <= PAYLOAD_OFFSET {
            return Err(Error::InvalidConfig(format!(
                "mtu {} leaves no room after the {PAYLOAD_OFFSET}-byte frame header",
                self.mtu
            )));
        }
        Ok(())
    }

    /// Creates the transport: allocates the RX/TX pools and channels and,
    /// when `accept` is set, runs (or spawns) the accept sequence.
    pub fn init(self) -> Result<Arc<TcpTransport>, Error> {
        self.validate()?;

        let max_retry = if self.max_retry == 0 {
            DEFAULT_MAX_RETRY
        } else {
            self.max_retry
        };
        let cfg = TcpTransportCfg { max_retry, ..self };

        let (send_tx, send_rx) = mpsc::sync_channel(cfg.num_tx);
        let (recv_tx, recv_rx) = mpsc::channel();

        let transport = Arc::new(TcpTransport {
            rx_pool: Arc::new(BufferPool::new(cfg.mtu, cfg.num_rx)),
            tx_pool: Arc::new(BufferPool::new(cfg.mtu, cfg.num_tx)),
            status: Mutex::new(TcpStatus::Idle),
            stream: Mutex::new(None),
            send_tx,
            send_rx: Mutex::new(Some(send_rx)),
            recv_tx: Mutex::new(Some(recv_tx)),
            recv_rx: Mutex::new(recv_rx),
            receiver_eps: Mutex::new(Vec::new()),
            remote_eps: Mutex::new(Vec::new()),
            cfg,
        });

        if transport.cfg.accept {
            let ep_id = netutil::generate_id(&mut rand::thread_rng());
            // Recorded up front so the engine can bind endpoints to this id
            // without racing a background accept.
            transport
                .receiver_eps
                .lock()
                .expect("receiver_eps lock poisoned")
                .push(ep_id.clone());
            if transport.cfg.do_not_block_on_accept {
                let background = Arc::clone(&transport);
                thread::spawn(move || {
                    if let Err(err) = background.accept(ep_id) {
                        error!(?err, "background accept failed");
                    }
                });
            } else {
                transport.accept(ep_id)?;
            }
        }

        Ok(transport)
    }
}

/// A TCP transport bound to exactly one stream connection.
///
/// Obtain one through [`TcpTransportCfg::init`]. The transport is shared
/// between the caller and its worker threads, hence the `Arc`.
#[derive(Debug)]
pub struct TcpTransport {
    cfg: TcpTransportCfg,
    status: Mutex<TcpStatus>,
    stream: Mutex<Option<TcpStream>>,

    rx_pool: Arc<BufferPool>,
    tx_pool: Arc<BufferPool>,

    send_tx: SyncSender<Vec<u8>>,
    send_rx: Mutex<Option<Receiver<Vec<u8>>>>,
    // Dropped when the receive worker terminates, so consumers blocked on
    // the receive queue observe the closed connection.
    recv_tx: Mutex<Option<Sender<Vec<u8>>>>,
    recv_rx: Mutex<Receiver<Vec<u8>>>,

    // Local endpoint ids served by this transport, and the ids of remote
    // endpoints a handshake completed with.
    receiver_eps: Mutex<Vec<String>>,
    remote_eps: Mutex<Vec<String>>,
}

// ============================================================================
// Connection Establishment
// ============================================================================

impl TcpTransport {
    /// Accepts one inbound connection on `interface:port_low` and completes
    /// the server half of the handshake.
    ///
    /// Blocks until a peer connects, then requires the first frame to be
    /// CONNREQ, answers it with CONNACK, and starts the receive worker.
    pub fn accept(self: &Arc<Self>, ep_id: String) -> Result<(), Error> {
        if !self.cfg.accept {
            return Err(Error::InvalidState);
        }
        self.set_status(TcpStatus::Accepting);
        {
            let mut eps = self.receiver_eps.lock().expect("receiver_eps lock poisoned");
            if !eps.contains(&ep_id) {
                eps.push(ep_id);
            }
        }

        let listener = TcpListener::bind((self.cfg.interface.as_str(), self.cfg.port_low))?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "listening for a connection");

        let mut stream = loop {
            match listener.accept() {
                Ok((stream, peer_addr)) => {
                    info!(%peer_addr, "inbound connection");
                    break stream;
                }
                Err(err) => {
                    warn!(?err, "accept failed; waiting for the next connection");
                }
            }
        };

        *self.stream.lock().expect("stream lock poisoned") = Some(stream.try_clone()?);
        self.start_send_worker();

        // The connection must be fully established before the generic
        // receive worker takes over the socket.
        let mut rx = self.rx_pool.get().ok_or(Error::PoolExhausted)?;
        if let Err(err) = self.read_handshake_frame(&mut stream, &mut rx) {
            self.return_rx_logged(rx);
            return Err(err);
        }
        let tag = frame::tag(&rx);
        if tag != frame::CONNREQ {
            self.return_rx_logged(rx);
            return Err(Error::HandshakeMismatch {
                expected: frame::CONNREQ.to_string(),
                got: tag,
            });
        }
        let ack = self.handle_conn_req(&rx);
        self.return_rx_logged(rx);
        ack?;

        self.start_recv_worker(stream);
        self.set_status(TcpStatus::Connected);
        info!("connection accepted");

        Ok(())
    }

    /// Dials the remote's default port and performs the client half of the
    /// handshake. Returns the remote endpoint's id.
    pub fn connect(self: &Arc<Self>, ep_id: &str, remote_ip: &str) -> Result<String, Error> {
        debug!(remote_ip, port = self.cfg.port_low, "connecting");
        self.connect_to_port(ep_id, remote_ip, self.cfg.port_low)
    }

    /// Dials `remote_ip:port` with retries, then handshakes as `ep_id`.
    ///
    /// The delay before retry `i` is `i` seconds; after `max_retry` failed
    /// attempts the dial is abandoned.
    pub fn connect_to_port(
        self: &Arc<Self>,
        ep_id: &str,
        remote_ip: &str,
        port: u16,
    ) -> Result<String, Error> {
        self.set_status(TcpStatus::Dialing);
        let addr = format!("{remote_ip}:{port}");

        let mut attempt: u32 = 0;
        let stream = loop {
            match TcpStream::connect(&addr) {
                Ok(stream) => break stream,
                Err(err) => {
                    attempt += 1;
                    if attempt > self.cfg.max_retry {
                        self.set_status(TcpStatus::Idle);
                        return Err(Error::ConnectFailed { addr, attempts: attempt });
                    }
                    debug!(?err, attempt, "dial failed; backing off");
                    thread::sleep(Duration::from_secs(u64::from(attempt)));
                }
            }
        };
        info!(%addr, "connection succeeded, initiating handshake");

        *self.stream.lock().expect("stream lock poisoned") = Some(stream.try_clone()?);
        self.start_send_worker();

        let remote_ep = self.init_handshake(ep_id, stream.try_clone()?)?;

        self.start_recv_worker(stream);
        self.set_status(TcpStatus::Connected);
        debug!("connect completed");

        Ok(remote_ep)
    }

    /// Sends CONNREQ and synchronously waits for the CONNACK that carries
    /// the remote endpoint's id.
    fn init_handshake(&self, ep_id: &str, mut stream: TcpStream) -> Result<String, Error> {
        self.receiver_eps
            .lock()
            .expect("receiver_eps lock poisoned")
            .push(ep_id.to_string());

        let hdr = TcpHeader {
            msg_type: frame::CONNREQ.to_string(),
            src: ep_id.to_string(),
            dst: String::new(),
        };
        debug!("queuing connection request");
        self.send_msg(&hdr, &[])?;

        let mut rx = self.rx_pool.get().ok_or(Error::PoolExhausted)?;
        if let Err(err) = self.read_handshake_frame(&mut stream, &mut rx) {
            self.return_rx_logged(rx);
            return Err(err);
        }
        let tag = frame::tag(&rx);
        if tag != frame::CONNACK {
            self.return_rx_logged(rx);
            return Err(Error::HandshakeMismatch {
                expected: frame::CONNACK.to_string(),
                got: tag,
            });
        }

        let remote_ep = frame::id_str(frame::src(&rx)).to_string();
        self.remote_eps
            .lock()
            .expect("remote_eps lock poisoned")
            .push(remote_ep.clone());
        self.return_rx_logged(rx);
        debug!("handshake completed");

        Ok(remote_ep)
    }

    fn read_handshake_frame(&self, stream: &mut TcpStream, rx: &mut [u8]) -> Result<(), Error> {
        match frame::read_frame(stream, rx) {
            Ok(true) => Ok(()),
            Ok(false) => Err(Error::PeerClosed),
            Err(err) => Err(err.into()),
        }
    }
}

// ============================================================================
// Send and Receive
// ============================================================================

impl TcpTransport {
    /// Frames `payload` under `hdr` into a pooled TX buffer and queues it
    /// for the send worker.
    ///
    /// Fails with [`Error::PoolExhausted`] when no TX buffer is available
    /// and with [`Error::PayloadTooLarge`] when the payload cannot fit into
    /// one frame. Blocks only when the send channel is full.
    pub fn send_msg(&self, hdr: &TcpHeader, payload: &[u8]) -> Result<(), Error> {
        let max = self.cfg.mtu - PAYLOAD_OFFSET;
        if payload.len() > max {
            return Err(Error::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }

        let mut tx = self.tx_pool.get().ok_or(Error::PoolExhausted)?;
        if let Err(err) = frame::set_header(&mut tx, hdr) {
            self.return_tx_logged(tx);
            return Err(err);
        }
        frame::set_payload(&mut tx, payload);

        trace!(tag = %hdr.msg_type, len = payload.len(), "queuing TX");
        match self.send_tx.try_send(tx) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(tx)) => {
                // Channel depth equals the pool size, so a full channel means
                // the worker is gone or wedged; block until it drains.
                self.send_tx.send(tx).map_err(|_| Error::PeerClosed)
            }
            Err(TrySendError::Disconnected(tx)) => {
                self.return_tx_logged(tx);
                Err(Error::PeerClosed)
            }
        }
    }

    /// Queues a termination message for the remote side.
    pub fn send_term_msg(&self, src: &str, dst: &str) -> Result<(), Error> {
        let hdr = TcpHeader {
            msg_type: frame::TERMMSG.to_string(),
            src: src.to_string(),
            dst: dst.to_string(),
        };
        self.send_msg(&hdr, &[])
    }

    /// Blocks until the next DATAMSG frame is available on the receive
    /// queue. Returns `None` once the receive worker has terminated and the
    /// queue is drained.
    ///
    /// Ownership of the buffer moves to the caller, who must hand it back
    /// via [`return_rx`](Self::return_rx) once done.
    pub fn recv_rx(&self) -> Option<Vec<u8>> {
        self.recv_rx
            .lock()
            .expect("recv queue lock poisoned")
            .recv()
            .ok()
    }

    /// Like [`recv_rx`](Self::recv_rx) but never blocks.
    pub fn try_recv_rx(&self) -> Option<Vec<u8>> {
        self.recv_rx
            .lock()
            .expect("recv queue lock poisoned")
            .try_recv()
            .ok()
    }

    /// Returns a consumed RX buffer to the receive pool.
    pub fn return_rx(&self, rx: Vec<u8>) -> Result<(), Error> {
        self.rx_pool.ret(rx)
    }

    /// Whether the receive worker has terminated and closed the queue.
    /// Already-queued frames can still be drained.
    pub fn recv_queue_closed(&self) -> bool {
        self.recv_tx
            .lock()
            .expect("recv queue lock poisoned")
            .is_none()
    }

    // Hands a DATAMSG frame to the receive queue; false when the queue is
    // already closed (the RX stays with the caller).
    fn push_recv_queue(&self, rx: Vec<u8>) -> Result<(), Vec<u8>> {
        let guard = self.recv_tx.lock().expect("recv queue lock poisoned");
        match guard.as_ref() {
            Some(sender) => sender.send(rx).map_err(|err| err.0),
            None => Err(rx),
        }
    }

    // Closes the receive queue; blocked consumers wake once it drains.
    fn close_recv_queue(&self) {
        self.recv_tx.lock().expect("recv queue lock poisoned").take();
    }
}

// ============================================================================
// Teardown and Introspection
// ============================================================================

impl TcpTransport {
    /// Shuts the connection down, unblocking both workers.
    pub fn close(&self) -> Result<(), Error> {
        let guard = self.stream.lock().expect("stream lock poisoned");
        match guard.as_ref() {
            Some(stream) => stream.shutdown(Shutdown::Both)?,
            None => return Err(Error::InvalidState),
        }
        drop(guard);
        self.set_status(TcpStatus::Closed);
        Ok(())
    }

    /// Finalizes the transport: closes the connection if one is still up.
    pub fn fini(&self) -> Result<(), Error> {
        match self.close() {
            Ok(()) => Ok(()),
            Err(Error::InvalidState) => Ok(()),
            // The peer may already have torn the socket down.
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Current connection status.
    pub fn status(&self) -> TcpStatus {
        *self.status.lock().expect("status lock poisoned")
    }

    /// Whether this transport was configured to accept connections.
    pub fn is_accepting_configured(&self) -> bool {
        self.cfg.accept
    }

    /// The first local endpoint id served by this transport.
    pub fn first_receiver_ep(&self) -> Option<String> {
        self.receiver_eps
            .lock()
            .expect("receiver_eps lock poisoned")
            .first()
            .cloned()
    }

    /// The first remote endpoint id a handshake completed with.
    pub fn first_remote_ep(&self) -> Option<String> {
        self.remote_eps
            .lock()
            .expect("remote_eps lock poisoned")
            .first()
            .cloned()
    }

    /// Number of TX buffers currently available.
    pub fn tx_available(&self) -> usize {
        self.tx_pool.available()
    }

    /// Number of RX buffers currently available.
    pub fn rx_available(&self) -> usize {
        self.rx_pool.available()
    }

    fn set_status(&self, status: TcpStatus) {
        *self.status.lock().expect("status lock poisoned") = status;
    }

    fn return_rx_logged(&self, rx: Vec<u8>) {
        if let Err(err) = self.rx_pool.ret(rx) {
            error!(?err, "unable to return RX buffer");
        }
    }

    fn return_tx_logged(&self, tx: Vec<u8>) {
        if let Err(err) = self.tx_pool.ret(tx) {
            error!(?err, "unable to return TX buffer");
        }
    }
}

// ============================================================================
// Control-Message Handling
// ============================================================================

impl TcpTransport {
    // Answers a CONNREQ: records the peer and queues a CONNACK carrying the
    // local endpoint id in `src`.
    fn handle_conn_req(&self, rx: &[u8]) -> Result<(), Error> {
        let peer = frame::id_str(frame::src(rx)).to_string();
        let peer_prefix = &peer[..peer.len().min(12)];
        debug!(peer = %peer_prefix, "connection request received");

        let local = self.first_receiver_ep().unwrap_or_default();
        {
            let mut remotes = self.remote_eps.lock().expect("remote_eps lock poisoned");
            if !remotes.contains(&peer) {
                remotes.push(peer.clone());
            }
        }

        let hdr = TcpHeader {
            msg_type: frame::CONNACK.to_string(),
            src: local,
            dst: peer,
        };
        self.send_msg(&hdr, &[])
    }

    // Records the remote endpoint id a CONNACK carries in its `dst` field.
    fn handle_conn_ack(&self, rx: &[u8]) {
        let remote_ep = frame::id_str(frame::dst(rx)).to_string();
        self.remote_eps
            .lock()
            .expect("remote_eps lock poisoned")
            .push(remote_ep);
        debug!("connection fully established");
    }

    // A CONNRED redirects us to another port mid-session. The RX is
    // returned before the nested dial so the receive path holds nothing
    // across it.
    fn handle_conn_redirect(self: &Arc<Self>, rx: Vec<u8>) {
        let peer = frame::id_str(frame::src(&rx)).to_string();
        let port = frame::payload(&rx)
            .ok()
            .and_then(|p| std::str::from_utf8(p).ok())
            .and_then(|s| s.trim().parse::<u16>().ok());
        self.return_rx_logged(rx);

        let Some(port) = port else {
            error!("redirect frame without a parsable port");
            return;
        };
        info!(port, "redirected to another port");
        if let Err(err) = self.connect_to_port(&peer, &self.cfg.interface, port) {
            error!(?err, port, "redirect dial failed");
        }
    }
}

// ============================================================================
// Worker Threads
// ============================================================================

impl TcpTransport {
    // The send worker is started at most once; reconnects reuse it since it
    // always writes to the transport's current stream.
    fn start_send_worker(self: &Arc<Self>) {
        let Some(queue) = self
            .send_rx
            .lock()
            .expect("send queue lock poisoned")
            .take()
        else {
            return;
        };
        let transport = Arc::clone(self);
        thread::spawn(move || send_worker(transport, queue));
    }

    fn start_recv_worker(self: &Arc<Self>, stream: TcpStream) {
        let transport = Arc::clone(self);
        thread::spawn(move || recv_worker(transport, stream));
    }
}

fn send_worker(transport: Arc<TcpTransport>, queue: Receiver<Vec<u8>>) {
    while let Ok(tx) = queue.recv() {
        // Take a handle to the current stream, then write without holding
        // the lock: close() and redirects need it while a write is blocked.
        let stream = {
            let guard = transport.stream.lock().expect("stream lock poisoned");
            match guard.as_ref() {
                Some(stream) => stream.try_clone(),
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "no connection",
                )),
            }
        };
        let written = stream.and_then(|mut stream| std::io::Write::write_all(&mut stream, &tx));

        match written {
            Ok(()) => {
                trace!(len = tx.len(), "TX written");
                if let Err(err) = transport.tx_pool.ret(tx) {
                    error!(?err, "unable to return TX buffer");
                }
            }
            Err(err) => {
                // The TX goes back to its pool no matter how the write went.
                if let Err(ret_err) = transport.tx_pool.ret(tx) {
                    error!(?ret_err, "unable to return TX buffer");
                }
                if err.kind() == std::io::ErrorKind::WriteZero {
                    info!("connection closed; send worker terminating");
                } else {
                    warn!(?err, "write failed; send worker terminating");
                }
                transport.set_status(TcpStatus::Closed);
                return;
            }
        }
    }
    debug!("send queue closed; send worker terminating");
}

fn recv_worker(transport: Arc<TcpTransport>, mut stream: TcpStream) {
    loop {
        let Some(mut rx) = transport.rx_pool.get() else {
            error!("no RX buffer available; receive worker terminating");
            return;
        };

        match frame::read_frame(&mut stream, &mut rx) {
            Ok(true) => {}
            Ok(false) => {
                transport.return_rx_logged(rx);
                transport.set_status(TcpStatus::Closed);
                transport.close_recv_queue();
                debug!("connection closed; receive worker terminating");
                return;
            }
            Err(err) => {
                transport.return_rx_logged(rx);
                transport.set_status(TcpStatus::Closed);
                transport.close_recv_queue();
                warn!(?err, "receive failed; receive worker terminating");
                return;
            }
        }

        let tag = frame::tag(&rx);
        match tag.as_str() {
            frame::DATAMSG => {
                trace!("data message received");
                if let Err(rx) = transport.push_recv_queue(rx) {
                    transport.return_rx_logged(rx);
                    debug!("receive queue closed; receive worker terminating");
                    return;
                }
            }
            frame::CONNREQ => {
                debug!("connection request received");
                if let Err(err) = transport.handle_conn_req(&rx) {
                    error!(?err, "unable to acknowledge connection request");
                }
                transport.return_rx_logged(rx);
            }
            frame::CONNACK => {
                debug!("connection acknowledgement received");
                transport.handle_conn_ack(&rx);
                transport.return_rx_logged(rx);
            }
            frame::CONNRED => {
                debug!("connection redirect received");
                transport.handle_conn_redirect(rx);
            }
            frame::TERMMSG => {
                debug!("termination message received; receive worker terminating");
                transport.return_rx_logged(rx);
                transport.set_status(TcpStatus::Closed);
                transport.close_recv_queue();
                return;
            }
            _ => {
                let err = Error::UnsupportedMessageType(tag);
                warn!(%err, "dropping frame");
                transport.return_rx_logged(rx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_port_range_is_rejected() {
        let cfg = TcpTransportCfg {
            port_low: 5000,
            port_high: 4000,
            ..Default::default()
        };
        assert!(matches!(cfg.init(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn tiny_mtu_is_rejected() {
        let cfg = TcpTransportCfg {
            mtu: PAYLOAD_OFFSET,
            ..Default::default()
        };
        assert!(matches!(cfg.init(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn oversized_payload_is_rejected_before_touching_the_pool() {
        let cfg = TcpTransportCfg::default();
        let mtu = cfg.mtu;
        let transport = cfg.init().unwrap();

        let hdr = TcpHeader {
            msg_type: frame::DATAMSG.to_string(),
            src: String::new(),
            dst: String::new(),
        };
        let payload = vec![0u8; mtu - PAYLOAD_OFFSET + 1];
        assert!(matches!(
            transport.send_msg(&hdr, &payload),
            Err(Error::PayloadTooLarge { .. })
        ));
        assert_eq!(transport.tx_available(), DEFAULT_NUM_TX);
    }

    #[test]
    fn bad_header_returns_the_tx_buffer() {
        let transport = TcpTransportCfg {
            num_tx: 1,
            ..Default::default()
        }
        .init()
        .unwrap();

        let hdr = TcpHeader {
            msg_type: "short".to_string(),
            src: String::new(),
            dst: String::new(),
        };
        assert!(matches!(
            transport.send_msg(&hdr, b""),
            Err(Error::Framing(_))
        ));
        assert_eq!(transport.tx_available(), 1);
    }

    #[test]
    fn from_config_reads_namespaced_keys() {
        let config = Config::builder()
            .set_default("mtu", 8192i64)
            .unwrap()
            .set_default("node_a.port_low", 50010i64)
            .unwrap()
            .set_default("node_a.port_high", 50020i64)
            .unwrap()
            .set_default("node_a.accept", true)
            .unwrap()
            .build()
            .unwrap();

        let cfg = TcpTransportCfg::from_config(&config, "node_a").unwrap();
        assert_eq!(cfg.mtu, 8192);
        assert_eq!(cfg.port_low, 50010);
        assert_eq!(cfg.port_high, 50020);
        assert!(cfg.accept);
        assert_eq!(cfg.max_retry, DEFAULT_MAX_RETRY);
    }
}
