use thiserror::Error;

/// The error type for commkit operations.
///
/// Covers transport establishment, framing, buffer-pool accounting and
/// engine-level routing. Worker threads never propagate errors out of their
/// loop; anything a worker swallows is logged and the offending buffer is
/// returned to its pool. Everything an application-facing call can fail with
/// is a variant here.
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // I/O and Networking Errors
    // ============================================================================

    /// Low-level I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Dialing the remote address failed after every allowed attempt.
    #[error("connect to {addr} failed after {attempts} attempts")]
    ConnectFailed {
        /// The `ip:port` string that was dialed.
        addr: String,
        /// Number of dial attempts made before giving up.
        attempts: u32,
    },

    /// The peer closed the connection (zero-byte read or write).
    #[error("peer closed the connection")]
    PeerClosed,

    // ============================================================================
    // Framing and Protocol Errors
    // ============================================================================

    /// A frame could not be written or parsed: short read, malformed varint,
    /// or a message tag that is not exactly 16 bytes.
    #[error("framing error: {0}")]
    Framing(String),

    /// The payload does not fit into a frame of the configured MTU.
    #[error("payload of {len} bytes exceeds the {max}-byte frame capacity")]
    PayloadTooLarge { len: usize, max: usize },

    /// An endpoint identifier longer than the fixed header field.
    #[error("endpoint id of {len} bytes exceeds the {max}-byte header field")]
    EndpointIdTooLong { len: usize, max: usize },

    /// The first frame on a new connection was not the expected one
    /// (CONNREQ on the accepting side, CONNACK on the dialing side).
    #[error("handshake expected {expected} but received {got}")]
    HandshakeMismatch { expected: String, got: String },

    /// A frame carried a 16-byte tag this implementation does not know.
    /// Receive workers log this, return the buffer, and keep going.
    #[error("unsupported message type {0:?}")]
    UnsupportedMessageType(String),

    // ============================================================================
    // Buffer Pool Errors
    // ============================================================================

    /// No RX/TX buffer was available; the surrounding send or receive fails
    /// instead of blocking.
    #[error("buffer pool exhausted")]
    PoolExhausted,

    /// A buffer of the wrong geometry was handed back to a pool.
    #[error("returned a buffer of {len} bytes to a pool of {obj_size}-byte buffers")]
    PoolForeignBuffer { len: usize, obj_size: usize },

    /// A buffer was returned to a pool that already holds its full
    /// complement, i.e. something returned the same buffer twice.
    #[error("buffer returned to an already-full pool")]
    PoolDoubleReturn,

    // ============================================================================
    // Transport State and Routing Errors
    // ============================================================================

    /// The facade already holds a concrete transport.
    #[error("transport already holds a concrete transport")]
    AlreadySet,

    /// The operation needs a concrete transport (or an established
    /// connection) that is not there, or is not supported by the concrete
    /// transport that is.
    #[error("operation on a transport in an unusable state")]
    InvalidState,

    /// A transport configuration that cannot work (port range inverted,
    /// MTU smaller than the frame header, missing or duplicate peer ids).
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// A shared-memory send or receive named an id that matches neither
    /// configured peer.
    #[error("{0:?} does not match a configured peer")]
    UnknownPeer(String),

    /// Receive dispatch found no endpoint bound to the frame's destination.
    #[error("no endpoint bound to the destination id")]
    EndpointNotFound,

    /// Summary error from `Endpoint::disconnect`: some connections failed to
    /// close. The remaining closes were still attempted.
    #[error("failed to close {failed} of {total} connections")]
    Disconnect { failed: usize, total: usize },

    /// No local interface shares a network with the requested address.
    #[error("no local interface can reach {addr}")]
    NoRoute { addr: String },

    // ============================================================================
    // Configuration Errors
    // ============================================================================

    /// Configuration file parsing or key lookup failed.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Invalid value for the `engine_mode` configuration key.
    #[error("invalid engine mode '{got}', expected one of: minimalist, auto")]
    InvalidEngineMode { got: String },
}
