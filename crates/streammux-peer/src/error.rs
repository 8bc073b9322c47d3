/// Errors that can occur in peer operations.
///
/// These stay inside the crate: the public `connect`/`send` operations
/// report failure as boolean results, and remote disconnects surface
/// through the event callbacks.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] streammux_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] streammux_frame::FrameError),

    /// The peer did not introduce itself within the handshake timeout.
    #[error("peer did not introduce itself in time")]
    HandshakeTimeout,

    /// The introduction block was malformed.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(&'static str),

    /// Attempted to open a connection to the local node itself.
    #[error("refusing to connect to self")]
    SelfConnection,

    /// An I/O error occurred outside framed reads/writes.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PeerError>;
