//! TCP transport for streammux peer connections.
//!
//! Provides the raw bind/accept/connect operations the higher layers build
//! on: a listening socket for inbound peers and an outbound dialer that can
//! reuse the listening port (so a peer's outbound connections originate from
//! the address it advertises) or fall back to an ephemeral port.

pub mod error;
pub mod tcp;

pub use error::{Result, TransportError};
pub use tcp::{connect, TcpTransport, DEFAULT_BACKLOG};
