//! Peer connection management and stream multiplexing for streammux.
//!
//! This is the core layer: it establishes, deduplicates, shares, and tears
//! down bidirectional TCP connections between nodes identified by opaque
//! 32-byte ids, and frames arbitrary byte payloads over them. Two peers
//! dialing each other simultaneously converge on a single connection via a
//! deterministic tie-break; multiple logical consumers share one physical
//! connection through reference counting; failed sends are retried through
//! a bounded redial.

pub mod config;
pub mod dialer;
pub mod error;
pub mod events;
pub mod handshake;
pub mod node_id;
pub mod registry;
pub mod service;

pub use config::StreamConfig;
pub use error::{PeerError, Result};
pub use events::{NoEvents, PeerInfo, PeerLookup, StreamEvents};
pub use handshake::{INTRODUCTION_LEN, INTRODUCTION_MAGIC};
pub use node_id::{tie_break, NodeId, NODE_ID_LEN};
pub use service::StreamService;
