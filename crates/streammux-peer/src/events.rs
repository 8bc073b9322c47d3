use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;

use crate::node_id::NodeId;

/// What the surrounding composition layer knows about a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// The peer's node id.
    pub node_id: NodeId,
    /// The peer's host address.
    pub host: IpAddr,
    /// The TCP port the peer accepts stream connections on, if it
    /// advertises one.
    pub tcp: Option<u16>,
}

impl PeerInfo {
    /// Socket address for stream connections, when the peer is reachable.
    pub fn stream_addr(&self) -> Option<SocketAddr> {
        self.tcp.map(|port| SocketAddr::new(self.host, port))
    }
}

/// Callbacks the stream layer raises toward the composition layer.
///
/// All methods have empty default bodies so consumers only override what
/// they care about. Implementations must be cheap or hand off internally;
/// `on_stream` in particular is dispatched from a per-connection task.
pub trait StreamEvents: Send + Sync {
    /// One complete inbound frame.
    fn on_stream(&self, payload: Bytes, node_id: NodeId, addr: SocketAddr) {
        let _ = (payload, node_id, addr);
    }

    /// A peer became known to the composition layer.
    fn on_peer_connected(&self, addr: SocketAddr, peer: &PeerInfo) {
        let _ = (addr, peer);
    }

    /// A peer was removed by the composition layer.
    fn on_peer_disconnected(&self, addr: SocketAddr, node_id: NodeId) {
        let _ = (addr, node_id);
    }

    /// A stream connection was torn down after a read failure or remote
    /// close.
    fn on_stream_closed(&self, node_id: NodeId, addr: SocketAddr) {
        let _ = (node_id, addr);
    }
}

/// Resolves a node id to whatever address information is currently known.
///
/// Supplied by the composition layer; the send path uses it to find a
/// peer's current address when re-establishing a reset connection.
pub trait PeerLookup: Send + Sync {
    fn get_peer(&self, node_id: &NodeId) -> Option<PeerInfo>;
}

/// Event sink that ignores everything. For consumers that only send.
pub struct NoEvents;

impl StreamEvents for NoEvents {}
