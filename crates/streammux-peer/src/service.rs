use std::net::{IpAddr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use streammux_frame::{FrameReader, FrameWriter};
use streammux_transport as transport;
use streammux_transport::TcpTransport;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::StreamConfig;
use crate::dialer::{self, DialGate, DialSlot};
use crate::error::Result;
use crate::events::{PeerInfo, PeerLookup, StreamEvents};
use crate::handshake;
use crate::node_id::{tie_break, NodeId};
use crate::registry::{should_supersede, ConnectionRecord, ConnectionRegistry};

/// Peer stream service: owns the listener, the connection registry, and
/// every per-connection reader loop.
///
/// One instance per node. Connections are keyed by the remote's node id;
/// at most one live connection per peer exists at any instant, no matter
/// how many consumers opened it or whether both sides dialed each other
/// simultaneously.
pub struct StreamService {
    config: StreamConfig,
    registry: ConnectionRegistry,
    dials: DialGate,
    events: Arc<dyn StreamEvents>,
    peers: Arc<dyn PeerLookup>,
    shutdown: CancellationToken,
    accept_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    local_addr: SocketAddr,
    weak_self: Weak<StreamService>,
}

impl StreamService {
    /// Bind the stream listener and start accepting peer connections.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(
        config: StreamConfig,
        events: Arc<dyn StreamEvents>,
        peers: Arc<dyn PeerLookup>,
    ) -> Result<Arc<Self>> {
        let listener = TcpTransport::bind(config.bind_addr)?;
        let local_addr = listener.local_addr();

        let service = Arc::new_cyclic(|weak| Self {
            config,
            registry: ConnectionRegistry::new(),
            dials: DialGate::new(),
            events,
            peers,
            shutdown: CancellationToken::new(),
            accept_task: Mutex::new(None),
            local_addr,
            weak_self: weak.clone(),
        });

        let accept = tokio::spawn(Arc::clone(&service).accept_loop(listener));
        *service.accept_task.lock().unwrap() = Some(accept);

        Ok(service)
    }

    /// Actual bound address of the stream listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This node's id.
    pub fn local_id(&self) -> NodeId {
        self.config.local_id
    }

    /// True if a live connection to `node_id` exists.
    pub fn has_connection(&self, node_id: &NodeId) -> bool {
        self.registry.contains(node_id)
    }

    /// Number of live peer connections.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Open (or share) a stream connection to a peer.
    ///
    /// Returns true once a connection to `node_id` is established and this
    /// caller holds a usage reference on it. Concurrent calls for the same
    /// peer coalesce into a single physical dial. Dialing the local node
    /// fails immediately.
    pub async fn open_connection(&self, host: IpAddr, port: u16, node_id: NodeId) -> bool {
        let remote = SocketAddr::new(host, port);
        self.connect_to(remote, node_id, Some(self.local_addr)).await
    }

    /// Send one framed payload to a peer.
    ///
    /// Returns true only once both the length prefix and the body have been
    /// flushed. A reset connection is redialed (at most
    /// `max_send_attempts` physical attempts in total) before giving up.
    /// No record for `node_id` means false immediately.
    pub async fn send_stream(&self, node_id: NodeId, payload: &[u8]) -> bool {
        self.send_attempt(node_id, payload, 0).await
    }

    /// Release a usage reference and tear the connection down once nobody
    /// is left relying on it.
    ///
    /// With `by_user` the caller's reference is released first. Teardown
    /// only happens at zero usage; otherwise (or when no record exists)
    /// this returns false and does nothing.
    pub async fn close_stream(&self, node_id: NodeId, by_user: bool) -> bool {
        if !self.registry.contains(&node_id) {
            return false;
        }
        if by_user {
            self.registry.release_usage(&node_id);
        }
        if self.registry.usage(&node_id).unwrap_or(0) > 0 {
            return false;
        }

        let lock = self.registry.lock_for(&node_id);
        let _guard = lock.lock().await;
        let Some(record) = self.registry.remove(&node_id) else {
            return false;
        };
        debug!(node = %node_id, addr = %record.addr, "closing stream");
        record.close().await;
        true
    }

    /// The composition layer learned of a peer.
    ///
    /// With `always_connect` set, schedules a background dial when the peer
    /// advertises a stream port and no connection exists yet. Always
    /// forwards to the connected callback.
    pub fn peer_connected(&self, addr: SocketAddr, peer: &PeerInfo) {
        if self.config.always_connect && peer.node_id != self.config.local_id {
            if let Some(remote) = peer.stream_addr() {
                if !self.registry.contains(&peer.node_id) {
                    let service = self.strong();
                    let node_id = peer.node_id;
                    tokio::spawn(async move {
                        service
                            .open_connection(remote.ip(), remote.port(), node_id)
                            .await;
                    });
                }
            }
        }
        self.events.on_peer_connected(addr, peer);
    }

    /// The composition layer removed a peer: drop any connection state and
    /// forward to the disconnected callback.
    pub async fn peer_disconnected(&self, addr: SocketAddr, node_id: NodeId) {
        let lock = self.registry.lock_for(&node_id);
        {
            let _guard = lock.lock().await;
            if let Some(record) = self.registry.remove(&node_id) {
                debug!(node = %node_id, "removing connection for disconnected peer");
                record.close().await;
            }
        }
        self.events.on_peer_disconnected(addr, node_id);
    }

    /// Tear down every connection, cancel all background tasks, and fail
    /// any in-flight dials.
    pub async fn stop(&self) {
        info!("stopping stream service");
        self.shutdown.cancel();
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
        for (node_id, record) in self.registry.drain() {
            let lock = self.registry.lock_for(&node_id);
            let _guard = lock.lock().await;
            record.close().await;
        }
        self.dials.clear();
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpTransport) {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    tokio::spawn(Arc::clone(&self).handle_incoming(stream, addr));
                }
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Take an accepted transport connection through introduction and
    /// duplicate resolution, installing the winner in the registry.
    pub(crate) async fn handle_incoming(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let (mut read_half, mut write_half) = stream.into_split();

        let node_id = match handshake::read_introduction(
            &mut read_half,
            self.config.handshake_timeout,
        )
        .await
        {
            Ok(node_id) => node_id,
            Err(err) => {
                debug!(%addr, error = %err, "dropping connection without valid introduction");
                let _ = tokio::io::AsyncWriteExt::shutdown(&mut write_half).await;
                return;
            }
        };
        debug!(%addr, node = %node_id, "inbound connection introduced");

        let lock = self.registry.lock_for(&node_id);
        let _guard = lock.lock().await;

        if let Some(existing) = self.registry.opened_by_me(&node_id) {
            if should_supersede(existing, tie_break(&self.config.local_id, &node_id)) {
                debug!(node = %node_id, "inbound connection supersedes existing record");
                if let Some(old) = self.registry.remove(&node_id) {
                    old.close().await;
                }
            } else {
                debug!(node = %node_id, "keeping existing connection, dropping inbound duplicate");
                let _ = tokio::io::AsyncWriteExt::shutdown(&mut write_half).await;
                return;
            }
        }

        self.install_record(node_id, addr, read_half, write_half, -1);
    }

    /// Handle on this service for background tasks.
    fn strong(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("service outlives its borrows")
    }

    /// Open or share a connection, with the dial coalesced per node id.
    async fn connect_to(
        &self,
        remote: SocketAddr,
        node_id: NodeId,
        local: Option<SocketAddr>,
    ) -> bool {
        if node_id == self.config.local_id {
            warn!("refusing to open a stream connection to self");
            return false;
        }

        {
            let lock = self.registry.lock_for(&node_id);
            let _guard = lock.lock().await;
            if self.registry.bump_usage(&node_id) {
                debug!(node = %node_id, "reusing established connection");
                return true;
            }
        }

        match self.dials.claim(node_id) {
            DialSlot::Waiter(rx) => dialer::await_outcome(rx).await,
            DialSlot::Owner => {
                let outcome = self.dial(remote, node_id, local).await;
                self.dials.finish(&node_id, outcome);
                outcome
            }
        }
    }

    /// Perform one physical outbound connection attempt.
    async fn dial(
        &self,
        remote: SocketAddr,
        node_id: NodeId,
        local: Option<SocketAddr>,
    ) -> bool {
        let stream = match transport::connect(local, remote, self.config.dial_timeout).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!(%remote, node = %node_id, error = %err, "dial failed");
                return false;
            }
        };
        let (read_half, mut write_half) = stream.into_split();

        let lock = self.registry.lock_for(&node_id);
        let _guard = lock.lock().await;

        // The acceptor may have raced a connection in while we were dialing.
        if let Some(existing) = self.registry.opened_by_me(&node_id) {
            if should_supersede(existing, tie_break(&self.config.local_id, &node_id)) {
                debug!(node = %node_id, "dialed connection supersedes existing record");
                if let Some(old) = self.registry.remove(&node_id) {
                    old.close().await;
                }
            } else {
                debug!(node = %node_id, "keeping existing connection, discarding dialed duplicate");
                let _ = tokio::io::AsyncWriteExt::shutdown(&mut write_half).await;
                self.registry.bump_usage(&node_id);
                return true;
            }
        }

        self.install_record(node_id, remote, read_half, write_half, 1);

        // Introduce ourselves before anything else goes out on this
        // connection.
        let Some(writer) = self.registry.writer(&node_id) else {
            return false;
        };
        let introduced = {
            let mut writer = writer.lock().await;
            handshake::write_introduction(writer.get_mut(), &self.config.local_id).await
        };
        if let Err(err) = introduced {
            debug!(node = %node_id, error = %err, "failed to introduce, dropping connection");
            if let Some(record) = self.registry.remove(&node_id) {
                record.close().await;
            }
            return false;
        }

        self.registry.bump_usage(&node_id);
        debug!(node = %node_id, %remote, "outbound connection established");
        true
    }

    /// Register a connection and launch its reader loop.
    ///
    /// Caller holds the per-node lock and has already resolved duplicates.
    fn install_record(
        &self,
        node_id: NodeId,
        addr: SocketAddr,
        read_half: OwnedReadHalf,
        write_half: OwnedWriteHalf,
        opened_by_me: i8,
    ) {
        let token = self.registry.next_token();
        let cancel = self.shutdown.child_token();
        let writer = FrameWriter::with_config(write_half, self.config.frame.clone());
        let record = ConnectionRecord::new(writer, cancel.clone(), opened_by_me, token, addr);
        if let Some(old) = self.registry.insert(node_id, record) {
            tokio::spawn(old.close());
        }

        let reader = FrameReader::with_config(read_half, self.config.frame.clone());
        let task = tokio::spawn(self.strong().reader_loop(reader, node_id, addr, token, cancel));
        self.registry.attach_task(&node_id, token, task);
    }

    /// Per-connection background task: read frames and dispatch them until
    /// the connection dies or the record is replaced.
    async fn reader_loop(
        self: Arc<Self>,
        mut reader: FrameReader<OwnedReadHalf>,
        node_id: NodeId,
        addr: SocketAddr,
        token: u64,
        cancel: CancellationToken,
    ) {
        trace!(node = %node_id, token, "reader loop started");
        loop {
            // A replaced record means this loop's connection is dead or
            // handed over; stop without touching the registry.
            if self.registry.current_token(&node_id) != Some(token) {
                trace!(node = %node_id, token, "reader loop superseded");
                return;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = reader.read_frame() => result,
            };

            match result {
                Ok(payload) => {
                    let events = Arc::clone(&self.events);
                    tokio::spawn(async move {
                        let dispatch = catch_unwind(AssertUnwindSafe(|| {
                            events.on_stream(payload, node_id, addr);
                        }));
                        if dispatch.is_err() {
                            warn!(node = %node_id, "stream callback panicked");
                        }
                    });
                }
                Err(err) => {
                    debug!(node = %node_id, %addr, error = %err, "stream read failed, closing");
                    self.teardown_after_read_failure(node_id, addr, token).await;
                    return;
                }
            }
        }
    }

    async fn teardown_after_read_failure(&self, node_id: NodeId, addr: SocketAddr, token: u64) {
        let lock = self.registry.lock_for(&node_id);
        let _guard = lock.lock().await;
        if self.registry.current_token(&node_id) != Some(token) {
            return;
        }
        // This task is the record's own reader loop; detach the handle so
        // closing the record does not abort us mid-cleanup.
        self.registry.detach_task(&node_id);
        if let Some(record) = self.registry.remove(&node_id) {
            record.close().await;
        }
        self.events.on_stream_closed(node_id, addr);
    }

    async fn send_attempt(&self, node_id: NodeId, payload: &[u8], attempt: u8) -> bool {
        if attempt >= self.config.max_send_attempts {
            debug!(node = %node_id, attempt, "send attempts exhausted");
            return false;
        }

        let result = {
            let lock = self.registry.lock_for(&node_id);
            let _guard = lock.lock().await;
            let Some(writer) = self.registry.writer(&node_id) else {
                return false;
            };
            let mut writer = writer.lock().await;
            writer.send(payload).await
        };

        match result {
            Ok(()) => {
                trace!(node = %node_id, len = payload.len(), "sent stream payload");
                true
            }
            Err(err) if err.is_reset() => {
                debug!(node = %node_id, attempt, error = %err, "send hit reset connection, redialing");
                tokio::time::sleep(self.config.retry_cooldown).await;

                let Some(peer) = self.peers.get_peer(&node_id) else {
                    debug!(node = %node_id, "no peer info for redial");
                    return false;
                };
                let Some(remote) = peer.stream_addr() else {
                    debug!(node = %node_id, "peer advertises no stream address");
                    return false;
                };
                // Redial from an ephemeral port; the reader loop has had the
                // cooldown to clear the dead record.
                if !self.connect_to(remote, node_id, None).await {
                    return false;
                }
                Box::pin(self.send_attempt(node_id, payload, attempt + 1)).await
            }
            Err(err) => {
                debug!(node = %node_id, error = %err, "send failed");
                false
            }
        }
    }
}
