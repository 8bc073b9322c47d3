use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use streammux_frame::FrameWriter;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::node_id::NodeId;

/// Write side of a peer connection, shared with the send path.
pub(crate) type StreamWriter = FrameWriter<OwnedWriteHalf>;

/// Registry state for one physical connection to one peer.
pub(crate) struct ConnectionRecord {
    /// Exclusive write handle; all writes happen under the per-node lock.
    pub(crate) writer: Arc<AsyncMutex<StreamWriter>>,
    /// Cancels the connection's reader loop.
    pub(crate) cancel: CancellationToken,
    /// Handle of the reader loop, once attached.
    pub(crate) task: Option<JoinHandle<()>>,
    /// `+1` if this side dialed out, `-1` if it accepted.
    pub(crate) opened_by_me: i8,
    /// Number of logical senders currently relying on this connection.
    pub(crate) usage: u32,
    /// Freshness token; a reader loop holding a stale token must stop.
    pub(crate) token: u64,
    /// Remote address of the connection.
    pub(crate) addr: SocketAddr,
}

impl ConnectionRecord {
    pub(crate) fn new(
        writer: StreamWriter,
        cancel: CancellationToken,
        opened_by_me: i8,
        token: u64,
        addr: SocketAddr,
    ) -> Self {
        Self {
            writer: Arc::new(AsyncMutex::new(writer)),
            cancel,
            task: None,
            opened_by_me,
            usage: 0,
            token,
            addr,
        }
    }

    /// Cancel the reader loop and close the transport.
    ///
    /// A reader loop tearing its own record down must detach its task
    /// handle first (see [`ConnectionRegistry::detach_task`]) so it does
    /// not abort itself mid-cleanup.
    pub(crate) async fn close(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// Whether a new candidate connection supersedes the existing record.
///
/// Both peers evaluate this with their own `opened_by_me` and their own
/// side of the comparator, and converge on keeping the connection opened
/// by whichever peer has the greater node id.
pub(crate) fn should_supersede(existing_opened_by_me: i8, cmp: i8) -> bool {
    i16::from(existing_opened_by_me) * i16::from(cmp) == -1
}

/// Owns the node-id → connection mapping and the per-node-id locks.
///
/// The maps themselves are guarded by plain mutexes that are never held
/// across await points; cross-task mutual exclusion for a given node id
/// goes through [`lock_for`](Self::lock_for).
pub(crate) struct ConnectionRegistry {
    entries: Mutex<HashMap<NodeId, ConnectionRecord>>,
    locks: Mutex<HashMap<NodeId, Arc<AsyncMutex<()>>>>,
    generation: AtomicU64,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// The mutex serializing all mutation for `node_id`.
    ///
    /// Locks are created lazily and never removed, so two tasks racing to
    /// create one still end up contending on the same mutex.
    pub(crate) fn lock_for(&self, node_id: &NodeId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(*node_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Allocate a fresh freshness token.
    pub(crate) fn next_token(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn contains(&self, node_id: &NodeId) -> bool {
        self.entries.lock().unwrap().contains_key(node_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Token of the current record for `node_id`, if any.
    pub(crate) fn current_token(&self, node_id: &NodeId) -> Option<u64> {
        self.entries.lock().unwrap().get(node_id).map(|r| r.token)
    }

    pub(crate) fn opened_by_me(&self, node_id: &NodeId) -> Option<i8> {
        self.entries
            .lock()
            .unwrap()
            .get(node_id)
            .map(|r| r.opened_by_me)
    }

    /// Write handle of the current record, for use under the per-node lock.
    pub(crate) fn writer(&self, node_id: &NodeId) -> Option<Arc<AsyncMutex<StreamWriter>>> {
        self.entries
            .lock()
            .unwrap()
            .get(node_id)
            .map(|r| Arc::clone(&r.writer))
    }

    /// Install a record, replacing (and returning) any previous entry.
    ///
    /// Replacement implicitly invalidates the old record's token: reader
    /// loops check [`current_token`](Self::current_token) each iteration.
    pub(crate) fn insert(
        &self,
        node_id: NodeId,
        record: ConnectionRecord,
    ) -> Option<ConnectionRecord> {
        trace!(node = %node_id, token = record.token, "registering connection");
        self.entries.lock().unwrap().insert(node_id, record)
    }

    pub(crate) fn remove(&self, node_id: &NodeId) -> Option<ConnectionRecord> {
        self.entries.lock().unwrap().remove(node_id)
    }

    /// Attach the reader-loop handle to the record carrying `token`.
    ///
    /// A no-op when the record was already replaced, in which case the
    /// caller's task is about to observe the stale token and exit.
    pub(crate) fn attach_task(&self, node_id: &NodeId, token: u64, task: JoinHandle<()>) {
        let mut entries = self.entries.lock().unwrap();
        match entries.get_mut(node_id) {
            Some(record) if record.token == token => record.task = Some(task),
            _ => task.abort(),
        }
    }

    /// Take the reader-loop handle out of the record so a subsequent
    /// [`ConnectionRecord::close`] does not abort the calling task.
    pub(crate) fn detach_task(&self, node_id: &NodeId) {
        if let Some(record) = self.entries.lock().unwrap().get_mut(node_id) {
            record.task = None;
        }
    }

    /// Increment the usage count of an existing record. Returns false when
    /// no record exists.
    pub(crate) fn bump_usage(&self, node_id: &NodeId) -> bool {
        match self.entries.lock().unwrap().get_mut(node_id) {
            Some(record) => {
                record.usage += 1;
                true
            }
            None => false,
        }
    }

    /// Decrement the usage count, saturating at zero. Returns the
    /// remaining count, or `None` when no record exists.
    pub(crate) fn release_usage(&self, node_id: &NodeId) -> Option<u32> {
        self.entries.lock().unwrap().get_mut(node_id).map(|record| {
            record.usage = record.usage.saturating_sub(1);
            record.usage
        })
    }

    pub(crate) fn usage(&self, node_id: &NodeId) -> Option<u32> {
        self.entries.lock().unwrap().get(node_id).map(|r| r.usage)
    }

    /// Remove and return every record. Used on shutdown.
    pub(crate) fn drain(&self) -> Vec<(NodeId, ConnectionRecord)> {
        self.entries.lock().unwrap().drain().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_id::tie_break;

    fn id(first: u8) -> NodeId {
        let mut bytes = [0u8; crate::node_id::NODE_ID_LEN];
        bytes[0] = first;
        NodeId::new(bytes)
    }

    #[test]
    fn supersede_rule_truth_table() {
        // Existing dialed out (+1): superseded only when the remote id
        // orders above the local one.
        assert!(should_supersede(1, -1));
        assert!(!should_supersede(1, 1));
        // Existing accepted (-1): superseded only when the local id orders
        // above the remote one.
        assert!(should_supersede(-1, 1));
        assert!(!should_supersede(-1, -1));
        // Equal ids never supersede.
        assert!(!should_supersede(1, 0));
        assert!(!should_supersede(-1, 0));
    }

    #[test]
    fn supersede_rule_converges_for_both_peers() {
        let a = id(1);
        let b = id(2);
        // Peer A dialed out, sees B's inbound candidate.
        let a_supersedes = should_supersede(1, tie_break(&a, &b));
        // Peer B dialed out, sees A's inbound candidate.
        let b_supersedes = should_supersede(1, tie_break(&b, &a));
        // Exactly one side replaces its dialed connection: both end up on
        // the connection opened by B, the greater id.
        assert!(a_supersedes);
        assert!(!b_supersedes);
    }

    #[test]
    fn lock_for_returns_same_mutex() {
        let registry = ConnectionRegistry::new();
        let a = registry.lock_for(&id(1));
        let b = registry.lock_for(&id(1));
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.lock_for(&id(2));
        assert!(!Arc::ptr_eq(&a, &other));
    }

    #[test]
    fn tokens_are_unique_and_increasing() {
        let registry = ConnectionRegistry::new();
        let first = registry.next_token();
        let second = registry.next_token();
        assert!(second > first);
    }

    #[tokio::test]
    async fn usage_counting_saturates_at_zero() {
        let registry = ConnectionRegistry::new();
        let node = id(3);
        let record = test_record(1).await;
        registry.insert(node, record);

        assert!(registry.bump_usage(&node));
        assert!(registry.bump_usage(&node));
        assert_eq!(registry.usage(&node), Some(2));

        assert_eq!(registry.release_usage(&node), Some(1));
        assert_eq!(registry.release_usage(&node), Some(0));
        assert_eq!(registry.release_usage(&node), Some(0));

        assert!(!registry.bump_usage(&id(4)));
        assert_eq!(registry.release_usage(&id(4)), None);
    }

    #[tokio::test]
    async fn insert_replaces_and_returns_old_record() {
        let registry = ConnectionRegistry::new();
        let node = id(5);

        let first_token = registry.next_token();
        registry.insert(node, test_record(first_token).await);
        assert_eq!(registry.current_token(&node), Some(first_token));

        let second_token = registry.next_token();
        let displaced = registry.insert(node, test_record(second_token).await);
        assert_eq!(displaced.map(|r| r.token), Some(first_token));
        assert_eq!(registry.current_token(&node), Some(second_token));
        assert_eq!(registry.len(), 1);
    }

    /// Build a record over a real loopback connection.
    async fn test_record(token: u64) -> ConnectionRecord {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, _server) = tokio::join!(tokio::net::TcpStream::connect(addr), async {
            listener.accept().await.unwrap()
        });
        let (_read, write) = client.unwrap().into_split();
        ConnectionRecord::new(
            FrameWriter::new(write),
            CancellationToken::new(),
            1,
            token,
            addr,
        )
    }
}
