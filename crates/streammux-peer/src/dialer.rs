use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::trace;

use crate::node_id::NodeId;

/// Coalesces concurrent outbound dial attempts to the same peer.
///
/// The first caller to claim a node id becomes the owner and performs the
/// physical connection attempt; everyone else gets a receiver for the same
/// outcome. The owner must resolve the dial on every exit path (the per-node
/// watch channel carries `None` until then).
pub(crate) struct DialGate {
    pending: Mutex<HashMap<NodeId, PendingDial>>,
}

struct PendingDial {
    tx: watch::Sender<Option<bool>>,
    rx: watch::Receiver<Option<bool>>,
}

/// Outcome of claiming a dial slot.
pub(crate) enum DialSlot {
    /// This caller performs the dial and must call
    /// [`DialGate::finish`] with the outcome.
    Owner,
    /// Another dial is in flight; await its outcome.
    Waiter(watch::Receiver<Option<bool>>),
}

impl DialGate {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Claim the dial slot for `node_id`.
    pub(crate) fn claim(&self, node_id: NodeId) -> DialSlot {
        let mut pending = self.pending.lock().unwrap();
        if let Some(dial) = pending.get(&node_id) {
            trace!(node = %node_id, "joining in-flight dial");
            return DialSlot::Waiter(dial.rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        pending.insert(node_id, PendingDial { tx, rx });
        DialSlot::Owner
    }

    /// Resolve the in-flight dial for `node_id` and wake all waiters.
    pub(crate) fn finish(&self, node_id: &NodeId, outcome: bool) {
        if let Some(dial) = self.pending.lock().unwrap().remove(node_id) {
            let _ = dial.tx.send(Some(outcome));
        }
    }

    /// Fail every in-flight dial. Used on shutdown.
    pub(crate) fn clear(&self) {
        let pending: Vec<PendingDial> = {
            let mut map = self.pending.lock().unwrap();
            map.drain().map(|(_, dial)| dial).collect()
        };
        for dial in pending {
            let _ = dial.tx.send(Some(false));
        }
    }
}

/// Await the outcome of a dial someone else owns.
pub(crate) async fn await_outcome(mut rx: watch::Receiver<Option<bool>>) -> bool {
    loop {
        if let Some(outcome) = *rx.borrow_and_update() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_id::NODE_ID_LEN;

    fn id(first: u8) -> NodeId {
        let mut bytes = [0u8; NODE_ID_LEN];
        bytes[0] = first;
        NodeId::new(bytes)
    }

    #[tokio::test]
    async fn single_owner_per_node() {
        let gate = DialGate::new();
        let node = id(1);

        assert!(matches!(gate.claim(node), DialSlot::Owner));
        assert!(matches!(gate.claim(node), DialSlot::Waiter(_)));
        assert!(matches!(gate.claim(id(2)), DialSlot::Owner));
    }

    #[tokio::test]
    async fn waiters_observe_owner_outcome() {
        let gate = DialGate::new();
        let node = id(3);

        assert!(matches!(gate.claim(node), DialSlot::Owner));
        let waiters: Vec<_> = (0..4)
            .map(|_| match gate.claim(node) {
                DialSlot::Waiter(rx) => tokio::spawn(await_outcome(rx)),
                DialSlot::Owner => unreachable!("owner already claimed"),
            })
            .collect();

        gate.finish(&node, true);
        for waiter in waiters {
            assert!(waiter.await.unwrap());
        }
    }

    #[tokio::test]
    async fn slot_reopens_after_finish() {
        let gate = DialGate::new();
        let node = id(4);

        assert!(matches!(gate.claim(node), DialSlot::Owner));
        gate.finish(&node, false);
        assert!(matches!(gate.claim(node), DialSlot::Owner));
    }

    #[tokio::test]
    async fn outcome_already_set_is_observed() {
        let gate = DialGate::new();
        let node = id(5);

        assert!(matches!(gate.claim(node), DialSlot::Owner));
        let rx = match gate.claim(node) {
            DialSlot::Waiter(rx) => rx,
            DialSlot::Owner => unreachable!(),
        };
        gate.finish(&node, true);
        // The waiter subscribes only now; the resolved value must still be
        // visible.
        assert!(await_outcome(rx).await);
    }

    #[tokio::test]
    async fn clear_fails_all_waiters() {
        let gate = DialGate::new();
        let node = id(6);

        assert!(matches!(gate.claim(node), DialSlot::Owner));
        let rx = match gate.claim(node) {
            DialSlot::Waiter(rx) => rx,
            DialSlot::Owner => unreachable!(),
        };
        gate.clear();
        assert!(!await_outcome(rx).await);
    }
}
