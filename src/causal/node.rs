use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use super::{clock::VectorClock, group::Group, message::{Message, Payload}, NodeId};
use crate::common::error::{CbcastError, Result};
use crate::network::DelayOverrides;

/*
    CBCAST delivery rule. A message m from sender s is delivered at node i
    only when

        m.ts[s] == VC_i[s] + 1              (next message from s)
        m.ts[p] <= VC_i[p]   for all p != s (everything s had seen, i has seen)

    otherwise m waits in the pending buffer. Delivering m merges its
    timestamp into VC_i entry by entry, which may unblock other buffered
    messages, so the buffer is swept to a fixed point after every change.
*/

/// Outcome of testing a buffered message against the local clock.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Readiness {
    Deliverable,
    /// An earlier message from the same sender has not been delivered yet.
    OutOfOrder { expected: u64, got: u64 },
    /// The sender had seen a message from `process` that we have not.
    MissingDependency {
        process: NodeId,
        required: u64,
        observed: u64,
    },
}

impl Readiness {
    pub fn is_deliverable(&self) -> bool {
        matches!(self, Readiness::Deliverable)
    }
}

struct NodeState {
    clock: VectorClock,
    pending: Vec<Arc<Message>>,
    delivered: Vec<Arc<Message>>,
    send_ready: bool,
    group: Option<Weak<Group>>,
    joined: bool,
}

pub struct Node {
    id: NodeId,
    state: Mutex<NodeState>,
    recheck: Mutex<Option<AbortHandle>>,
}

impl NodeState {
    fn readiness(&self, message: &Message) -> Readiness {
        let sender = message.sender();

        // Per-sender FIFO
        let expected = self.clock.get(sender) + 1;
        let got = message.seq();
        if got != expected {
            return Readiness::OutOfOrder { expected, got };
        }

        // Causal catch-up
        for (process, required) in message.timestamp().iter() {
            if process == sender {
                continue;
            }
            let observed = self.clock.get(process);
            if required > observed {
                return Readiness::MissingDependency {
                    process,
                    required,
                    observed,
                };
            }
        }

        Readiness::Deliverable
    }

    fn deliver_one(&mut self, node: NodeId, position: usize) {
        let message = self.pending.swap_remove(position);
        self.clock.merge_known(message.timestamp());
        info!(
            node,
            sender = message.sender(),
            msg = %message.short_id(),
            payload = %message.payload_lossy(),
            clock = %self.clock,
            "delivered"
        );
        self.delivered.push(message);
    }

    /// Delivers until a full scan of the buffer finds nothing deliverable.
    /// Every delivery shrinks the buffer, so this terminates after at most
    /// `pending.len()` deliveries.
    fn drain(&mut self, node: NodeId) -> usize {
        let mut delivered = 0;
        while let Some(position) = self
            .pending
            .iter()
            .position(|message| self.readiness(message).is_deliverable())
        {
            self.deliver_one(node, position);
            delivered += 1;
        }

        for message in &self.pending {
            trace!(
                node,
                sender = message.sender(),
                msg = %message.short_id(),
                reason = ?self.readiness(message),
                "still pending"
            );
        }
        delivered
    }
}

impl Node {
    pub fn new(id: NodeId) -> Arc<Self> {
        Arc::new(Node {
            id,
            state: Mutex::new(NodeState {
                clock: VectorClock::new(),
                pending: Vec::new(),
                delivered: Vec::new(),
                send_ready: false,
                group: None,
                joined: false,
            }),
            recheck: Mutex::new(None),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Joins `group` and starts the periodic pending sweep.
    ///
    /// A node joins at most one group, once. Must be called from within a
    /// Tokio runtime.
    pub fn join(self: &Arc<Self>, group: &Arc<Group>) -> Result<()> {
        group.add_member(self)
    }

    pub fn send(&self, payload: impl Into<Payload>) -> Result<Arc<Message>> {
        self.send_with_delays(payload, None)
    }

    /// Like [`send`](Self::send), with fixed delays for the listed recipients.
    /// Recipients missing from `delays` get a random delay.
    pub fn send_with_delays(
        &self,
        payload: impl Into<Payload>,
        delays: Option<&DelayOverrides>,
    ) -> Result<Arc<Message>> {
        let group = self.group().ok_or_else(|| {
            warn!(node = self.id, "send rejected: not connected to a group");
            CbcastError::NotConnected(self.id)
        })?;
        group.send_from(self, payload.into(), delays)
    }

    /// Bumps the local counter and stamps a message with the clock snapshot.
    /// Called by the group with its membership lock held.
    pub(crate) fn stamp(&self, payload: Payload) -> Result<Arc<Message>> {
        let mut state = self.state.lock();
        if !state.send_ready {
            warn!(node = self.id, "send rejected: waiting for quorum");
            return Err(CbcastError::NotReady(self.id));
        }
        state.clock.increment(self.id);
        let message = Arc::new(Message::new(self.id, state.clock.clone(), payload)?);
        info!(
            node = self.id,
            msg = %message.short_id(),
            payload = %message.payload_lossy(),
            timestamp = %message.timestamp(),
            "sending"
        );
        Ok(message)
    }

    /// Entry point for deliveries from other members. Never fails: the
    /// message is buffered and delivered as soon as it is causally ready.
    pub fn receive(&self, message: Arc<Message>) {
        let mut state = self.state.lock();
        debug!(
            node = self.id,
            sender = message.sender(),
            msg = %message.short_id(),
            timestamp = %message.timestamp(),
            "received"
        );
        state.pending.push(Arc::clone(&message));
        state.drain(self.id);

        if state.pending.iter().any(|m| Arc::ptr_eq(m, &message)) {
            debug!(
                node = self.id,
                sender = message.sender(),
                msg = %message.short_id(),
                reason = ?state.readiness(&message),
                "delivery blocked"
            );
        }
    }

    pub fn readiness(&self, message: &Message) -> Readiness {
        self.state.lock().readiness(message)
    }

    pub fn can_deliver(&self, message: &Message) -> bool {
        self.readiness(message).is_deliverable()
    }

    /// Runs the pending sweep and returns how many messages it delivered.
    pub fn drain_pending(&self) -> usize {
        self.state.lock().drain(self.id)
    }

    pub(crate) fn start_periodic_check(self: &Arc<Self>, interval: Duration) {
        let node = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(node) = node.upgrade() else {
                    break;
                };
                let delivered = node.drain_pending();
                if delivered > 0 {
                    debug!(node = node.id, delivered, "periodic sweep delivered");
                }
            }
        });
        if let Some(previous) = self.recheck.lock().replace(task.abort_handle()) {
            previous.abort();
        }
    }

    /// Stops the periodic sweep. Deliveries already scheduled still land.
    pub fn shutdown(&self) {
        if let Some(task) = self.recheck.lock().take() {
            task.abort();
        }
    }

    fn group(&self) -> Option<Arc<Group>> {
        self.state.lock().group.as_ref().and_then(Weak::upgrade)
    }

    // Membership hooks, driven by the owning group.

    pub(crate) fn attach(&self, group: Weak<Group>) -> Result<()> {
        let mut state = self.state.lock();
        if state.joined {
            return Err(CbcastError::AlreadyJoined(self.id));
        }
        state.joined = true;
        state.group = Some(group);
        Ok(())
    }

    pub(crate) fn detach(&self) {
        self.state.lock().group = None;
    }

    pub(crate) fn initialize_clock<I: IntoIterator<Item = NodeId>>(&self, members: I) {
        self.state.lock().clock = VectorClock::from_members(members);
    }

    pub(crate) fn add_clock_member(&self, id: NodeId) {
        let mut state = self.state.lock();
        if state.clock.add_member(id) {
            debug!(node = self.id, member = id, clock = %state.clock, "clock extended");
        }
    }

    pub(crate) fn remove_clock_member(&self, id: NodeId) {
        let mut state = self.state.lock();
        if state.clock.remove_member(id) {
            debug!(node = self.id, member = id, clock = %state.clock, "clock shrunk");
        }
    }

    /// Buffers without sweeping; only the periodic check will pick it up.
    #[cfg(test)]
    pub(crate) fn push_pending(&self, message: Arc<Message>) {
        self.state.lock().pending.push(message);
    }

    pub(crate) fn set_send_ready(&self) {
        self.state.lock().send_ready = true;
    }

    pub fn vector_clock(&self) -> VectorClock {
        self.state.lock().clock.clone()
    }

    pub fn delivered(&self) -> Vec<Arc<Message>> {
        self.state.lock().delivered.clone()
    }

    pub fn delivered_payloads(&self) -> Vec<String> {
        self.state
            .lock()
            .delivered
            .iter()
            .map(|message| message.payload_lossy())
            .collect()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_send_ready(&self) -> bool {
        self.state.lock().send_ready
    }

    /// True while the node is linked to a live group.
    pub fn is_joined(&self) -> bool {
        self.group().is_some()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Some(task) = self.recheck.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamped(sender: NodeId, entries: &[(NodeId, u64)], payload: &str) -> Arc<Message> {
        let timestamp: VectorClock = entries.iter().copied().collect();
        Arc::new(Message::new(sender, timestamp, payload).unwrap())
    }

    fn receiver(id: NodeId, members: &[NodeId]) -> Arc<Node> {
        let node = Node::new(id);
        node.initialize_clock(members.iter().copied());
        node
    }

    #[test]
    fn test_send_before_join_is_not_connected() {
        let node = Node::new(1);
        assert_eq!(node.send("m").unwrap_err(), CbcastError::NotConnected(1));
        assert_eq!(node.is_joined(), false);
    }

    #[test]
    fn test_readiness_reports_reason() {
        let node = receiver(2, &[1, 2, 3]);

        let gap = stamped(1, &[(1, 2), (2, 0), (3, 0)], "second");
        assert_eq!(node.readiness(&gap), Readiness::OutOfOrder { expected: 1, got: 2 });

        let dependent = stamped(1, &[(1, 1), (2, 0), (3, 1)], "after m3");
        assert_eq!(
            node.readiness(&dependent),
            Readiness::MissingDependency { process: 3, required: 1, observed: 0 }
        );

        let next = stamped(1, &[(1, 1), (2, 0), (3, 0)], "first");
        assert_eq!(node.can_deliver(&next), true);
    }

    #[test]
    fn test_fifo_per_sender_despite_reordering() {
        let node = receiver(2, &[1, 2]);
        let first = stamped(1, &[(1, 1), (2, 0)], "m1");
        let second = stamped(1, &[(1, 2), (2, 0)], "m2");

        node.receive(second);
        assert_eq!(node.pending_len(), 1);
        assert!(node.delivered().is_empty());
        assert_eq!(node.vector_clock().get(1), 0);

        node.receive(first);
        assert_eq!(node.pending_len(), 0);
        assert_eq!(node.delivered_payloads(), vec!["m1", "m2"]);
        assert_eq!(node.vector_clock().get(1), 2);
    }

    #[test]
    fn test_causal_dependency_unblocks_chain() {
        let node = receiver(3, &[1, 2, 3]);
        // m from 1, m+ from 2 after delivering m, m++ from 1 after delivering m+
        let m = stamped(1, &[(1, 1), (2, 0), (3, 0)], "m");
        let m_plus = stamped(2, &[(1, 1), (2, 1), (3, 0)], "m+");
        let m_plus_plus = stamped(1, &[(1, 2), (2, 1), (3, 0)], "m++");

        node.receive(m_plus_plus);
        node.receive(m_plus);
        assert_eq!(node.pending_len(), 2);

        node.receive(m);
        assert_eq!(node.pending_len(), 0);
        assert_eq!(node.delivered_payloads(), vec!["m", "m+", "m++"]);
        assert_eq!(node.vector_clock(), [(1, 2), (2, 1), (3, 0)].into_iter().collect::<VectorClock>());
    }

    #[test]
    fn test_concurrent_messages_deliver_in_arrival_order() {
        let node = receiver(2, &[1, 2, 3]);
        let from_three = stamped(3, &[(1, 0), (2, 0), (3, 1)], "m2");
        let from_one = stamped(1, &[(1, 1), (2, 0), (3, 0)], "m1");

        node.receive(from_three);
        node.receive(from_one);

        assert_eq!(node.delivered_payloads(), vec!["m2", "m1"]);
    }

    #[test]
    fn test_missing_key_reads_as_zero() {
        // Receiver no longer tracks 4; the entry is compared against 0.
        let node = receiver(2, &[1, 2]);
        let stale = stamped(1, &[(1, 1), (2, 0), (4, 0)], "ok");
        let ahead = stamped(1, &[(1, 2), (2, 0), (4, 3)], "blocked");

        node.receive(ahead);
        node.receive(stale);

        assert_eq!(node.delivered_payloads(), vec!["ok"]);
        let blocked = Arc::clone(&node.state.lock().pending[0]);
        assert_eq!(
            node.readiness(&blocked),
            Readiness::MissingDependency { process: 4, required: 3, observed: 0 }
        );
        assert_eq!(node.vector_clock().contains(4), false);
    }

    #[test]
    fn test_drain_pending_reaches_fixed_point() {
        let node = receiver(5, &[1, 5]);
        for seq in (1..=10u64).rev() {
            node.state.lock().pending.push(stamped(1, &[(1, seq), (5, 0)], &seq.to_string()));
        }

        assert_eq!(node.drain_pending(), 10);
        assert_eq!(node.drain_pending(), 0);
        let expected: Vec<String> = (1..=10).map(|seq| seq.to_string()).collect();
        assert_eq!(node.delivered_payloads(), expected);
    }

    #[test]
    fn test_clock_never_decreases_on_merge() {
        let node = receiver(2, &[1, 2, 3]);
        node.receive(stamped(3, &[(1, 0), (2, 0), (3, 1)], "a"));
        node.receive(stamped(1, &[(1, 1), (2, 0), (3, 0)], "b"));

        let clock = node.vector_clock();
        assert_eq!(clock.get(3), 1);
        assert_eq!(clock.get(1), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_check_delivers_until_shutdown() {
        let node = receiver(2, &[1, 2]);
        node.start_periodic_check(Duration::from_secs(1));
        assert!(node.recheck.lock().is_some());

        // Let the immediate first tick pass so the buffered message can only
        // be picked up by a later one.
        tokio::time::sleep(Duration::from_millis(100)).await;
        node.push_pending(stamped(1, &[(1, 1), (2, 0)], "x"));
        assert_eq!(node.pending_len(), 1);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(node.delivered_payloads(), vec!["x"]);
        assert_eq!(node.pending_len(), 0);

        node.shutdown();
        assert!(node.recheck.lock().is_none());
        node.push_pending(stamped(1, &[(1, 2), (2, 0)], "y"));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(node.delivered_payloads(), vec!["x"]);
        assert_eq!(node.pending_len(), 1);
    }
}
