use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use super::{message::{Message, Payload}, node::Node, NodeId};
use crate::common::{
    config::GroupConfig,
    error::{CbcastError, Result},
};
use crate::network::{schedule_delivery, DelayOverrides, DelayPolicy};

/*
    The group owns its members and keeps every member's vector clock sized
    to the current membership. Sending is locked until the group has held
    `quorum` members once; the unlock is never revoked, even if members
    leave afterwards.

    Lock order is group before node everywhere: membership changes and
    sends take the membership lock first and only then touch node state.
*/

struct Membership {
    nodes: Vec<Arc<Node>>,
    bootstrap: Option<NodeId>,
    ready: bool,
}

impl Membership {
    fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|node| node.id()).collect()
    }

    fn contains(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|node| node.id() == id)
    }
}

pub struct Group {
    config: GroupConfig,
    delays: DelayPolicy,
    membership: RwLock<Membership>,
}

impl Group {
    pub fn new() -> Arc<Self> {
        Self::build(GroupConfig::default())
    }

    pub fn with_config(config: GroupConfig) -> Result<Arc<Self>> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: GroupConfig) -> Arc<Self> {
        Arc::new(Group {
            delays: DelayPolicy::from_config(&config),
            config,
            membership: RwLock::new(Membership {
                nodes: Vec::new(),
                bootstrap: None,
                ready: false,
            }),
        })
    }

    pub fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// Adds `node`, gives it a zeroed clock over the whole membership and
    /// extends every other member's clock with its id. Reaching the quorum
    /// unlocks sending on all members. Starts the node's periodic pending
    /// sweep, so it must be called from within a Tokio runtime.
    pub fn add_member(self: &Arc<Self>, node: &Arc<Node>) -> Result<()> {
        let mut membership = self.membership.write();
        if membership.contains(node.id()) {
            return Err(CbcastError::AlreadyJoined(node.id()));
        }
        node.attach(Arc::downgrade(self))?;

        if membership.nodes.is_empty() {
            membership.bootstrap = Some(node.id());
            info!(node = node.id(), "bootstrap member");
        }
        membership.nodes.push(Arc::clone(node));

        node.initialize_clock(membership.ids());
        for member in &membership.nodes {
            member.add_clock_member(node.id());
        }
        info!(node = node.id(), members = membership.nodes.len(), "member joined");

        if membership.ready {
            node.set_send_ready();
        } else if membership.nodes.len() >= self.config.quorum {
            membership.ready = true;
            for member in &membership.nodes {
                member.set_send_ready();
            }
            info!(quorum = self.config.quorum, "quorum reached, sending unlocked");
        }
        drop(membership);

        node.start_periodic_check(self.config.recheck_interval);
        Ok(())
    }

    /// Removes `node` and drops its entry from every remaining member's
    /// clock. Returns false if this node object is not a member, even when a
    /// member with the same id exists. The removed node keeps its own clock
    /// but is detached from the group.
    pub fn remove_member(&self, node: &Node) -> bool {
        let mut membership = self.membership.write();
        let Some(position) = membership
            .nodes
            .iter()
            .position(|m| std::ptr::eq(m.as_ref(), node))
        else {
            return false;
        };
        let removed = membership.nodes.remove(position);
        removed.detach();
        for member in &membership.nodes {
            member.remove_clock_member(removed.id());
        }
        info!(node = removed.id(), members = membership.nodes.len(), "member removed");
        true
    }

    /// Member ids in join order.
    pub fn member_ids(&self) -> Vec<NodeId> {
        self.membership.read().ids()
    }

    pub fn bootstrap(&self) -> Option<NodeId> {
        self.membership.read().bootstrap
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.membership.read().contains(id)
    }

    pub fn len(&self) -> usize {
        self.membership.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.read().nodes.is_empty()
    }

    /// Whether the quorum has been reached at least once.
    pub fn is_ready(&self) -> bool {
        self.membership.read().ready
    }

    /// Schedules one delayed delivery of `message` to every member except
    /// `sender`. Returns how many deliveries were scheduled.
    pub fn multicast(
        &self,
        sender: NodeId,
        message: Arc<Message>,
        delays: Option<&DelayOverrides>,
    ) -> usize {
        let membership = self.membership.read();
        self.fan_out(&membership.nodes, sender, &message, delays)
    }

    /// Stamps and fans out under one membership read lock, so no join or
    /// leave can slip between the clock bump and the fan-out.
    pub(crate) fn send_from(
        &self,
        node: &Node,
        payload: Payload,
        delays: Option<&DelayOverrides>,
    ) -> Result<Arc<Message>> {
        let membership = self.membership.read();
        if !membership.contains(node.id()) {
            return Err(CbcastError::NotConnected(node.id()));
        }
        let message = node.stamp(payload)?;
        self.fan_out(&membership.nodes, node.id(), &message, delays);
        Ok(message)
    }

    fn fan_out(
        &self,
        members: &[Arc<Node>],
        sender: NodeId,
        message: &Arc<Message>,
        delays: Option<&DelayOverrides>,
    ) -> usize {
        let mut scheduled = 0;
        for member in members.iter().filter(|m| m.id() != sender) {
            let delay = self.delays.delay_for(member.id(), delays);
            schedule_delivery(Arc::clone(member), Arc::clone(message), delay);
            scheduled += 1;
        }
        scheduled
    }
}
