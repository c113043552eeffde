use std::{collections::HashMap, sync::Arc, time::Duration};

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::causal::{Message, Node, NodeId};
use crate::common::config::GroupConfig;

/// Fixed per-recipient delays, keyed by recipient id.
pub type DelayOverrides = HashMap<NodeId, Duration>;

/// Picks the transmission delay of one point-to-point delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DelayPolicy {
    min: Duration,
    max: Duration,
}

impl DelayPolicy {
    pub fn new(min: Duration, max: Duration) -> Self {
        DelayPolicy { min, max }
    }

    pub fn from_config(config: &GroupConfig) -> Self {
        DelayPolicy::new(config.min_delay, config.max_delay)
    }

    /// The caller-supplied delay for `recipient` if there is one, otherwise a
    /// uniform sample from the policy's range.
    pub fn delay_for(&self, recipient: NodeId, overrides: Option<&DelayOverrides>) -> Duration {
        match overrides.and_then(|delays| delays.get(&recipient)) {
            Some(delay) => *delay,
            None => self.sample(),
        }
    }

    pub fn sample(&self) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

/// Hands `message` to `target` after `delay` on a fresh task.
pub fn schedule_delivery(target: Arc<Node>, message: Arc<Message>, delay: Duration) -> JoinHandle<()> {
    debug!(
        sender = message.sender(),
        recipient = target.id(),
        msg = %message.short_id(),
        delay_ms = delay.as_millis() as u64,
        "scheduling delivery"
    );
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        target.receive(message);
    })
}
