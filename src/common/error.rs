use crate::causal::NodeId;

/// Errors surfaced by the causal broadcast core.
///
/// A message that is not yet causally deliverable is not an error: it stays
/// buffered until its prerequisites arrive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CbcastError {
    #[error("node {0} is not connected to a group")]
    NotConnected(NodeId),

    #[error("node {0} cannot send yet: group has not reached quorum")]
    NotReady(NodeId),

    #[error("node {0} has already joined a group")]
    AlreadyJoined(NodeId),

    #[error("malformed timestamp: no entry for sender {sender}")]
    MalformedTimestamp { sender: NodeId },

    #[error("invalid group config: {reason}")]
    InvalidConfig { reason: String },
}

pub type Result<T> = std::result::Result<T, CbcastError>;
