//! Causal broadcast (CBCAST) over a dynamic process group.
//!
//! Every [`Node`] keeps a vector clock and buffers incoming messages until
//! they are causally deliverable. The [`Group`] tracks membership, resizes
//! member clocks on join and leave, holds sending back until a quorum has
//! joined, and fans messages out with independent per-recipient delays.

pub mod causal;
pub mod common;
pub mod network;

pub use causal::{Group, Message, Node, NodeId, Readiness, VectorClock};
pub use common::{CbcastError, GroupConfig, Result};
pub use network::{DelayOverrides, DelayPolicy};
