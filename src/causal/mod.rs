pub mod clock;
pub mod group;
pub mod message;
pub mod node;

pub use clock::*;
pub use group::*;
pub use message::*;
pub use node::*;

/// Process identifier. Only uniqueness within a group matters.
pub type NodeId = u64;
