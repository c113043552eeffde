use std::fmt;

use sha2::{Digest as ShaDigest, Sha512};

use super::{clock::VectorClock, NodeId};
use crate::common::{
    digest::{short_hex, Digest, Hashable},
    error::{CbcastError, Result},
};

/*
    A message carries the sender's whole vector clock as it stood right after
    the send event. The snapshot is owned by the message, so later changes
    to the sender's live clock never show through. Messages are shared
    between recipients behind an Arc and never mutated.
*/

pub type Payload = Vec<u8>;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Message {
    sender: NodeId,
    timestamp: VectorClock,
    payload: Payload,
}

impl Message {
    pub fn new(sender: NodeId, timestamp: VectorClock, payload: impl Into<Payload>) -> Result<Self> {
        if !timestamp.contains(sender) {
            return Err(CbcastError::MalformedTimestamp { sender });
        }
        Ok(Message {
            sender,
            timestamp,
            payload: payload.into(),
        })
    }

    pub fn sender(&self) -> NodeId {
        self.sender
    }

    pub fn timestamp(&self) -> &VectorClock {
        &self.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Sender-local sequence number of this message.
    pub fn seq(&self) -> u64 {
        self.timestamp.get(self.sender)
    }

    pub fn digest(&self) -> Digest {
        self.hash()
    }

    /// Short hex id for log lines.
    pub fn short_id(&self) -> String {
        short_hex(&self.hash(), 4)
    }

    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

impl Hashable for Message {
    fn hash(&self) -> Digest {
        let mut hasher = Sha512::new();
        hasher.update(self.sender.to_be_bytes());
        for (id, counter) in self.timestamp.iter() {
            hasher.update(id.to_be_bytes());
            hasher.update(counter.to_be_bytes());
        }
        hasher.update(&self.payload);
        let result = hasher.finalize();
        let mut digest = [0u8; 64];
        digest.copy_from_slice(&result[..]);
        digest
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message(sender={}, timestamp={}, payload='{}')",
            self.sender,
            self.timestamp,
            self.payload_lossy()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_independent_snapshot() {
        let mut live = VectorClock::from_members([1, 2]);
        live.increment(1);

        let message = Message::new(1, live.clone(), "m").unwrap();
        live.increment(1);
        live.increment(2);

        assert_eq!(message.timestamp().get(1), 1);
        assert_eq!(message.timestamp().get(2), 0);
        assert_eq!(message.seq(), 1);
    }

    #[test]
    fn test_rejects_timestamp_without_sender() {
        let timestamp = VectorClock::from_members([2, 3]);
        let result = Message::new(1, timestamp, "m");
        assert_eq!(result, Err(CbcastError::MalformedTimestamp { sender: 1 }));
    }

    #[test]
    fn test_digest_distinguishes_timestamps() {
        let a: VectorClock = [(1, 1), (2, 0)].into_iter().collect();
        let b: VectorClock = [(1, 2), (2, 0)].into_iter().collect();
        let m1 = Message::new(1, a.clone(), "m").unwrap();
        let m2 = Message::new(1, b, "m").unwrap();
        let m3 = Message::new(1, a, "m").unwrap();

        assert_ne!(m1.digest(), m2.digest());
        assert_eq!(m1.digest(), m3.digest());
        assert_eq!(m1.short_id().len(), 8);
    }

    #[test]
    fn test_display() {
        let timestamp: VectorClock = [(1, 1), (2, 0)].into_iter().collect();
        let message = Message::new(1, timestamp, "hello").unwrap();
        assert_eq!(
            message.to_string(),
            "Message(sender=1, timestamp={1: 1, 2: 0}, payload='hello')"
        );
    }
}
