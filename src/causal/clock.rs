use std::collections::BTreeMap;
use std::fmt;

use super::NodeId;

/*
    A vector clock maps every current group member to a counter. At node i,
    entry i counts the messages i has sent and entry j counts the messages
    from j that i has already delivered. The key set follows membership:
    joins add a zero entry, leaves drop the entry.

    Lookups of an absent key read as 0. After a member leaves, messages still
    stamped with its entry are therefore compared against 0 on receivers that
    dropped the key, which relaxes the causal check for that entry.
*/

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct VectorClock {
    entries: BTreeMap<NodeId, u64>,
}

impl VectorClock {
    pub fn new() -> Self {
        VectorClock {
            entries: BTreeMap::new(),
        }
    }

    pub fn from_members<I: IntoIterator<Item = NodeId>>(members: I) -> Self {
        VectorClock {
            entries: members.into_iter().map(|id| (id, 0)).collect(),
        }
    }

    pub fn get(&self, id: NodeId) -> u64 {
        self.entries.get(&id).copied().unwrap_or(0)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Bumps the entry for `id` and returns the new value. An absent entry
    /// starts from 0.
    pub fn increment(&mut self, id: NodeId) -> u64 {
        let counter = self.entries.entry(id).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Adds a zero entry for `id`. Existing history is never reset.
    pub fn add_member(&mut self, id: NodeId) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, 0);
        true
    }

    pub fn remove_member(&mut self, id: NodeId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Entry-wise max against `other`, restricted to keys this clock already
    /// carries. Keys only present in `other` are not adopted.
    pub fn merge_known(&mut self, other: &VectorClock) {
        for (id, counter) in self.entries.iter_mut() {
            *counter = (*counter).max(other.get(*id));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, u64)> + '_ {
        self.entries.iter().map(|(id, counter)| (*id, *counter))
    }

    pub fn members(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(NodeId, u64)> for VectorClock {
    fn from_iter<T: IntoIterator<Item = (NodeId, u64)>>(iter: T) -> Self {
        VectorClock {
            entries: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (id, counter)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", id, counter)?;
        }
        write!(f, "}}")
    }
}
