use super::NodeId;

/// Cyclic order over the member identifiers.
///
/// Derived from a [`Directory`](super::Directory) and never stored on the
/// wire; rebuild it whenever the directory changes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RingOrder {
    members: Vec<NodeId>,
}

impl RingOrder {
    pub fn new(ids: impl IntoIterator<Item = NodeId>) -> Self {
        let mut members: Vec<NodeId> = ids.into_iter().collect();
        members.sort_unstable();
        members.dedup();
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[NodeId] {
        &self.members
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.members.binary_search(&node_id).is_ok()
    }

    /// Next higher identifier, wrapping to the lowest
    pub fn successor(&self, node_id: NodeId) -> Option<NodeId> {
        let idx = self.members.binary_search(&node_id).ok()?;
        self.members.get((idx + 1) % self.members.len()).copied()
    }

    /// Next lower identifier, wrapping to the highest
    pub fn predecessor(&self, node_id: NodeId) -> Option<NodeId> {
        let idx = self.members.binary_search(&node_id).ok()?;
        let len = self.members.len();
        self.members.get((idx + len - 1) % len).copied()
    }
}
