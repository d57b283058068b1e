use serde::{Deserialize, Serialize};

/// Identifier of a ring member, assigned by the coordinator during discovery
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, PartialOrd, Ord, Eq, Hash,
)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// The coordinator always holds the first identifier
    pub const COORDINATOR: NodeId = NodeId(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// The identifier handed to the next joiner after this one, if any is left
    pub fn next(&self) -> Option<NodeId> {
        self.0.checked_add(1).map(NodeId)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        NodeId(id)
    }
}

impl std::str::FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>().map(NodeId)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
