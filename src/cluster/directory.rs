use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::{NodeId, RingOrder};

pub const REJECT_RING_STARTED: &str = "Ring simulation already started";
pub const REJECT_LOBBY_FULL: &str = "Lobby full";
pub const REJECT_IDS_EXHAUSTED: &str = "No node identifiers left";

/// Membership snapshot owned by the coordinator and broadcast to every member.
///
/// Members never merge snapshots: a received directory replaces the local one
/// as a whole, provided its `version` is not older than what we hold.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Directory {
    pub fire_probability: f64,
    pub quiet_threshold: u32,
    pub node_addresses: BTreeMap<NodeId, IpAddr>,
    #[serde(rename = "coordinator_identifier")]
    pub coordinator_id: Option<NodeId>,
    pub ring_started: bool,
    // Snapshots from older peers carry no version; treat them as the oldest
    #[serde(default)]
    pub version: u64,
}

/// Result of a discovery request reaching the coordinator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// A fresh identifier was assigned
    Admitted(NodeId),
    /// The address was already a member; nothing changed
    AlreadyMember(NodeId),
    /// The request must be answered with a rejection
    Rejected(&'static str),
}

impl Directory {
    /// Fresh directory for a node that just declared itself coordinator
    pub fn new_coordinator(fire_probability: f64, quiet_threshold: u32, address: IpAddr) -> Self {
        let mut node_addresses = BTreeMap::new();
        node_addresses.insert(NodeId::COORDINATOR, address);
        Self {
            fire_probability,
            quiet_threshold,
            node_addresses,
            coordinator_id: Some(NodeId::COORDINATOR),
            ring_started: false,
            version: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.node_addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_addresses.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_addresses.keys().copied()
    }

    pub fn address_of(&self, node_id: NodeId) -> Option<IpAddr> {
        self.node_addresses.get(&node_id).copied()
    }

    /// Reverse lookup of an address. Duplicate addresses are unsupported;
    /// if they occur the lowest identifier wins.
    pub fn node_for_address(&self, address: IpAddr) -> Option<NodeId> {
        self.node_addresses
            .iter()
            .find(|(_, addr)| **addr == address)
            .map(|(id, _)| *id)
    }

    pub fn is_coordinator(&self, node_id: NodeId) -> bool {
        self.coordinator_id == Some(node_id)
    }

    /// Identifier the next joiner receives: one past the current maximum.
    /// `None` once the maximum is `u32::MAX`.
    pub fn next_identifier(&self) -> Option<NodeId> {
        match self.node_addresses.keys().next_back() {
            Some(max) => max.next(),
            None => Some(NodeId::COORDINATOR),
        }
    }

    /// Assign an identifier and insert the address in a single step.
    pub fn admit(&mut self, address: IpAddr, max_nodes: Option<usize>) -> Admission {
        if self.ring_started {
            return Admission::Rejected(REJECT_RING_STARTED);
        }
        if let Some(existing) = self.node_for_address(address) {
            return Admission::AlreadyMember(existing);
        }
        if max_nodes.is_some_and(|max| self.len() >= max) {
            return Admission::Rejected(REJECT_LOBBY_FULL);
        }

        let node_id = match self.next_identifier() {
            Some(node_id) => node_id,
            None => return Admission::Rejected(REJECT_IDS_EXHAUSTED),
        };
        self.node_addresses.insert(node_id, address);
        if self.coordinator_id.is_none() {
            self.coordinator_id = Some(node_id);
        }
        self.version += 1;
        Admission::Admitted(node_id)
    }

    /// Drop a member; if it was the coordinator, the lowest survivor takes over.
    pub fn remove_node(&mut self, node_id: NodeId) -> Option<IpAddr> {
        let removed = self.node_addresses.remove(&node_id)?;
        if self.coordinator_id == Some(node_id) {
            self.coordinator_id = self.node_addresses.keys().next().copied();
        }
        self.version += 1;
        Some(removed)
    }

    /// Freeze membership. Returns false if the ring was already started.
    pub fn mark_started(&mut self) -> bool {
        if self.ring_started {
            return false;
        }
        self.ring_started = true;
        self.version += 1;
        true
    }

    /// Whether `self` may replace `current` under replace-on-receipt
    pub fn supersedes(&self, current: &Directory) -> bool {
        self.version >= current.version
    }

    pub fn ring_order(&self) -> RingOrder {
        RingOrder::new(self.ids())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn test_coordinator_directory() {
        let dir = Directory::new_coordinator(0.5, 5, ip(1));
        assert_eq!(dir.len(), 1);
        assert!(dir.is_coordinator(NodeId::COORDINATOR));
        assert_eq!(dir.node_for_address(ip(1)), Some(NodeId::COORDINATOR));
        assert!(!dir.ring_started);
        assert_eq!(dir.next_identifier(), Some(NodeId::new(1)));
    }

    #[test]
    fn test_admit_assigns_max_plus_one() {
        let mut dir = Directory::new_coordinator(0.5, 5, ip(1));
        let v0 = dir.version;

        assert_eq!(dir.admit(ip(2), None), Admission::Admitted(NodeId::new(1)));
        assert_eq!(dir.admit(ip(3), None), Admission::Admitted(NodeId::new(2)));
        assert_eq!(dir.version, v0 + 2);

        // A gap left by a departed node is not reused
        dir.remove_node(NodeId::new(1));
        assert_eq!(dir.admit(ip(4), None), Admission::Admitted(NodeId::new(3)));
    }

    #[test]
    fn test_admit_duplicate_address() {
        let mut dir = Directory::new_coordinator(0.5, 5, ip(1));
        dir.admit(ip(2), None);
        let version = dir.version;

        assert_eq!(dir.admit(ip(2), None), Admission::AlreadyMember(NodeId::new(1)));
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.version, version);
    }

    #[test]
    fn test_admit_rejections() {
        let mut dir = Directory::new_coordinator(0.5, 5, ip(1));
        assert_eq!(dir.admit(ip(2), Some(2)), Admission::Admitted(NodeId::new(1)));
        assert_eq!(
            dir.admit(ip(3), Some(2)),
            Admission::Rejected(REJECT_LOBBY_FULL)
        );

        assert!(dir.mark_started());
        assert!(!dir.mark_started());
        assert_eq!(dir.admit(ip(4), None), Admission::Rejected(REJECT_RING_STARTED));
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn test_admit_when_identifiers_run_out() {
        let mut dir = Directory::new_coordinator(0.5, 5, ip(1));
        dir.node_addresses.insert(NodeId::new(u32::MAX), ip(2));
        let version = dir.version;

        assert_eq!(dir.next_identifier(), None);
        assert_eq!(dir.admit(ip(3), None), Admission::Rejected(REJECT_IDS_EXHAUSTED));
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.version, version);
    }

    #[test]
    fn test_remove_coordinator_elects_minimum() {
        let mut dir = Directory::new_coordinator(0.5, 5, ip(1));
        dir.admit(ip(2), None);
        dir.admit(ip(3), None);

        assert_eq!(dir.remove_node(NodeId::new(0)), Some(ip(1)));
        assert_eq!(dir.coordinator_id, Some(NodeId::new(1)));

        // Removing a plain member leaves the coordinator alone
        dir.remove_node(NodeId::new(2));
        assert_eq!(dir.coordinator_id, Some(NodeId::new(1)));

        dir.remove_node(NodeId::new(1));
        assert!(dir.is_empty());
        assert_eq!(dir.coordinator_id, None);
        assert_eq!(dir.remove_node(NodeId::new(1)), None);
    }

    #[test]
    fn test_supersedes() {
        let mut newer = Directory::new_coordinator(0.5, 5, ip(1));
        let older = newer.clone();
        newer.admit(ip(2), None);

        assert!(newer.supersedes(&older));
        assert!(older.supersedes(&older.clone()));
        assert!(!older.supersedes(&newer));
    }

    #[test]
    fn test_wire_field_names() {
        let dir = Directory::new_coordinator(0.25, 3, ip(1));
        let json = serde_json::to_value(&dir).unwrap();

        assert_eq!(json["fire_probability"], 0.25);
        assert_eq!(json["quiet_threshold"], 3);
        assert_eq!(json["coordinator_identifier"], 0);
        assert_eq!(json["ring_started"], false);
        assert_eq!(json["node_addresses"]["0"], "10.0.0.1");
    }

    #[test]
    fn test_unversioned_snapshot_parses() {
        let raw = r#"{"fire_probability":0.5,"quiet_threshold":5,
            "node_addresses":{"0":"10.0.0.1","1":"10.0.0.2"},
            "coordinator_identifier":0,"ring_started":true}"#;
        let dir: Directory = serde_json::from_str(raw).unwrap();
        assert_eq!(dir.version, 0);
        assert_eq!(dir.address_of(NodeId::new(1)), Some(ip(2)));
        assert!(dir.ring_started);
    }
}
