/// Commands are within a single node: from the listener and the handle to
/// the controller task that owns the directory.
use std::net::SocketAddr;

use tokio::sync::oneshot;

use super::{NodeState, Role};
use crate::cluster::{Directory, NodeId};
use crate::error::Result;
use crate::protocol::RingMessage;

#[derive(Debug)]
pub enum NodeCommand {
    /// Operator asks the coordinator to freeze the lobby and inject the token
    StartRing {
        resp_chan: oneshot::Sender<Result<()>>,
    },
    /// A decoded message from the broadcast channel
    Broadcast {
        message: RingMessage,
        source: SocketAddr,
    },
    /// Snapshot of the node's view, for operators and tests
    GetStatus {
        resp_chan: oneshot::Sender<NodeStatus>,
    },
}

#[derive(Clone, Debug)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub role: Role,
    pub state: NodeState,
    pub directory: Directory,
    pub probability: f64,
}
