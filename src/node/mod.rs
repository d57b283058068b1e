//! Ring node runtime
//!
//! A [`RingNode`] discovers (or founds) a ring, then runs two tasks: the
//! broadcast listener, which only decodes and forwards, and the controller,
//! which owns all protocol state. Callers steer it through a [`NodeHandle`].
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{info, warn};

pub mod commands;
pub mod controller;
pub mod discovery;
pub mod listener;
pub mod ring;
pub mod stats;

use crate::cluster::{Directory, NodeId};
use crate::error::{RingError, Result};
use crate::settings::Settings;
use crate::transport::{FrozenTransportStats, Transport};
pub use commands::{NodeCommand, NodeStatus};
pub use controller::RingController;
pub use discovery::{DiscoveryEngine, DiscoveryOutcome};
pub use listener::BroadcastListener;
pub use ring::{RingState, TokenAction, TokenDecision};
pub use stats::{RoundSummary, StatisticsCollector};

const COMMAND_CHANNEL_CAPACITY: usize = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Member,
}

/// Lifecycle of a node, published on a watch channel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Init,
    Discovering,
    ElectedCoordinator,
    JoinedAsMember,
    Rejected,
    WaitingForRingStart,
    Active,
    Terminated,
}

/// Why a node stopped without error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// This node saw the quiet-round threshold and ended the ring
    ThresholdReached,
    /// Another node announced termination
    TerminateReceived,
    /// Stopped through [`NodeHandle::shutdown`]
    Shutdown,
}

/// Everything a node knows once it has stopped
#[derive(Clone, Debug)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub role: Role,
    pub termination: Termination,
    pub tokens_processed: u64,
    pub rockets_fired: u64,
    /// Rockets fired by other nodes that reached us
    pub rockets_observed: u64,
    pub final_probability: f64,
    pub directory: Directory,
    /// Round statistics; coordinator only
    pub statistics: Option<StatisticsCollector>,
    pub transport: FrozenTransportStats,
}

pub struct RingNode {
    settings: Settings,
    transport: Arc<dyn Transport>,
    active: Arc<AtomicBool>,
    command_tx: mpsc::Sender<NodeCommand>,
    command_rx: mpsc::Receiver<NodeCommand>,
    state_tx: watch::Sender<NodeState>,
}

impl std::fmt::Debug for RingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingNode")
            .field("local_ip", &self.transport.local_ip())
            .field("state", &*self.state_tx.borrow())
            .finish()
    }
}

impl RingNode {
    pub fn new(settings: Settings, transport: Arc<dyn Transport>) -> Result<(Self, NodeHandle)> {
        settings.validate()?;
        let active = Arc::new(AtomicBool::new(true));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(NodeState::Init);

        let handle = NodeHandle {
            command_tx: command_tx.clone(),
            active: active.clone(),
            state_rx,
        };
        let node = Self {
            settings,
            transport,
            active,
            command_tx,
            command_rx,
            state_tx,
        };
        Ok((node, handle))
    }

    fn set_state(&self, state: NodeState) {
        self.state_tx.send_replace(state);
    }

    /// Discover the ring, then run until termination.
    ///
    /// Errors are always fatal to this node: rejection, shutdown during
    /// discovery, or a ring that can no longer be forwarded around.
    pub async fn run(self) -> Result<NodeReport> {
        let local_ip = self.transport.local_ip();
        self.set_state(NodeState::Discovering);

        let engine = DiscoveryEngine::new(&self.settings, self.transport.clone());
        let outcome = match engine.discover(&self.active).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.active.store(false, Ordering::Release);
                self.set_state(NodeState::Terminated);
                return Err(e);
            }
        };

        let (role, node_id, directory) = match outcome {
            DiscoveryOutcome::Coordinator { directory } => {
                self.set_state(NodeState::ElectedCoordinator);
                (Role::Coordinator, NodeId::COORDINATOR, directory)
            }
            DiscoveryOutcome::Member { node_id, directory } => {
                self.set_state(NodeState::JoinedAsMember);
                (Role::Member, node_id, directory)
            }
            DiscoveryOutcome::Rejected { reason } => {
                self.active.store(false, Ordering::Release);
                self.set_state(NodeState::Rejected);
                return Err(RingError::JoinRejected(reason));
            }
            DiscoveryOutcome::Cancelled => {
                self.set_state(NodeState::Terminated);
                return Err(RingError::Concurrency(format!(
                    "{} shut down before discovery finished",
                    local_ip
                )));
            }
        };

        info!(
            "[Node<{}>] {} is {:?} (p = {}, quiet threshold = {})",
            node_id, local_ip, role, directory.fire_probability, directory.quiet_threshold
        );
        self.set_state(if directory.ring_started {
            NodeState::Active
        } else {
            NodeState::WaitingForRingStart
        });

        let RingNode {
            settings,
            transport,
            active,
            command_tx,
            command_rx,
            state_tx,
        } = self;

        // The listener holds the last internal sender; the controller sees
        // the command channel close once it and every handle are gone
        let listener = BroadcastListener::new(
            transport.clone(),
            command_tx,
            active.clone(),
            settings.poll_interval,
        );
        let listener_task = tokio::spawn(listener.run());

        let controller = RingController::new(
            &settings, transport, active, state_tx, role, node_id, directory,
        );
        let result = controller.run(command_rx).await;

        if let Err(e) = listener_task.await {
            warn!("[Node<{}>] Broadcast listener task failed: {}", node_id, e);
        }
        result
    }
}

/// Clonable remote control for a running [`RingNode`]
#[derive(Clone, Debug)]
pub struct NodeHandle {
    command_tx: mpsc::Sender<NodeCommand>,
    active: Arc<AtomicBool>,
    state_rx: watch::Receiver<NodeState>,
}

impl NodeHandle {
    /// Ask the coordinator to freeze the lobby and inject the token
    pub async fn start_ring(&self) -> Result<()> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.command_tx
            .send(NodeCommand::StartRing { resp_chan: resp_tx })
            .await?;
        resp_rx
            .await
            .map_err(|e| RingError::Concurrency(format!("No reply to start request: {}", e)))?
    }

    pub async fn status(&self) -> Result<NodeStatus> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.command_tx
            .send(NodeCommand::GetStatus { resp_chan: resp_tx })
            .await?;
        resp_rx
            .await
            .map_err(|e| RingError::Concurrency(format!("No reply to status request: {}", e)))
    }

    /// Stop cooperatively; takes effect within one poll interval
    pub fn shutdown(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn state(&self) -> NodeState {
        *self.state_rx.borrow()
    }

    /// Wait until the published state satisfies `pred`
    pub async fn wait_for_state<F>(&self, pred: F, timeout: Duration) -> Result<NodeState>
    where
        F: Fn(NodeState) -> bool,
    {
        let mut rx = self.state_rx.clone();
        let wait = async {
            loop {
                let state = *rx.borrow_and_update();
                if pred(state) {
                    return Ok(state);
                }
                rx.changed().await.map_err(|_| {
                    RingError::Concurrency(format!("Node stopped while in {:?}", state))
                })?;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(RingError::Concurrency(format!(
                "Timed out after {:?} waiting for node state, still {:?}",
                timeout,
                self.state()
            ))),
        }
    }
}
