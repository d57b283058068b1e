use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::commands::{NodeCommand, NodeStatus};
use super::ring::{RingState, TokenAction};
use super::stats::StatisticsCollector;
use super::{NodeReport, NodeState, Role, Termination};
use crate::cluster::{Admission, Directory, NodeId, RingOrder};
use crate::error::{ProtocolError, RingError, Result, Severity};
use crate::protocol::RingMessage;
use crate::settings::Settings;
use crate::transport::{Channel, Datagram, Transport};

/// Pause after a transient failure so a broken socket cannot spin the loop
const ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// The protocol task of one node.
///
/// Sole owner of the directory, the local fire probability and the
/// statistics. Broadcast traffic reaches it as [`NodeCommand`]s from the
/// listener; the direct channel (tokens) is received here.
pub struct RingController {
    transport: Arc<dyn Transport>,
    active: Arc<AtomicBool>,
    state_tx: watch::Sender<NodeState>,
    role: Role,
    node_id: NodeId,
    directory: Directory,
    order: RingOrder,
    ring: RingState,
    stats: Option<StatisticsCollector>,
    rockets_observed: u64,
    rng: StdRng,
    termination: Option<Termination>,
    // timing and lobby policy
    display_delay: Duration,
    termination_grace: Duration,
    ring_start_delay: Duration,
    poll_interval: Duration,
    max_nodes: Option<usize>,
    auto_start_nodes: Option<usize>,
}

impl std::fmt::Debug for RingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingController")
            .field("node_id", &self.node_id)
            .field("role", &self.role)
            .field("members", &self.order.members())
            .field("probability", &self.ring.probability())
            .finish()
    }
}

impl RingController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        active: Arc<AtomicBool>,
        state_tx: watch::Sender<NodeState>,
        role: Role,
        node_id: NodeId,
        directory: Directory,
    ) -> Self {
        let rng = match settings.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(node_id.value()))),
            None => StdRng::from_entropy(),
        };
        let stats = match role {
            Role::Coordinator => Some(StatisticsCollector::new()),
            Role::Member => None,
        };
        Self {
            transport,
            active,
            state_tx,
            role,
            node_id,
            order: directory.ring_order(),
            ring: RingState::new(node_id, directory.fire_probability, directory.quiet_threshold),
            directory,
            stats,
            rockets_observed: 0,
            rng,
            termination: None,
            display_delay: settings.display_delay,
            termination_grace: settings.termination_grace,
            ring_start_delay: settings.ring_start_delay,
            poll_interval: settings.poll_interval,
            max_nodes: settings.max_nodes,
            auto_start_nodes: settings.auto_start_nodes,
        }
    }

    fn state(&self) -> NodeState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: NodeState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("[Node<{}>] {:?} -> {:?}", self.node_id, previous, state);
        }
    }

    fn local_ip(&self) -> IpAddr {
        self.transport.local_ip()
    }

    /// Drive the node until the ring terminates, the node is shut down or a
    /// fatal error occurs.
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<NodeCommand>) -> Result<NodeReport> {
        info!(
            "[Node<{}>] Running as {:?} in a lobby of {} node(s)",
            self.node_id,
            self.role,
            self.directory.len()
        );
        let transport = self.transport.clone();
        let poll_interval = self.poll_interval;

        if let Err(e) = self.maybe_auto_start().await {
            self.report_error(e)?;
        }

        while self.termination.is_none() {
            if !self.active.load(Ordering::Acquire) {
                info!("[Node<{}>] Shutdown requested", self.node_id);
                self.stop(Termination::Shutdown);
                break;
            }

            let result = tokio::select! {
                Some(cmd) = command_rx.recv() => self.handle_command(cmd).await,
                received = transport.receive(Channel::Direct, poll_interval) => {
                    self.handle_direct(received).await
                }
            };
            if let Err(e) = result {
                let transient = e.severity() == Severity::Transient;
                self.report_error(e)?;
                if transient {
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
        }

        // Rockets already forwarded by the listener still count
        while let Ok(cmd) = command_rx.try_recv() {
            if let NodeCommand::Broadcast {
                message: RingMessage::RocketFrom(node_id),
                ..
            } = cmd
            {
                self.record_rocket(node_id);
            }
        }

        Ok(self.into_report())
    }

    /// Log non-fatal errors and keep going; stop the node on fatal ones
    fn report_error(&mut self, e: RingError) -> Result<()> {
        match e.severity() {
            Severity::Transient => {
                warn!("[Node<{}>] {}", self.node_id, e);
                Ok(())
            }
            Severity::Discard => {
                debug!("[Node<{}>] Discarded: {}", self.node_id, e);
                Ok(())
            }
            Severity::Fatal => {
                error!("[Node<{}>] Stopping on fatal error: {}", self.node_id, e);
                self.active.store(false, Ordering::Release);
                if let Some(stats) = self.stats.as_mut() {
                    stats.finish();
                }
                self.set_state(NodeState::Terminated);
                Err(e)
            }
        }
    }

    async fn handle_command(&mut self, cmd: NodeCommand) -> Result<()> {
        match cmd {
            NodeCommand::StartRing { resp_chan } => {
                let result = self.start_ring().await;
                let started = result.is_ok();
                if resp_chan.send(result).is_err() {
                    debug!("[Node<{}>] Start requester went away", self.node_id);
                }
                if started {
                    self.inject_token().await?;
                }
                Ok(())
            }
            NodeCommand::Broadcast { message, source } => {
                self.handle_broadcast(message, source).await
            }
            NodeCommand::GetStatus { resp_chan } => {
                let status = NodeStatus {
                    node_id: self.node_id,
                    role: self.role,
                    state: self.state(),
                    directory: self.directory.clone(),
                    probability: self.ring.probability(),
                };
                if resp_chan.send(status).is_err() {
                    debug!("[Node<{}>] Status requester went away", self.node_id);
                }
                Ok(())
            }
        }
    }

    async fn handle_broadcast(&mut self, message: RingMessage, source: SocketAddr) -> Result<()> {
        match message {
            RingMessage::DiscoveryRequest => self.handle_discovery_request(source.ip()).await,
            RingMessage::LobbyUpdate(directory) => self.handle_lobby_update(directory),
            RingMessage::RocketFrom(node_id) => {
                self.record_rocket(node_id);
                Ok(())
            }
            RingMessage::Terminate => {
                info!(
                    "[Node<{}>] Termination announced by {}",
                    self.node_id,
                    source.ip()
                );
                self.stop(Termination::TerminateReceived);
                Ok(())
            }
            RingMessage::JoinRejected { reason } => {
                trace!(
                    "[Node<{}>] Ignoring rejection meant for another node: {}",
                    self.node_id,
                    reason
                );
                Ok(())
            }
            RingMessage::Token { .. } => Err(ProtocolError::OutOfPhase(format!(
                "token from {} on the broadcast channel",
                source
            ))
            .into()),
        }
    }

    fn record_rocket(&mut self, node_id: NodeId) {
        if node_id == self.node_id {
            return;
        }
        self.rockets_observed += 1;
        if let Some(stats) = self.stats.as_mut() {
            stats.record_observed_fire();
        }
        info!("[Node<{}>] Saw a rocket from Node {}", self.node_id, node_id);
    }

    async fn handle_discovery_request(&mut self, requester: IpAddr) -> Result<()> {
        if self.role != Role::Coordinator {
            return Ok(());
        }
        if requester == self.local_ip() {
            trace!("[Node<{}>] Own discovery request echoed", self.node_id);
            return Ok(());
        }

        match self.directory.admit(requester, self.max_nodes) {
            Admission::Admitted(node_id) => {
                self.order = self.directory.ring_order();
                info!(
                    "[Node<{}>] Admitted {} as Node {}, lobby now has {} node(s)",
                    self.node_id,
                    requester,
                    node_id,
                    self.directory.len()
                );
                self.broadcast_directory().await;
                self.maybe_auto_start().await
            }
            Admission::AlreadyMember(node_id) => {
                debug!(
                    "[Node<{}>] {} is already Node {}, resending lobby",
                    self.node_id, requester, node_id
                );
                self.broadcast_directory().await;
                Ok(())
            }
            Admission::Rejected(reason) => {
                info!(
                    "[Node<{}>] Rejecting {}: {}",
                    self.node_id, requester, reason
                );
                let payload = RingMessage::JoinRejected {
                    reason: reason.to_string(),
                }
                .encode()?;
                self.transport.send_direct(requester, &payload).await
            }
        }
    }

    fn handle_lobby_update(&mut self, directory: Directory) -> Result<()> {
        if self.role == Role::Coordinator {
            trace!("[Node<{}>] Own lobby snapshot echoed", self.node_id);
            return Ok(());
        }
        if self.state() == NodeState::Active {
            // Membership is frozen once the ring runs
            return Ok(());
        }
        if !directory.supersedes(&self.directory) {
            return Err(ProtocolError::OutOfPhase(format!(
                "stale lobby snapshot v{} (holding v{})",
                directory.version, self.directory.version
            ))
            .into());
        }
        let node_id = directory.node_for_address(self.local_ip()).ok_or_else(|| {
            ProtocolError::OutOfPhase(format!(
                "lobby snapshot v{} does not list {}",
                directory.version,
                self.local_ip()
            ))
        })?;

        if node_id != self.node_id {
            warn!(
                "[Node<{}>] Directory now lists us as Node {}",
                self.node_id, node_id
            );
        }
        self.node_id = node_id;
        self.ring.reconfigure(
            node_id,
            directory.fire_probability,
            directory.quiet_threshold,
        );
        self.order = directory.ring_order();
        self.directory = directory;
        debug!(
            "[Node<{}>] Lobby v{}: {:?}",
            self.node_id,
            self.directory.version,
            self.order.members()
        );

        if self.directory.ring_started {
            info!(
                "[Node<{}>] Ring started with {} nodes, successor is Node {}",
                self.node_id,
                self.order.len(),
                self.order
                    .successor(self.node_id)
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "unknown".into())
            );
            self.set_state(NodeState::Active);
        }
        Ok(())
    }

    /// Start automatically once the lobby holds the configured number of nodes
    async fn maybe_auto_start(&mut self) -> Result<()> {
        let expected = match self.auto_start_nodes {
            Some(expected) => expected,
            None => return Ok(()),
        };
        if self.role != Role::Coordinator
            || self.directory.ring_started
            || self.directory.len() < expected
        {
            return Ok(());
        }
        info!(
            "[Node<{}>] Lobby reached {} node(s), starting ring",
            self.node_id, expected
        );
        self.start_ring().await?;
        self.inject_token().await
    }

    /// Freeze the lobby and tell every member the ring is running
    async fn start_ring(&mut self) -> Result<()> {
        if self.role != Role::Coordinator {
            return Err(ProtocolError::OutOfPhase(
                "only the coordinator can start the ring".to_string(),
            )
            .into());
        }
        if !self.directory.mark_started() {
            return Err(ProtocolError::OutOfPhase("ring already started".to_string()).into());
        }
        self.order = self.directory.ring_order();
        info!(
            "[Node<{}>] Starting ring with {} node(s): {:?}",
            self.node_id,
            self.order.len(),
            self.order.members()
        );
        // Members only learn of the start from this snapshot
        self.broadcast_directory().await;
        self.set_state(NodeState::Active);
        Ok(())
    }

    async fn inject_token(&mut self) -> Result<()> {
        tokio::time::sleep(self.ring_start_delay).await;
        if !self.active.load(Ordering::Acquire) {
            return Ok(());
        }
        if let Some(stats) = self.stats.as_mut() {
            stats.start(Instant::now());
        }
        info!("[Node<{}>] Injecting token", self.node_id);
        self.forward_token(0).await
    }

    async fn handle_direct(&mut self, received: Result<Option<Datagram>>) -> Result<()> {
        let datagram = match received? {
            Some(datagram) => datagram,
            None => return Ok(()),
        };
        match RingMessage::decode(&datagram.payload)? {
            RingMessage::Token {
                consecutive_quiet_rounds,
            } => {
                self.handle_token(consecutive_quiet_rounds, datagram.source)
                    .await
            }
            RingMessage::JoinRejected { reason } => {
                debug!(
                    "[Node<{}>] Late rejection from {}: {}",
                    self.node_id, datagram.source, reason
                );
                Ok(())
            }
            other => Err(ProtocolError::OutOfPhase(format!(
                "{} from {} on the direct channel",
                other.kind(),
                datagram.source
            ))
            .into()),
        }
    }

    async fn handle_token(&mut self, consecutive_quiet_rounds: u32, source: SocketAddr) -> Result<()> {
        if self.state() != NodeState::Active {
            info!(
                "[Node<{}>] Token from {} before the ring started, discarding",
                self.node_id, source
            );
            return Ok(());
        }
        let expected = self
            .order
            .predecessor(self.node_id)
            .and_then(|id| self.directory.address_of(id));
        if expected != Some(source.ip()) {
            return Err(ProtocolError::UnexpectedSender(format!(
                "token from {}, expected {:?}",
                source, expected
            ))
            .into());
        }

        if let Some(stats) = self.stats.as_mut() {
            stats.record_token_receipt(Instant::now());
        }
        let draw: f64 = self.rng.gen();
        let decision = self.ring.process_token(consecutive_quiet_rounds, draw);

        if decision.fired {
            info!(
                "[Node<{}>] Fired a rocket (p = {:.4})",
                self.node_id, decision.probability
            );
            if let Some(stats) = self.stats.as_mut() {
                stats.record_own_fire();
            }
            self.broadcast(RingMessage::RocketFrom(self.node_id)).await;
            tokio::time::sleep(self.display_delay).await;
        } else {
            debug!(
                "[Node<{}>] Held fire (p = {:.4}, draw = {:.4})",
                self.node_id, decision.probability, draw
            );
        }

        match decision.action {
            TokenAction::Forward {
                consecutive_quiet_rounds,
            } => self.forward_token(consecutive_quiet_rounds).await,
            TokenAction::Terminate {
                consecutive_quiet_rounds,
            } => {
                info!(
                    "[Node<{}>] {} quiet rounds in a row, terminating the ring",
                    self.node_id, consecutive_quiet_rounds
                );
                self.broadcast(RingMessage::Terminate).await;
                tokio::time::sleep(self.termination_grace).await;
                self.stop(Termination::ThresholdReached);
                Ok(())
            }
        }
    }

    async fn forward_token(&mut self, consecutive_quiet_rounds: u32) -> Result<()> {
        let successor = self.order.successor(self.node_id).ok_or_else(|| {
            RingError::MembershipExhausted(format!(
                "Node {} has no successor in {:?}",
                self.node_id,
                self.order.members()
            ))
        })?;
        let address = self.directory.address_of(successor).ok_or_else(|| {
            RingError::MembershipExhausted(format!("no address for successor Node {}", successor))
        })?;

        let payload = RingMessage::Token {
            consecutive_quiet_rounds,
        }
        .encode()?;
        trace!(
            "[Node<{}>] Token ({}) -> Node {} at {}",
            self.node_id,
            consecutive_quiet_rounds,
            successor,
            address
        );
        self.transport.send_direct(address, &payload).await
    }

    async fn broadcast_directory(&mut self) {
        self.broadcast(RingMessage::LobbyUpdate(self.directory.clone()))
            .await;
    }

    /// Broadcast failures are logged and otherwise ignored
    async fn broadcast(&self, message: RingMessage) {
        let result = match message.encode() {
            Ok(payload) => self.transport.broadcast(&payload).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(
                "[Node<{}>] Failed to broadcast {}: {}",
                self.node_id,
                message.kind(),
                e
            );
        }
    }

    fn stop(&mut self, termination: Termination) {
        if self.termination.is_none() {
            self.termination = Some(termination);
        }
        self.active.store(false, Ordering::Release);
        if let Some(stats) = self.stats.as_mut() {
            stats.finish();
        }
        self.set_state(NodeState::Terminated);
    }

    fn into_report(self) -> NodeReport {
        NodeReport {
            node_id: self.node_id,
            role: self.role,
            termination: self.termination.unwrap_or(Termination::Shutdown),
            tokens_processed: self.ring.tokens_processed(),
            rockets_fired: self.ring.rockets_fired(),
            rockets_observed: self.rockets_observed,
            final_probability: self.ring.probability(),
            transport: self.transport.stats(),
            directory: self.directory,
            statistics: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    fn quick_settings() -> Settings {
        Settings {
            fire_probability: 0.0,
            quiet_threshold: 3,
            display_delay: Duration::ZERO,
            termination_grace: Duration::ZERO,
            ring_start_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(20),
            rng_seed: Some(7),
            ..Settings::default()
        }
    }

    fn coordinator(network: &MemoryNetwork, settings: &Settings) -> RingController {
        let transport: Arc<dyn Transport> = Arc::new(network.attach(ip(1)));
        let directory = Directory::new_coordinator(
            settings.fire_probability,
            settings.quiet_threshold,
            ip(1),
        );
        let (state_tx, _) = watch::channel(NodeState::WaitingForRingStart);
        RingController::new(
            settings,
            transport,
            Arc::new(AtomicBool::new(true)),
            state_tx,
            Role::Coordinator,
            NodeId::COORDINATOR,
            directory,
        )
    }

    #[tokio::test]
    async fn test_discovery_request_admits_and_broadcasts() {
        let network = MemoryNetwork::new();
        let settings = quick_settings();
        let mut controller = coordinator(&network, &settings);
        let joiner = network.attach(ip(2));

        let source = SocketAddr::new(ip(2), 10999);
        controller
            .handle_broadcast(RingMessage::DiscoveryRequest, source)
            .await
            .unwrap();
        assert_eq!(controller.directory.node_for_address(ip(2)), Some(NodeId::new(1)));
        assert_eq!(controller.order.len(), 2);

        let datagram = joiner
            .receive(Channel::Broadcast, Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        match RingMessage::decode(&datagram.payload).unwrap() {
            RingMessage::LobbyUpdate(directory) => assert_eq!(directory.len(), 2),
            other => panic!("unexpected {:?}", other),
        }

        // A repeated request resends without a second identifier
        controller
            .handle_broadcast(RingMessage::DiscoveryRequest, source)
            .await
            .unwrap();
        assert_eq!(controller.directory.len(), 2);
    }

    #[tokio::test]
    async fn test_late_joiner_gets_unicast_rejection() {
        let network = MemoryNetwork::new();
        let settings = quick_settings();
        let mut controller = coordinator(&network, &settings);
        let late = network.attach(ip(9));

        controller.start_ring().await.unwrap();
        controller
            .handle_broadcast(RingMessage::DiscoveryRequest, SocketAddr::new(ip(9), 10999))
            .await
            .unwrap();
        assert_eq!(controller.directory.len(), 1);

        let datagram = late
            .receive(Channel::Direct, Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            RingMessage::decode(&datagram.payload).unwrap(),
            RingMessage::JoinRejected {
                reason: "Ring simulation already started".into()
            }
        );
    }

    #[tokio::test]
    async fn test_single_node_ring_terminates_alone() {
        let network = MemoryNetwork::new();
        let settings = quick_settings();
        let mut controller = coordinator(&network, &settings);

        controller.start_ring().await.unwrap();
        controller.inject_token().await.unwrap();

        // The token loops back to ourselves until the threshold is hit
        for _ in 0..settings.quiet_threshold {
            let received = controller
                .transport
                .receive(Channel::Direct, Duration::from_millis(50))
                .await;
            controller.handle_direct(received).await.unwrap();
        }
        assert_eq!(controller.termination, Some(Termination::ThresholdReached));
        assert_eq!(controller.state(), NodeState::Terminated);

        let report = controller.into_report();
        assert_eq!(report.tokens_processed, 3);
        assert_eq!(report.rockets_fired, 0);
        assert_eq!(report.statistics.unwrap().total_rounds(), 3);
    }

    #[tokio::test]
    async fn test_token_from_stranger_is_discarded() {
        let network = MemoryNetwork::new();
        let settings = quick_settings();
        let mut controller = coordinator(&network, &settings);
        controller.start_ring().await.unwrap();

        let datagram = Datagram {
            payload: RingMessage::Token {
                consecutive_quiet_rounds: 0,
            }
            .encode()
            .unwrap(),
            source: SocketAddr::new(ip(5), 20000),
        };
        let err = controller.handle_direct(Ok(Some(datagram))).await.unwrap_err();
        assert_eq!(err.severity(), Severity::Discard);
        assert_eq!(controller.ring.tokens_processed(), 0);
    }

    #[tokio::test]
    async fn test_member_ignores_stale_snapshot() {
        let network = MemoryNetwork::new();
        let settings = quick_settings();
        let transport: Arc<dyn Transport> = Arc::new(network.attach(ip(2)));

        let mut newer = Directory::new_coordinator(0.5, 4, ip(1));
        let older = newer.clone();
        newer.admit(ip(2), None);
        newer.admit(ip(3), None);

        let (state_tx, _) = watch::channel(NodeState::WaitingForRingStart);
        let mut member = RingController::new(
            &settings,
            transport,
            Arc::new(AtomicBool::new(true)),
            state_tx,
            Role::Member,
            NodeId::new(1),
            newer.clone(),
        );

        let err = member.handle_lobby_update(older).unwrap_err();
        assert_eq!(err.severity(), Severity::Discard);
        assert_eq!(member.directory, newer);

        let mut started = newer.clone();
        started.mark_started();
        member.handle_lobby_update(started).unwrap();
        assert_eq!(member.state(), NodeState::Active);
        assert_eq!(member.order.successor(member.node_id), Some(NodeId::new(2)));
    }

    fn waiting_member(network: &MemoryNetwork, settings: &Settings) -> RingController {
        let transport: Arc<dyn Transport> = Arc::new(network.attach(ip(2)));
        let mut directory = Directory::new_coordinator(0.5, 4, ip(1));
        directory.admit(ip(2), None);
        let (state_tx, _) = watch::channel(NodeState::WaitingForRingStart);
        RingController::new(
            settings,
            transport,
            Arc::new(AtomicBool::new(true)),
            state_tx,
            Role::Member,
            NodeId::new(1),
            directory,
        )
    }

    #[tokio::test]
    async fn test_token_before_ring_start_is_dropped() {
        let network = MemoryNetwork::new();
        let settings = quick_settings();
        let mut member = waiting_member(&network, &settings);

        // Sent by the rightful predecessor, but the start snapshot never arrived
        let datagram = Datagram {
            payload: RingMessage::Token {
                consecutive_quiet_rounds: 0,
            }
            .encode()
            .unwrap(),
            source: SocketAddr::new(ip(1), 10998),
        };
        member.handle_direct(Ok(Some(datagram))).await.unwrap();
        assert_eq!(member.ring.tokens_processed(), 0);
        assert_eq!(member.state(), NodeState::WaitingForRingStart);
        assert_eq!(member.transport.stats().datagrams_sent, 0);
    }

    #[tokio::test]
    async fn test_own_rocket_echo_is_not_counted() {
        let network = MemoryNetwork::new();
        let settings = quick_settings();
        let mut controller = coordinator(&network, &settings);
        let own = SocketAddr::new(ip(1), 10999);

        controller
            .handle_broadcast(RingMessage::RocketFrom(NodeId::COORDINATOR), own)
            .await
            .unwrap();
        assert_eq!(controller.rockets_observed, 0);
        assert_eq!(controller.stats.as_ref().unwrap().fires_observed(), 0);

        let peer = SocketAddr::new(ip(5), 10999);
        controller
            .handle_broadcast(RingMessage::RocketFrom(NodeId::new(4)), peer)
            .await
            .unwrap();
        assert_eq!(controller.rockets_observed, 1);
        assert_eq!(controller.stats.as_ref().unwrap().fires_observed(), 1);
    }

    #[tokio::test]
    async fn test_own_discovery_request_echo_is_ignored() {
        let network = MemoryNetwork::new();
        let settings = quick_settings();
        let mut controller = coordinator(&network, &settings);
        let peer = network.attach(ip(2));
        let before = controller.directory.clone();

        controller
            .handle_broadcast(RingMessage::DiscoveryRequest, SocketAddr::new(ip(1), 10999))
            .await
            .unwrap();
        assert_eq!(controller.directory, before);
        assert_eq!(controller.order.len(), 1);

        // No lobby snapshot goes out for our own request
        let heard = peer
            .receive(Channel::Broadcast, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(heard.is_none());
    }

    #[tokio::test]
    async fn test_failing_receive_backs_off() {
        let network = MemoryNetwork::new();
        let settings = Settings {
            poll_interval: Duration::from_millis(100),
            ..quick_settings()
        };
        let controller = coordinator(&network, &settings);
        let active = controller.active.clone();
        let (_command_tx, command_rx) = mpsc::channel(8);
        let task = tokio::spawn(controller.run(command_rx));

        // Dropping the endpoint closes the direct inbox for good
        network.detach(ip(1));
        tokio::time::sleep(Duration::from_millis(200)).await;
        active.store(false, Ordering::Release);

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.termination, Termination::Shutdown);
        let errors = report.transport.receive_errors;
        assert!(errors > 0);
        assert!(errors < 100, "{} receive errors in 200ms", errors);
    }
}
