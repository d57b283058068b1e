//! Discovery and coordinator election.
//!
//! A starting node announces itself on the broadcast channel and waits a
//! fixed time for the coordinator's answer. A directory snapshot that lists
//! our address makes us a member, a rejection ends this node, and silence
//! makes us the coordinator of a new ring.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::cluster::{Directory, NodeId};
use crate::error::Result;
use crate::protocol::RingMessage;
use crate::settings::Settings;
use crate::transport::{Channel, Datagram, Transport};

#[derive(Clone, Debug, PartialEq)]
pub enum DiscoveryOutcome {
    /// Nobody answered; we own a fresh directory
    Coordinator { directory: Directory },
    /// An existing coordinator admitted us
    Member {
        node_id: NodeId,
        directory: Directory,
    },
    /// The coordinator refused us
    Rejected { reason: String },
    /// The node was shut down while still waiting
    Cancelled,
}

pub struct DiscoveryEngine {
    transport: Arc<dyn Transport>,
    discovery_timeout: Duration,
    election_jitter: Duration,
    poll_interval: Duration,
    fire_probability: f64,
    quiet_threshold: u32,
}

impl DiscoveryEngine {
    pub fn new(settings: &Settings, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            discovery_timeout: settings.discovery_timeout,
            election_jitter: settings.election_jitter,
            poll_interval: settings.poll_interval,
            fire_probability: settings.fire_probability,
            quiet_threshold: settings.quiet_threshold,
        }
    }

    /// Random extra wait so simultaneous starters are less likely to all self-declare
    fn jitter(&self) -> Duration {
        let max_ms = self.election_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    pub async fn discover(&self, active: &AtomicBool) -> Result<DiscoveryOutcome> {
        let local_ip = self.transport.local_ip();
        let request = RingMessage::DiscoveryRequest.encode()?;
        match self.transport.broadcast(&request).await {
            Ok(()) => info!("[{}] Announced ourselves on the broadcast channel", local_ip),
            // Still wait: if nobody heard us we simply end up coordinator
            Err(e) => warn!("[{}] Failed to send discovery request: {}", local_ip, e),
        }

        let deadline = Instant::now() + self.discovery_timeout + self.jitter();
        while active.load(Ordering::Acquire) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let wait = remaining.min(self.poll_interval);

            // Snapshots arrive on the broadcast channel, rejections point-to-point
            let received = tokio::select! {
                r = self.transport.receive(Channel::Broadcast, wait) => r,
                r = self.transport.receive(Channel::Direct, wait) => r,
            };

            match received {
                Ok(Some(datagram)) => {
                    if let Some(outcome) = self.inspect(datagram) {
                        return Ok(outcome);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("[{}] Receive failed during discovery: {}", local_ip, e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }

        if !active.load(Ordering::Acquire) {
            return Ok(DiscoveryOutcome::Cancelled);
        }

        info!(
            "[{}] No response within {:?}, claiming coordinator role with ID {}",
            local_ip,
            self.discovery_timeout,
            NodeId::COORDINATOR
        );
        Ok(DiscoveryOutcome::Coordinator {
            directory: Directory::new_coordinator(
                self.fire_probability,
                self.quiet_threshold,
                local_ip,
            ),
        })
    }

    fn inspect(&self, datagram: Datagram) -> Option<DiscoveryOutcome> {
        let local_ip = self.transport.local_ip();
        let message = match RingMessage::decode(&datagram.payload) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    "[{}] Discarding datagram from {} during discovery: {}",
                    local_ip, datagram.source, e
                );
                return None;
            }
        };

        match message {
            RingMessage::LobbyUpdate(directory) => match directory.node_for_address(local_ip) {
                Some(node_id) => {
                    info!(
                        "[{}] Joined lobby as Node {}, coordinator is Node {}",
                        local_ip,
                        node_id,
                        directory
                            .coordinator_id
                            .map(|id| id.to_string())
                            .unwrap_or_else(|| "unknown".into())
                    );
                    Some(DiscoveryOutcome::Member { node_id, directory })
                }
                None => {
                    debug!(
                        "[{}] Lobby snapshot v{} does not list us yet",
                        local_ip, directory.version
                    );
                    None
                }
            },
            RingMessage::JoinRejected { reason } => {
                warn!("[{}] Join request was rejected: {}", local_ip, reason);
                Some(DiscoveryOutcome::Rejected { reason })
            }
            other => {
                trace!(
                    "[{}] Ignoring {} from {} during discovery",
                    local_ip,
                    other.kind(),
                    datagram.source
                );
                None
            }
        }
    }
}
