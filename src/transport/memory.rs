//! In-process network
//!
//! A hub that connects any number of [`MemoryTransport`] endpoints, each
//! identified by an IP address. Broadcasts reach every attached endpoint,
//! the sender included, the way multicast loopback does on a real socket.
//! Used to run whole rings inside one test process.
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};

use super::stats::{FrozenTransportStats, TransportStats};
use super::traits::{Channel, Datagram, Transport};
use crate::error::Result;
use crate::settings::{STANDARD_PORT_BROADCAST, STANDARD_PORT_DIRECT};
use crate::transport_error;

type Inbox = mpsc::UnboundedSender<Datagram>;

#[derive(Debug)]
struct Endpoint {
    broadcast: Inbox,
    direct: Inbox,
}

#[derive(Clone, Debug, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<RwLock<HashMap<IpAddr, Endpoint>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug a new endpoint into the hub, replacing any previous one at `ip`
    pub fn attach(&self, ip: IpAddr) -> MemoryTransport {
        let (broadcast_tx, broadcast_rx) = mpsc::unbounded_channel();
        let (direct_tx, direct_rx) = mpsc::unbounded_channel();
        self.endpoints.write().insert(
            ip,
            Endpoint {
                broadcast: broadcast_tx,
                direct: direct_tx,
            },
        );
        MemoryTransport {
            network: self.clone(),
            local_ip: ip,
            broadcast_rx: Mutex::new(broadcast_rx),
            direct_rx: Mutex::new(direct_rx),
            stats: Arc::new(TransportStats::default()),
        }
    }

    /// Unplug an endpoint; later sends to it fail as unreachable
    pub fn detach(&self, ip: IpAddr) {
        self.endpoints.write().remove(&ip);
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    local_ip: IpAddr,
    broadcast_rx: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    direct_rx: Mutex<mpsc::UnboundedReceiver<Datagram>>,
    stats: Arc<TransportStats>,
}

impl MemoryTransport {
    fn datagram(&self, channel: Channel, payload: &[u8]) -> Datagram {
        let port = match channel {
            Channel::Broadcast => STANDARD_PORT_BROADCAST,
            Channel::Direct => STANDARD_PORT_DIRECT,
        };
        Datagram {
            payload: Bytes::copy_from_slice(payload),
            source: SocketAddr::new(self.local_ip, port),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    async fn broadcast(&self, payload: &[u8]) -> Result<()> {
        let datagram = self.datagram(Channel::Broadcast, payload);
        let endpoints = self.network.endpoints.read();
        for endpoint in endpoints.values() {
            // A closed inbox is a peer that went away mid-send; skip it
            let _ = endpoint.broadcast.send(datagram.clone());
        }
        self.stats.record_sent();
        Ok(())
    }

    async fn send_direct(&self, target: IpAddr, payload: &[u8]) -> Result<()> {
        let datagram = self.datagram(Channel::Direct, payload);
        let delivered = self
            .network
            .endpoints
            .read()
            .get(&target)
            .map(|endpoint| endpoint.direct.send(datagram).is_ok())
            .unwrap_or(false);

        if delivered {
            self.stats.record_sent();
            Ok(())
        } else {
            self.stats.record_send_error();
            Err(transport_error!("Host {} unreachable", target))
        }
    }

    async fn receive(&self, channel: Channel, timeout: Duration) -> Result<Option<Datagram>> {
        let inbox = match channel {
            Channel::Broadcast => &self.broadcast_rx,
            Channel::Direct => &self.direct_rx,
        };
        let mut rx = inbox.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(datagram)) => {
                self.stats.record_received();
                Ok(Some(datagram))
            }
            Ok(None) => {
                self.stats.record_receive_error();
                Err(transport_error!("{} inbox of {} closed", channel, self.local_ip))
            }
            Err(_) => Ok(None),
        }
    }

    fn stats(&self) -> FrozenTransportStats {
        self.stats.freeze()
    }
}
