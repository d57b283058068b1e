//! Rocketring node settings
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::config_error;
use crate::error::Result;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_BROADCAST: u16 = 10999;
pub const DEFAULT_PORT_BROADCAST: &str = "10999";
pub const STANDARD_PORT_DIRECT: u16 = 20000;
pub const DEFAULT_PORT_DIRECT: &str = "20000";
pub const DEFAULT_BROADCAST_GROUP: &str = "224.3.29.71";

pub const DEFAULT_FIRE_PROBABILITY: f64 = 0.5;
pub const DEFAULT_QUIET_THRESHOLD: u32 = 5;

/// Everything the transport layer needs to open its two channels
#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub bind_address: IpAddr,
    pub advertise_ip: IpAddr,
    pub broadcast_group: IpAddr,
    pub broadcast_port: u16,
    pub direct_port: u16,
}

impl TransportConfig {
    pub fn broadcast_bind(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.broadcast_port)
    }

    pub fn direct_bind(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.direct_port)
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    // Local interface both sockets bind to
    pub bind_address: IpAddr,

    // Address other nodes know us by; detected when absent
    pub advertise_ip: Option<IpAddr>,

    // Multicast group (or broadcast address) of the shared channel
    pub broadcast_group: IpAddr,
    pub broadcast_port: u16,

    // Well-known port of the direct channel on every node
    pub direct_port: u16,

    // Ring-wide parameters, only used when this node becomes coordinator
    pub fire_probability: f64,
    pub quiet_threshold: u32,

    // Discovery
    pub discovery_timeout: Duration,
    pub election_jitter: Duration,

    // Ring pacing
    pub display_delay: Duration,
    pub termination_grace: Duration,
    pub ring_start_delay: Duration,
    pub poll_interval: Duration,

    // Lobby policy (coordinator only)
    pub max_nodes: Option<usize>,
    pub auto_start_nodes: Option<usize>,

    // Seed for fire decisions; entropy when absent
    pub rng_seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            advertise_ip: None,
            broadcast_group: IpAddr::V4(Ipv4Addr::new(224, 3, 29, 71)),
            broadcast_port: STANDARD_PORT_BROADCAST,
            direct_port: STANDARD_PORT_DIRECT,
            fire_probability: DEFAULT_FIRE_PROBABILITY,
            quiet_threshold: DEFAULT_QUIET_THRESHOLD,
            discovery_timeout: Duration::from_secs(10),
            election_jitter: Duration::ZERO,
            display_delay: Duration::from_millis(500),
            termination_grace: Duration::from_millis(500),
            ring_start_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(1),
            max_nodes: None,
            auto_start_nodes: None,
            rng_seed: None,
        }
    }
}

impl Settings {
    /// Reject parameter combinations the ring cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fire_probability) {
            return Err(config_error!(
                "fire probability must be within [0, 1], got {}",
                self.fire_probability
            ));
        }
        if self.quiet_threshold == 0 {
            return Err(config_error!("quiet threshold must be greater than 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(config_error!("poll interval must be greater than 0"));
        }
        if let Some(max_nodes) = self.max_nodes {
            if max_nodes == 0 {
                return Err(config_error!("max nodes must be at least 1"));
            }
            if let Some(auto_start) = self.auto_start_nodes {
                if auto_start > max_nodes {
                    return Err(config_error!(
                        "auto start at {} nodes can never happen with max nodes {}",
                        auto_start,
                        max_nodes
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            bind_address: self.bind_address,
            advertise_ip: self.advertise_ip.unwrap_or_else(detect_local_ip),
            broadcast_group: self.broadcast_group,
            broadcast_port: self.broadcast_port,
            direct_port: self.direct_port,
        }
    }
}

/// Find the address of the interface that routes off-host.
///
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn detect_local_ip() -> IpAddr {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect("10.255.255.255:1")?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
