//! Transport trait for the two logical channels
//!
//! Both channels are best-effort datagram channels: nothing is acknowledged,
//! ordered or retried. Callers treat every error as recoverable.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::stats::FrozenTransportStats;
use crate::error::Result;

/// The two logical channels every node talks on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Shared by all nodes in the broadcast domain
    Broadcast,
    /// Point-to-point, addressed by IP and the well-known direct port
    Direct,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Broadcast => write!(f, "broadcast"),
            Channel::Direct => write!(f, "direct"),
        }
    }
}

/// A received datagram and where it came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Bytes,
    pub source: SocketAddr,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Address this node is registered under in the directory
    fn local_ip(&self) -> IpAddr;

    /// Best-effort send to every reachable peer on the shared channel
    async fn broadcast(&self, payload: &[u8]) -> Result<()>;

    /// Best-effort unicast to a peer's direct channel
    async fn send_direct(&self, target: IpAddr, payload: &[u8]) -> Result<()>;

    /// Next datagram on `channel`, or `None` if nothing arrived within `timeout`
    async fn receive(&self, channel: Channel, timeout: Duration) -> Result<Option<Datagram>>;

    /// Transport statistics for monitoring
    fn stats(&self) -> FrozenTransportStats;
}
