//! UDP Transport Implementation
//!
//! One socket per channel. The broadcast socket joins the configured
//! multicast group, or sends to a plain broadcast address when the group is
//! not a multicast address.
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use super::stats::{FrozenTransportStats, TransportStats};
use super::traits::{Channel, Datagram, Transport};
use crate::error::{RingError, Result};
use crate::settings::TransportConfig;
use crate::transport_error;

const MAX_DATAGRAM_SIZE: usize = 65536;

#[derive(Debug)]
pub struct UdpTransport {
    broadcast_socket: UdpSocket,
    direct_socket: UdpSocket,
    broadcast_target: SocketAddr,
    direct_port: u16,
    local_ip: IpAddr,
    stats: Arc<TransportStats>,
}

impl UdpTransport {
    /// Bind both channels. Binding failures are fatal to the caller.
    pub async fn new(config: &TransportConfig) -> Result<Self> {
        let broadcast_socket = UdpSocket::bind(config.broadcast_bind())
            .await
            .map_err(|e| bind_error("broadcast", config.broadcast_bind(), e))?;
        broadcast_socket.set_broadcast(true)?;

        if let IpAddr::V4(group) = config.broadcast_group {
            if group.is_multicast() {
                let interface = match config.bind_address {
                    IpAddr::V4(addr) => addr,
                    IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                };
                broadcast_socket.join_multicast_v4(group, interface)?;
                broadcast_socket.set_multicast_loop_v4(true)?;
                info!("Joined multicast group {} on {}", group, interface);
            }
        }

        let direct_socket = UdpSocket::bind(config.direct_bind())
            .await
            .map_err(|e| bind_error("direct", config.direct_bind(), e))?;

        // Port 0 in the config means "pick one"; peers must use what we got
        let broadcast_port = broadcast_socket.local_addr()?.port();
        let direct_port = direct_socket.local_addr()?.port();

        info!(
            "UDP transport for {} ready: broadcast {}:{}, direct port {}",
            config.advertise_ip, config.broadcast_group, broadcast_port, direct_port
        );

        Ok(Self {
            broadcast_socket,
            direct_socket,
            broadcast_target: SocketAddr::new(config.broadcast_group, broadcast_port),
            direct_port,
            local_ip: config.advertise_ip,
            stats: Arc::new(TransportStats::default()),
        })
    }

    pub fn direct_port(&self) -> u16 {
        self.direct_port
    }

    pub fn broadcast_target(&self) -> SocketAddr {
        self.broadcast_target
    }

    fn socket(&self, channel: Channel) -> &UdpSocket {
        match channel {
            Channel::Broadcast => &self.broadcast_socket,
            Channel::Direct => &self.direct_socket,
        }
    }

    async fn send_on(&self, channel: Channel, target: SocketAddr, payload: &[u8]) -> Result<()> {
        // Direct sends leave from the direct socket so the source port is well-known
        match self.socket(channel).send_to(payload, target).await {
            Ok(sent) if sent == payload.len() => {
                self.stats.record_sent();
                Ok(())
            }
            Ok(sent) => {
                self.stats.record_send_error();
                Err(transport_error!(
                    "Partial send to {}: {}/{} bytes",
                    target,
                    sent,
                    payload.len()
                ))
            }
            Err(e) => {
                self.stats.record_send_error();
                Err(transport_error!("Send on {} channel to {} failed: {}", channel, target, e))
            }
        }
    }
}

fn bind_error(channel: &str, addr: SocketAddr, e: std::io::Error) -> RingError {
    RingError::Io(std::io::Error::new(
        e.kind(),
        format!("binding {} channel on {}: {}", channel, addr, e),
    ))
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_ip(&self) -> IpAddr {
        self.local_ip
    }

    async fn broadcast(&self, payload: &[u8]) -> Result<()> {
        self.send_on(Channel::Broadcast, self.broadcast_target, payload)
            .await
    }

    async fn send_direct(&self, target: IpAddr, payload: &[u8]) -> Result<()> {
        self.send_on(
            Channel::Direct,
            SocketAddr::new(target, self.direct_port),
            payload,
        )
        .await
    }

    async fn receive(&self, channel: Channel, timeout: Duration) -> Result<Option<Datagram>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        match tokio::time::timeout(timeout, self.socket(channel).recv_from(&mut buf)).await {
            Ok(Ok((len, source))) => {
                self.stats.record_received();
                Ok(Some(Datagram {
                    payload: Bytes::copy_from_slice(&buf[..len]),
                    source,
                }))
            }
            Ok(Err(e)) => {
                self.stats.record_receive_error();
                debug!("UDP receive error on {} channel: {}", channel, e);
                Err(transport_error!("Receive on {} channel failed: {}", channel, e))
            }
            Err(_) => Ok(None),
        }
    }

    fn stats(&self) -> FrozenTransportStats {
        self.stats.freeze()
    }
}
