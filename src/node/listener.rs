//! Broadcast listener task.
//!
//! Receives on the broadcast channel, decodes, and forwards every message to
//! the controller. It never touches node state itself.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::commands::NodeCommand;
use crate::protocol::RingMessage;
use crate::transport::{Channel, Transport};

pub struct BroadcastListener {
    transport: Arc<dyn Transport>,
    command_tx: mpsc::Sender<NodeCommand>,
    active: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl BroadcastListener {
    pub fn new(
        transport: Arc<dyn Transport>,
        command_tx: mpsc::Sender<NodeCommand>,
        active: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            transport,
            command_tx,
            active,
            poll_interval,
        }
    }

    pub async fn run(self) {
        let local_ip = self.transport.local_ip();
        info!("[{}] Broadcast listener started", local_ip);

        while self.active.load(Ordering::Acquire) {
            let datagram = match self
                .transport
                .receive(Channel::Broadcast, self.poll_interval)
                .await
            {
                Ok(Some(datagram)) => datagram,
                Ok(None) => continue,
                Err(e) => {
                    warn!("[{}] Broadcast receive failed: {}", local_ip, e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            let message = match RingMessage::decode(&datagram.payload) {
                Ok(message) => message,
                Err(e) => {
                    debug!(
                        "[{}] Dropping broadcast from {}: {}",
                        local_ip, datagram.source, e
                    );
                    continue;
                }
            };

            let command = NodeCommand::Broadcast {
                message,
                source: datagram.source,
            };
            if self.command_tx.send(command).await.is_err() {
                // Controller is gone
                break;
            }
        }

        info!("[{}] Broadcast listener stopped", local_ip);
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::transport::MemoryNetwork;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    #[tokio::test]
    async fn test_forwards_decoded_and_drops_garbage() {
        let network = MemoryNetwork::new();
        let transport = Arc::new(network.attach(ip(1)));
        let peer = network.attach(ip(2));
        let (tx, mut rx) = mpsc::channel(16);
        let active = Arc::new(AtomicBool::new(true));

        let listener = BroadcastListener::new(
            transport,
            tx,
            active.clone(),
            Duration::from_millis(10),
        );
        let handle = tokio::spawn(listener.run());

        peer.broadcast(b"not a ring message").await.unwrap();
        peer.broadcast(b"ROCKET_FROM_2").await.unwrap();

        match rx.recv().await.unwrap() {
            NodeCommand::Broadcast { message, source } => {
                assert_eq!(message, RingMessage::RocketFrom(2.into()));
                assert_eq!(source.ip(), ip(2));
            }
            other => panic!("unexpected command {:?}", other),
        }

        active.store(false, Ordering::Release);
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
