//! Datagram Transport Module
//!
//! Unreliable send/receive over two logical channels: a broadcast channel
//! shared by every node, and a direct point-to-point channel addressed by
//! IP plus the well-known direct port. No ordering or delivery guarantees.

pub mod memory;
pub mod stats;
pub mod traits;
pub mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use stats::{FrozenTransportStats, TransportStats};
pub use traits::{Channel, Datagram, Transport};
pub use udp::UdpTransport;
