//! Ring Message Protocol
//!
//! Every datagram is a short ASCII tag, optionally followed by a payload.
//! Directory snapshots travel as JSON after the `LOBBY_UPDATE:` tag.
pub mod messages;

pub use messages::RingMessage;
