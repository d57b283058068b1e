use bytes::Bytes;

use crate::cluster::{Directory, NodeId};
use crate::error::Result;
use crate::protocol_error;
use crate::transport::Channel;

const DISCOVERY_REQUEST: &str = "DISCOVERY_REQUEST";
const LOBBY_UPDATE: &str = "LOBBY_UPDATE:";
const JOIN_REJECTED: &str = "JOIN_REJECTED:";
const ROCKET_FROM: &str = "ROCKET_FROM_";
const TERMINATE: &str = "TERMINATE";
const TOKEN: &str = "TOKEN:";

/// Every message a node sends or receives
#[derive(Clone, Debug, PartialEq)]
pub enum RingMessage {
    /// A starting node looking for a coordinator
    DiscoveryRequest,
    /// Full membership snapshot from the coordinator
    LobbyUpdate(Directory),
    /// Coordinator refused a discovery request
    JoinRejected { reason: String },
    /// A holder fired; purely observational
    RocketFrom(NodeId),
    /// The ring is finished; every node stops
    Terminate,
    /// The circulating token and its quiet-round counter
    Token { consecutive_quiet_rounds: u32 },
}

impl RingMessage {
    /// Channel this message travels on when sent by the protocol.
    ///
    /// Rejections are answered point-to-point but decoded on either channel.
    pub fn channel(&self) -> Channel {
        match self {
            RingMessage::Token { .. } | RingMessage::JoinRejected { .. } => Channel::Direct,
            _ => Channel::Broadcast,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RingMessage::DiscoveryRequest => "discovery_request",
            RingMessage::LobbyUpdate(_) => "lobby_update",
            RingMessage::JoinRejected { .. } => "join_rejected",
            RingMessage::RocketFrom(_) => "rocket",
            RingMessage::Terminate => "terminate",
            RingMessage::Token { .. } => "token",
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let text = match self {
            RingMessage::DiscoveryRequest => DISCOVERY_REQUEST.to_string(),
            RingMessage::LobbyUpdate(directory) => {
                format!("{}{}", LOBBY_UPDATE, serde_json::to_string(directory)?)
            }
            RingMessage::JoinRejected { reason } => format!("{}{}", JOIN_REJECTED, reason),
            RingMessage::RocketFrom(node_id) => format!("{}{}", ROCKET_FROM, node_id),
            RingMessage::Terminate => TERMINATE.to_string(),
            RingMessage::Token {
                consecutive_quiet_rounds,
            } => format!("{}{}", TOKEN, consecutive_quiet_rounds),
        };
        Ok(Bytes::from(text))
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| protocol_error!("datagram is not UTF-8: {}", e))?;

        if text == DISCOVERY_REQUEST {
            Ok(RingMessage::DiscoveryRequest)
        } else if text == TERMINATE {
            Ok(RingMessage::Terminate)
        } else if let Some(snapshot) = text.strip_prefix(LOBBY_UPDATE) {
            Ok(RingMessage::LobbyUpdate(serde_json::from_str(snapshot)?))
        } else if let Some(reason) = text.strip_prefix(JOIN_REJECTED) {
            Ok(RingMessage::JoinRejected {
                reason: reason.to_string(),
            })
        } else if let Some(id) = text.strip_prefix(ROCKET_FROM) {
            id.parse::<NodeId>()
                .map(RingMessage::RocketFrom)
                .map_err(|e| protocol_error!("bad rocket sender '{}': {}", id, e))
        } else if let Some(counter) = text.strip_prefix(TOKEN) {
            counter
                .parse::<u32>()
                .map(|consecutive_quiet_rounds| RingMessage::Token {
                    consecutive_quiet_rounds,
                })
                .map_err(|e| protocol_error!("bad token counter '{}': {}", counter, e))
        } else {
            let preview: String = text.chars().take(32).collect();
            Err(protocol_error!("unknown message '{}'", preview))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::error::{RingError, Severity};

    #[test]
    fn test_wire_format() {
        let cases = [
            (RingMessage::DiscoveryRequest, "DISCOVERY_REQUEST"),
            (RingMessage::Terminate, "TERMINATE"),
            (RingMessage::RocketFrom(NodeId::new(3)), "ROCKET_FROM_3"),
            (
                RingMessage::Token {
                    consecutive_quiet_rounds: 4,
                },
                "TOKEN:4",
            ),
            (
                RingMessage::JoinRejected {
                    reason: "Lobby full".into(),
                },
                "JOIN_REJECTED:Lobby full",
            ),
        ];
        for (message, wire) in cases {
            assert_eq!(message.encode().unwrap(), Bytes::from(wire));
            assert_eq!(RingMessage::decode(wire.as_bytes()).unwrap(), message);
        }
    }

    #[test]
    fn test_lobby_update_carries_directory() {
        let mut directory = Directory::new_coordinator(0.75, 4, "10.0.0.1".parse().unwrap());
        directory.admit("10.0.0.2".parse::<IpAddr>().unwrap(), None);

        let wire = RingMessage::LobbyUpdate(directory.clone()).encode().unwrap();
        assert!(wire.starts_with(b"LOBBY_UPDATE:{"));

        match RingMessage::decode(&wire).unwrap() {
            RingMessage::LobbyUpdate(decoded) => assert_eq!(decoded, directory),
            other => panic!("Wrong message type after decoding: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_messages_are_discardable() {
        for garbage in [
            &b"TOKEN:abc"[..],
            b"TOKEN:-1",
            b"ROCKET_FROM_x",
            b"LOBBY_UPDATE:{not json",
            b"HELLO",
            &[0xff, 0xfe],
        ] {
            let err = RingMessage::decode(garbage).unwrap_err();
            assert_eq!(err.severity(), Severity::Discard, "{:?}", err);
        }
        assert!(matches!(
            RingMessage::decode(b"HELLO"),
            Err(RingError::Protocol(_))
        ));
    }

    #[test]
    fn test_channels() {
        assert_eq!(
            RingMessage::Token {
                consecutive_quiet_rounds: 0
            }
            .channel(),
            Channel::Direct
        );
        assert_eq!(RingMessage::Terminate.channel(), Channel::Broadcast);
        assert_eq!(RingMessage::DiscoveryRequest.kind(), "discovery_request");
    }
}
