use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// One UDP discovery datagram payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    pub kind: DiscoveryKind,
    pub peer: PeerInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryKind {
    Announce = 1,
    Goodbye = 2,
    Heartbeat = 3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub user_id: String,
    pub user_name: String,
    pub ip_address: String,
    pub port: u16,
    pub timestamp_ms: i64,
    pub os_type: String,
    pub version: String,
}

impl DiscoveryMessage {
    /// `GOODBYE` puts the peer offline; `ANNOUNCE`/`HEARTBEAT` mark it online.
    pub fn is_online(&self) -> bool {
        !matches!(self.kind, DiscoveryKind::Goodbye)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(CodecError::EncodeFailed)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        bincode::serde::decode_from_slice(buf, bincode::config::standard())
            .map(|(msg, _)| msg)
            .map_err(CodecError::MalformedPayload)
    }
}

/// Decode-and-discard; returns whether `buf` is a well-formed discovery datagram.
pub fn is_valid_discovery(buf: &[u8]) -> bool {
    DiscoveryMessage::decode(buf).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DiscoveryMessage {
        DiscoveryMessage {
            kind: DiscoveryKind::Announce,
            peer: PeerInfo {
                user_id: "u1".into(),
                user_name: "alice".into(),
                ip_address: "192.168.1.5".into(),
                port: 5555,
                timestamp_ms: 1_700_000_000_000,
                os_type: "linux".into(),
                version: "0.1.0".into(),
            },
        }
    }

    #[test]
    fn round_trip() {
        let msg = sample();
        let bytes = msg.encode().unwrap();
        let decoded = DiscoveryMessage::decode(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn goodbye_is_offline() {
        let mut msg = sample();
        msg.kind = DiscoveryKind::Goodbye;
        assert!(!msg.is_online());
        msg.kind = DiscoveryKind::Heartbeat;
        assert!(msg.is_online());
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(!is_valid_discovery(&[0xff, 0x00, 0x11]));
    }
}
