use lattice_types::Block;
use serde::{Deserialize, Serialize};

use crate::asc_pull::{AscPullAck, AscPullReq};
use crate::bootstrap::{
    BulkPull, BulkPullAccount, BulkPullAccountResp, BulkPullResp, BulkPush, FrontierReq,
    FrontierResp,
};
use crate::confirm::{ConfirmAck, ConfirmReq};
use crate::handshake::NodeIdHandshake;
use crate::keepalive::Keepalive;
use crate::telemetry::TelemetryData;

/// A block flooded to the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publish {
    pub block: Block,
    /// Set by the node that created the block.
    pub is_originator: bool,
}

impl Publish {
    pub fn new(block: Block) -> Self {
        Self {
            block,
            is_originator: false,
        }
    }

    pub fn originator(block: Block) -> Self {
        Self {
            block,
            is_originator: true,
        }
    }
}

/// One-byte message type code carried in the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    Keepalive = 0x02,
    Publish = 0x03,
    ConfirmReq = 0x04,
    ConfirmAck = 0x05,
    BulkPull = 0x06,
    BulkPush = 0x07,
    FrontierReq = 0x08,
    NodeIdHandshake = 0x0a,
    BulkPullAccount = 0x0b,
    TelemetryReq = 0x0c,
    TelemetryAck = 0x0d,
    AscPullReq = 0x0e,
    AscPullAck = 0x0f,
    FrontierResp = 0x10,
    BulkPullResp = 0x11,
    BulkPullAccountResp = 0x12,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        let message_type = match value {
            0x02 => Self::Keepalive,
            0x03 => Self::Publish,
            0x04 => Self::ConfirmReq,
            0x05 => Self::ConfirmAck,
            0x06 => Self::BulkPull,
            0x07 => Self::BulkPush,
            0x08 => Self::FrontierReq,
            0x0a => Self::NodeIdHandshake,
            0x0b => Self::BulkPullAccount,
            0x0c => Self::TelemetryReq,
            0x0d => Self::TelemetryAck,
            0x0e => Self::AscPullReq,
            0x0f => Self::AscPullAck,
            0x10 => Self::FrontierResp,
            0x11 => Self::BulkPullResp,
            0x12 => Self::BulkPullAccountResp,
            _ => return None,
        };
        Some(message_type)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keepalive => "keepalive",
            Self::Publish => "publish",
            Self::ConfirmReq => "confirm_req",
            Self::ConfirmAck => "confirm_ack",
            Self::BulkPull => "bulk_pull",
            Self::BulkPush => "bulk_push",
            Self::FrontierReq => "frontier_req",
            Self::NodeIdHandshake => "node_id_handshake",
            Self::BulkPullAccount => "bulk_pull_account",
            Self::TelemetryReq => "telemetry_req",
            Self::TelemetryAck => "telemetry_ack",
            Self::AscPullReq => "asc_pull_req",
            Self::AscPullAck => "asc_pull_ack",
            Self::FrontierResp => "frontier_resp",
            Self::BulkPullResp => "bulk_pull_resp",
            Self::BulkPullAccountResp => "bulk_pull_account_resp",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Keepalive(Keepalive),
    Publish(Publish),
    ConfirmReq(ConfirmReq),
    ConfirmAck(ConfirmAck),
    BulkPull(BulkPull),
    BulkPullAccount(BulkPullAccount),
    BulkPush(BulkPush),
    FrontierReq(FrontierReq),
    NodeIdHandshake(NodeIdHandshake),
    TelemetryReq,
    TelemetryAck(TelemetryData),
    AscPullReq(AscPullReq),
    AscPullAck(AscPullAck),
    FrontierResp(FrontierResp),
    BulkPullResp(BulkPullResp),
    BulkPullAccountResp(BulkPullAccountResp),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Keepalive(_) => MessageType::Keepalive,
            Message::Publish(_) => MessageType::Publish,
            Message::ConfirmReq(_) => MessageType::ConfirmReq,
            Message::ConfirmAck(_) => MessageType::ConfirmAck,
            Message::BulkPull(_) => MessageType::BulkPull,
            Message::BulkPullAccount(_) => MessageType::BulkPullAccount,
            Message::BulkPush(_) => MessageType::BulkPush,
            Message::FrontierReq(_) => MessageType::FrontierReq,
            Message::NodeIdHandshake(_) => MessageType::NodeIdHandshake,
            Message::TelemetryReq => MessageType::TelemetryReq,
            Message::TelemetryAck(_) => MessageType::TelemetryAck,
            Message::AscPullReq(_) => MessageType::AscPullReq,
            Message::AscPullAck(_) => MessageType::AscPullAck,
            Message::FrontierResp(_) => MessageType::FrontierResp,
            Message::BulkPullResp(_) => MessageType::BulkPullResp,
            Message::BulkPullAccountResp(_) => MessageType::BulkPullAccountResp,
        }
    }

    /// Header extension bits.
    ///
    /// Confirm messages carry their item count in the low bits; the
    /// handshake flags whether a query and a response are present.
    pub fn extensions(&self) -> u16 {
        match self {
            Message::ConfirmReq(req) => req.roots_hashes.len() as u16,
            Message::ConfirmAck(ack) => {
                let rebroadcast = if ack.is_rebroadcasted { 0x100 } else { 0 };
                ack.vote.hashes.len() as u16 | rebroadcast
            }
            Message::NodeIdHandshake(handshake) => {
                let mut bits = 0;
                if handshake.query.is_some() {
                    bits |= 1;
                }
                if handshake.response.is_some() {
                    bits |= 2;
                }
                bits
            }
            Message::Publish(publish) if publish.is_originator => 0x200,
            _ => 0,
        }
    }

    /// Messages that pass through the duplicate filter.
    pub fn is_filterable(&self) -> bool {
        matches!(self, Message::Publish(_) | Message::ConfirmAck(_))
    }

    /// Requests served by the bootstrap server rather than the realtime path.
    pub fn is_bootstrap_request(&self) -> bool {
        matches!(
            self,
            Message::BulkPull(_)
                | Message::BulkPullAccount(_)
                | Message::BulkPush(_)
                | Message::FrontierReq(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::NodeIdHandshakeResponse;
    use lattice_types::{Account, BlockHash, Signature, Vote};

    #[test]
    fn type_codes_roundtrip() {
        for code in 0..=u8::MAX {
            if let Some(message_type) = MessageType::from_u8(code) {
                assert_eq!(message_type.as_u8(), code);
            }
        }
        assert_eq!(MessageType::from_u8(0x09), None);
        assert_eq!(MessageType::from_u8(0x00), None);
    }

    #[test]
    fn handshake_extensions() {
        let query = Message::NodeIdHandshake(NodeIdHandshake::query([1; 32]));
        assert_eq!(query.extensions(), 1);
        let both = Message::NodeIdHandshake(NodeIdHandshake::response(
            NodeIdHandshakeResponse {
                node_id: Account::ZERO,
                signature: Signature::default(),
            },
            Some([2; 32]),
        ));
        assert_eq!(both.extensions(), 3);
    }

    #[test]
    fn confirm_ack_extensions_count_hashes() {
        let vote = Vote::new(
            Account::ZERO,
            0,
            0,
            vec![BlockHash::new([1; 32]), BlockHash::new([2; 32])],
        )
        .unwrap();
        let ack = Message::ConfirmAck(ConfirmAck::rebroadcast(vote));
        assert_eq!(ack.extensions(), 0x102);
        assert!(ack.is_filterable());
        assert!(!ack.is_bootstrap_request());
    }

    #[test]
    fn frontier_req_payload_bincode_roundtrip() {
        let req = FrontierReq::all_from(Account::new([3; 32]), 1000);
        let bytes = bincode::serialize(&req).unwrap();
        let decoded: FrontierReq = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, req);
        assert!(Message::FrontierReq(decoded).is_bootstrap_request());
    }
}
