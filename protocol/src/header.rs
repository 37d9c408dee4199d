//! The fixed 8-byte message header.

use lattice_messages::MessageType;
use lattice_types::NetworkId;

use crate::error::ProtocolError;
use crate::version::ProtocolInfo;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub network: NetworkId,
    pub protocol: ProtocolInfo,
    pub message_type: MessageType,
    pub extensions: u16,
}

impl MessageHeader {
    pub const SIZE: usize = 8;

    pub fn new(network: NetworkId, protocol: ProtocolInfo, message_type: MessageType) -> Self {
        Self {
            network,
            protocol,
            message_type,
            extensions: 0,
        }
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let magic = self.network.magic();
        let ext = self.extensions.to_le_bytes();
        [
            magic[0],
            magic[1],
            self.protocol.version_max,
            self.protocol.version_using,
            self.protocol.version_min,
            self.message_type.as_u8(),
            ext[0],
            ext[1],
        ]
    }

    /// Parse a header without judging whether it is acceptable; see
    /// [`MessageHeader::validate`].
    pub fn deserialize(bytes: &[u8; Self::SIZE]) -> Result<Self, ProtocolError> {
        let network =
            NetworkId::from_magic([bytes[0], bytes[1]]).ok_or(ProtocolError::WrongNetwork)?;
        let message_type =
            MessageType::from_u8(bytes[5]).ok_or(ProtocolError::UnknownMessageType(bytes[5]))?;
        Ok(Self {
            network,
            protocol: ProtocolInfo {
                version_max: bytes[2],
                version_using: bytes[3],
                version_min: bytes[4],
            },
            message_type,
            extensions: u16::from_le_bytes([bytes[6], bytes[7]]),
        })
    }

    /// Reject headers for another network or from too old a peer.
    pub fn validate(&self, network: NetworkId, ours: &ProtocolInfo) -> Result<(), ProtocolError> {
        if self.network != network {
            return Err(ProtocolError::WrongNetwork);
        }
        if !ours.is_compatible(self.protocol.version_using) {
            return Err(ProtocolError::UnsupportedVersion(self.protocol.version_using));
        }
        Ok(())
    }
}
