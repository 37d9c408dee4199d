use lattice_types::{Account, BlockHash, Signature};
use serde::{Deserialize, Serialize};

/// Node statistics shared in reply to a telemetry request.
///
/// Signed by the node id; [`TelemetryData::signed_bytes`] is what the
/// signature covers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryData {
    pub node_id: Account,
    pub signature: Signature,
    pub block_count: u64,
    pub cemented_count: u64,
    pub unchecked_count: u64,
    pub account_count: u64,
    pub peer_count: u32,
    pub protocol_version: u8,
    pub uptime: u64,
    pub genesis_block: BlockHash,
    pub major_version: u8,
    pub minor_version: u8,
    pub patch_version: u8,
    /// Milliseconds since the unix epoch.
    pub timestamp: u64,
}

impl TelemetryData {
    pub fn signed_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(128);
        bytes.extend_from_slice(self.node_id.as_bytes());
        bytes.extend_from_slice(&self.block_count.to_be_bytes());
        bytes.extend_from_slice(&self.cemented_count.to_be_bytes());
        bytes.extend_from_slice(&self.unchecked_count.to_be_bytes());
        bytes.extend_from_slice(&self.account_count.to_be_bytes());
        bytes.extend_from_slice(&self.peer_count.to_be_bytes());
        bytes.push(self.protocol_version);
        bytes.extend_from_slice(&self.uptime.to_be_bytes());
        bytes.extend_from_slice(self.genesis_block.as_bytes());
        bytes.extend_from_slice(&[self.major_version, self.minor_version, self.patch_version]);
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes
    }
}

impl Default for TelemetryData {
    fn default() -> Self {
        Self {
            node_id: Account::ZERO,
            signature: Signature::default(),
            block_count: 0,
            cemented_count: 0,
            unchecked_count: 0,
            account_count: 0,
            peer_count: 0,
            protocol_version: 0,
            uptime: 0,
            genesis_block: BlockHash::ZERO,
            major_version: 0,
            minor_version: 0,
            patch_version: 0,
            timestamp: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_not_signed() {
        let mut data = TelemetryData {
            block_count: 5,
            ..Default::default()
        };
        let before = data.signed_bytes();
        data.signature = Signature([1; 64]);
        assert_eq!(data.signed_bytes(), before);
        data.block_count = 6;
        assert_ne!(data.signed_bytes(), before);
    }
}
