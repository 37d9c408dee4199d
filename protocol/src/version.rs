/// Version this node speaks.
pub const PROTOCOL_VERSION: u8 = 2;

/// Oldest version still accepted.
pub const MIN_PROTOCOL_VERSION: u8 = 1;

/// The three version bytes carried by every header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolInfo {
    pub version_max: u8,
    pub version_using: u8,
    pub version_min: u8,
}

impl ProtocolInfo {
    pub fn is_compatible(&self, peer_version: u8) -> bool {
        peer_version >= self.version_min
    }
}

impl Default for ProtocolInfo {
    fn default() -> Self {
        Self {
            version_max: PROTOCOL_VERSION,
            version_using: PROTOCOL_VERSION,
            version_min: MIN_PROTOCOL_VERSION,
        }
    }
}
