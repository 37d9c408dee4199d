use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("protocol version {0} is below the supported minimum")]
    UnsupportedVersion(u8),

    #[error("message for another network")]
    WrongNetwork,

    #[error("unknown message type {0:#04x}")]
    UnknownMessageType(u8),

    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<bincode::Error> for ProtocolError {
    fn from(e: bincode::Error) -> Self {
        ProtocolError::Malformed(e.to_string())
    }
}
