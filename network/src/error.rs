use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection refused: {0}")]
    Refused(&'static str),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] lattice_protocol::ProtocolError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
