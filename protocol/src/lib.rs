//! Wire protocol.
//!
//! A frame is an 8-byte [`MessageHeader`], a little-endian `u32` payload
//! length and a bincode payload. The header names the network and the
//! protocol versions the sender speaks.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod header;
pub mod version;

pub use codec::{read_message, write_message, MessageCodec, MAX_MESSAGE_SIZE};
pub use error::ProtocolError;
pub use handshake::{sign_cookie, verify_handshake_response};
pub use header::MessageHeader;
pub use version::{ProtocolInfo, MIN_PROTOCOL_VERSION, PROTOCOL_VERSION};
