//! Framing: header, payload length, bincode payload.

use lattice_messages::{Message, MessageType};
use lattice_types::NetworkId;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::header::MessageHeader;
use crate::version::ProtocolInfo;

/// Largest payload accepted in either direction.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

const LENGTH_SIZE: usize = 4;

/// Encodes and decodes frames for one network.
#[derive(Clone, Copy, Debug)]
pub struct MessageCodec {
    pub network: NetworkId,
    pub protocol: ProtocolInfo,
}

impl MessageCodec {
    pub fn new(network: NetworkId) -> Self {
        Self {
            network,
            protocol: ProtocolInfo::default(),
        }
    }

    pub fn header_for(&self, message: &Message) -> MessageHeader {
        let mut header = MessageHeader::new(self.network, self.protocol, message.message_type());
        header.extensions = message.extensions();
        header
    }

    /// A complete frame ready for the socket.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        let payload = encode_payload(message)?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: payload.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let mut frame = Vec::with_capacity(MessageHeader::SIZE + LENGTH_SIZE + payload.len());
        frame.extend_from_slice(&self.header_for(message).serialize());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode a full frame held in memory.
    pub fn decode(&self, frame: &[u8]) -> Result<Message, ProtocolError> {
        if frame.len() < MessageHeader::SIZE + LENGTH_SIZE {
            return Err(ProtocolError::Malformed("truncated frame".into()));
        }
        let mut header_bytes = [0u8; MessageHeader::SIZE];
        header_bytes.copy_from_slice(&frame[..MessageHeader::SIZE]);
        let header = MessageHeader::deserialize(&header_bytes)?;
        header.validate(self.network, &self.protocol)?;

        let mut length_bytes = [0u8; LENGTH_SIZE];
        length_bytes.copy_from_slice(&frame[MessageHeader::SIZE..MessageHeader::SIZE + LENGTH_SIZE]);
        let length = self.check_length(u32::from_le_bytes(length_bytes))?;
        let payload = &frame[MessageHeader::SIZE + LENGTH_SIZE..];
        if payload.len() != length {
            return Err(ProtocolError::Malformed(format!(
                "payload length {} does not match header {}",
                payload.len(),
                length
            )));
        }
        decode_payload(&header, payload)
    }

    fn check_length(&self, length: u32) -> Result<usize, ProtocolError> {
        let length = length as usize;
        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(length)
    }
}

/// Read one frame from `reader`.
pub async fn read_message<R>(reader: &mut R, codec: &MessageCodec) -> Result<Message, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; MessageHeader::SIZE];
    reader.read_exact(&mut header_bytes).await?;
    let header = MessageHeader::deserialize(&header_bytes)?;
    header.validate(codec.network, &codec.protocol)?;

    let mut length_bytes = [0u8; LENGTH_SIZE];
    reader.read_exact(&mut length_bytes).await?;
    let length = codec.check_length(u32::from_le_bytes(length_bytes))?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    decode_payload(&header, &payload)
}

/// Write one frame to `writer`.
pub async fn write_message<W>(
    writer: &mut W,
    codec: &MessageCodec,
    message: &Message,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let frame = codec.encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

fn encode_payload(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let bytes = match message {
        Message::Keepalive(p) => bincode::serialize(p)?,
        Message::Publish(p) => bincode::serialize(p)?,
        Message::ConfirmReq(p) => bincode::serialize(p)?,
        Message::ConfirmAck(p) => bincode::serialize(p)?,
        Message::BulkPull(p) => bincode::serialize(p)?,
        Message::BulkPullAccount(p) => bincode::serialize(p)?,
        Message::BulkPush(p) => bincode::serialize(p)?,
        Message::FrontierReq(p) => bincode::serialize(p)?,
        Message::NodeIdHandshake(p) => bincode::serialize(p)?,
        Message::TelemetryReq => Vec::new(),
        Message::TelemetryAck(p) => bincode::serialize(p)?,
        Message::AscPullReq(p) => bincode::serialize(p)?,
        Message::AscPullAck(p) => bincode::serialize(p)?,
        Message::FrontierResp(p) => bincode::serialize(p)?,
        Message::BulkPullResp(p) => bincode::serialize(p)?,
        Message::BulkPullAccountResp(p) => bincode::serialize(p)?,
    };
    Ok(bytes)
}

fn payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(bincode::deserialize(bytes)?)
}

fn decode_payload(header: &MessageHeader, bytes: &[u8]) -> Result<Message, ProtocolError> {
    let message = match header.message_type {
        MessageType::Keepalive => Message::Keepalive(payload(bytes)?),
        MessageType::Publish => Message::Publish(payload(bytes)?),
        MessageType::ConfirmReq => Message::ConfirmReq(payload(bytes)?),
        MessageType::ConfirmAck => Message::ConfirmAck(payload(bytes)?),
        MessageType::BulkPull => Message::BulkPull(payload(bytes)?),
        MessageType::BulkPullAccount => Message::BulkPullAccount(payload(bytes)?),
        MessageType::BulkPush => Message::BulkPush(payload(bytes)?),
        MessageType::FrontierReq => Message::FrontierReq(payload(bytes)?),
        MessageType::NodeIdHandshake => Message::NodeIdHandshake(payload(bytes)?),
        MessageType::TelemetryReq => Message::TelemetryReq,
        MessageType::TelemetryAck => Message::TelemetryAck(payload(bytes)?),
        MessageType::AscPullReq => Message::AscPullReq(payload(bytes)?),
        MessageType::AscPullAck => Message::AscPullAck(payload(bytes)?),
        MessageType::FrontierResp => Message::FrontierResp(payload(bytes)?),
        MessageType::BulkPullResp => Message::BulkPullResp(payload(bytes)?),
        MessageType::BulkPullAccountResp => Message::BulkPullAccountResp(payload(bytes)?),
    };
    check_limits(&message)?;
    Ok(message)
}

fn check_limits(message: &Message) -> Result<(), ProtocolError> {
    let valid = match message {
        Message::ConfirmReq(req) => req.is_valid(),
        Message::ConfirmAck(ack) => ack.is_valid(),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(ProtocolError::Malformed(format!(
            "{} exceeds item limits",
            message.message_type().as_str()
        )))
    }
}
