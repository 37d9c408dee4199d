//! The peer channel abstraction shared by TCP connections and test doubles.

use std::fmt;
use std::net::SocketAddrV6;
use std::time::Instant;

use lattice_messages::{Message, MessageType};
use lattice_types::Account;
use lattice_utils::DetailType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub usize);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a connection is used for once its first message has been read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMode {
    Undefined,
    Bootstrap,
    Realtime,
}

/// Outbound traffic class. Each class has its own queue budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrafficType {
    Generic,
    Bootstrap,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropPolicy {
    /// Dropped once the queue reaches its budget.
    CanDrop,
    /// Only dropped once the queue reaches twice its budget.
    ShouldNotDrop,
}

/// A connection to one peer.
///
/// `send` never blocks; a message that does not fit the outbound queue is
/// dropped and `false` is returned.
pub trait Channel: Send + Sync {
    fn channel_id(&self) -> ChannelId;
    fn remote_endpoint(&self) -> SocketAddrV6;
    fn node_id(&self) -> Option<Account>;
    fn set_node_id(&self, node_id: Account);
    fn mode(&self) -> ChannelMode;
    fn set_mode(&self, mode: ChannelMode);
    fn protocol_version(&self) -> u8;
    fn is_alive(&self) -> bool;
    fn close(&self);
    fn last_packet_received(&self) -> Instant;
    fn last_packet_sent(&self) -> Instant;
    /// Whether the queue for `traffic` is at its budget.
    fn max(&self, traffic: TrafficType) -> bool;
    fn send(&self, message: &Message, drop_policy: DropPolicy, traffic: TrafficType) -> bool;
}

/// Stat detail recorded for a message of the given type.
pub fn message_detail(message_type: MessageType) -> DetailType {
    match message_type {
        MessageType::Keepalive => DetailType::Keepalive,
        MessageType::Publish => DetailType::Publish,
        MessageType::ConfirmReq => DetailType::ConfirmReq,
        MessageType::ConfirmAck => DetailType::ConfirmAck,
        MessageType::NodeIdHandshake => DetailType::NodeIdHandshake,
        MessageType::TelemetryReq => DetailType::TelemetryReq,
        MessageType::TelemetryAck => DetailType::TelemetryAck,
        MessageType::FrontierReq | MessageType::FrontierResp => DetailType::FrontierReq,
        MessageType::BulkPull | MessageType::BulkPullResp => DetailType::BulkPull,
        MessageType::BulkPullAccount | MessageType::BulkPullAccountResp => {
            DetailType::BulkPullAccount
        }
        MessageType::BulkPush => DetailType::BulkPush,
        MessageType::AscPullReq => DetailType::AscPullReq,
        MessageType::AscPullAck => DetailType::AscPullAck,
    }
}
