//! Messages exchanged between nodes.
//!
//! [`Message`] is the sum of everything that travels on a connection. Each
//! variant wraps a payload struct; framing and the byte layout of the header
//! live in `lattice-protocol`.

mod asc_pull;
mod bootstrap;
mod confirm;
mod handshake;
mod keepalive;
mod message;
mod telemetry;

pub use asc_pull::{
    AccountInfoAckPayload, AccountInfoReqPayload, AscPullAck, AscPullAckPayload, AscPullReq,
    AscPullReqPayload, BlocksReqPayload, FrontiersReqPayload, HashType,
};
pub use bootstrap::{
    BulkPull, BulkPullAccount, BulkPullAccountFlags, BulkPullAccountResp, BulkPullResp, BulkPush,
    FrontierReq, FrontierResp, PendingEntry,
};
pub use confirm::{ConfirmAck, ConfirmReq};
pub use handshake::{NodeIdHandshake, NodeIdHandshakeResponse};
pub use keepalive::Keepalive;
pub use message::{Message, MessageType, Publish};
pub use telemetry::TelemetryData;
