//! Peer-to-peer networking.
//!
//! Every peer connection is a [`Channel`]. The [`Network`] registry tracks
//! live channels and fans messages out to them; the [`TcpListener`] accepts
//! inbound connections under per-IP and per-subnetwork caps, runs the
//! node-id handshake and hands each authenticated connection to the
//! registry. Misbehaving peers are scored by [`PeerExclusion`], and
//! [`NetworkFilter`] drops repeated publish and vote payloads.

pub mod channel;
pub mod error;
pub mod limits;
pub mod listener;
pub mod network;
pub mod network_filter;
pub mod peer_exclusion;
pub mod syn_cookies;
pub mod tcp_channel;

pub use channel::{Channel, ChannelId, ChannelMode, DropPolicy, TrafficType};
pub use error::NetworkError;
pub use limits::{map_to_v6, subnetwork, ConnectionLimits, Direction as ConnectionDirection};
pub use listener::{InboundMessage, MessageSink, TcpListener, TcpListenerConfig};
pub use network::Network;
pub use network_filter::NetworkFilter;
pub use peer_exclusion::PeerExclusion;
pub use syn_cookies::SynCookies;
pub use tcp_channel::TcpChannel;
