use std::net::{Ipv6Addr, SocketAddrV6};

use serde::{Deserialize, Serialize};

/// Periodic liveness message carrying up to eight known peers.
///
/// Unused slots hold the unspecified address with port 0.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keepalive {
    pub peers: [SocketAddrV6; 8],
}

impl Keepalive {
    pub const PEER_SLOTS: usize = 8;

    pub fn empty_slot() -> SocketAddrV6 {
        SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0)
    }

    /// Fill from `peers`, ignoring any beyond the eighth.
    pub fn new(peers: impl IntoIterator<Item = SocketAddrV6>) -> Self {
        let mut slots = [Self::empty_slot(); 8];
        for (slot, peer) in slots.iter_mut().zip(peers) {
            *slot = peer;
        }
        Self { peers: slots }
    }

    /// The filled slots.
    pub fn endpoints(&self) -> impl Iterator<Item = &SocketAddrV6> {
        self.peers
            .iter()
            .filter(|p| !p.ip().is_unspecified() && p.port() != 0)
    }
}

impl Default for Keepalive {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}
