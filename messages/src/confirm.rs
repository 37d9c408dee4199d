use lattice_types::{BlockHash, Root, Vote};
use serde::{Deserialize, Serialize};

/// Ask the receiver to vote on up to [`ConfirmReq::MAX_PAIRS`] blocks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmReq {
    pub roots_hashes: Vec<(BlockHash, Root)>,
}

impl ConfirmReq {
    pub const MAX_PAIRS: usize = 7;

    /// `None` when the pair list is empty or too long.
    pub fn new(roots_hashes: Vec<(BlockHash, Root)>) -> Option<Self> {
        if roots_hashes.is_empty() || roots_hashes.len() > Self::MAX_PAIRS {
            return None;
        }
        Some(Self { roots_hashes })
    }

    pub fn is_valid(&self) -> bool {
        !self.roots_hashes.is_empty() && self.roots_hashes.len() <= Self::MAX_PAIRS
    }
}

/// A vote travelling on the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmAck {
    pub vote: Vote,
    /// Set when the sender relays someone else's vote.
    pub is_rebroadcasted: bool,
}

impl ConfirmAck {
    pub fn new(vote: Vote) -> Self {
        Self {
            vote,
            is_rebroadcasted: false,
        }
    }

    pub fn rebroadcast(vote: Vote) -> Self {
        Self {
            vote,
            is_rebroadcasted: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.vote.hashes.is_empty() && self.vote.hashes.len() <= Vote::MAX_HASHES
    }
}
