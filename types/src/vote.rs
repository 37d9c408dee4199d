//! Representative votes.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::error::TypesError;
use crate::hash::BlockHash;
use crate::keys::Signature;

type Blake2b256 = Blake2b<U32>;

/// A signed statement by a representative that it supports a set of blocks.
///
/// The timestamp packs a millisecond clock in the high bits and a duration
/// exponent in the low four bits. `u64::MAX` marks a final vote.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voting_account: Account,
    pub timestamp: u64,
    pub hashes: Vec<BlockHash>,
    pub signature: Signature,
}

const HASH_PREFIX: &[u8] = b"vote ";
const DURATION_MASK: u64 = 0xf;

impl Vote {
    /// Timestamp value of a final vote.
    pub const FINAL_TIMESTAMP: u64 = u64::MAX;
    /// Duration exponent of a final vote.
    pub const FINAL_DURATION: u8 = 0xf;
    /// Maximum hashes a single vote (and confirm_ack) may carry.
    pub const MAX_HASHES: usize = 12;

    /// Build an unsigned vote. Sign it with `lattice_crypto::sign_vote`.
    pub fn new(
        voting_account: Account,
        timestamp_ms: u64,
        duration: u8,
        hashes: Vec<BlockHash>,
    ) -> Result<Self, TypesError> {
        if hashes.len() > Self::MAX_HASHES {
            return Err(TypesError::TooManyHashes(hashes.len()));
        }
        Ok(Self {
            voting_account,
            timestamp: Self::pack_timestamp(timestamp_ms, duration),
            hashes,
            signature: Signature::default(),
        })
    }

    /// Build an unsigned final vote.
    pub fn new_final(voting_account: Account, hashes: Vec<BlockHash>) -> Result<Self, TypesError> {
        if hashes.len() > Self::MAX_HASHES {
            return Err(TypesError::TooManyHashes(hashes.len()));
        }
        Ok(Self {
            voting_account,
            timestamp: Self::FINAL_TIMESTAMP,
            hashes,
            signature: Signature::default(),
        })
    }

    pub fn pack_timestamp(timestamp_ms: u64, duration: u8) -> u64 {
        (timestamp_ms & !DURATION_MASK) | (duration as u64 & DURATION_MASK)
    }

    pub fn is_final(&self) -> bool {
        self.timestamp == Self::FINAL_TIMESTAMP
    }

    /// Millisecond clock with the duration bits cleared.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp & !DURATION_MASK
    }

    pub fn duration_bits(&self) -> u8 {
        (self.timestamp & DURATION_MASK) as u8
    }

    /// Nominal vote lifetime in milliseconds: `2^(bits + 4)`.
    pub fn duration_ms(&self) -> u64 {
        1u64 << (self.duration_bits() as u64 + 4)
    }

    /// The signed digest.
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Blake2b256::new();
        hasher.update(HASH_PREFIX);
        for hash in &self.hashes {
            hasher.update(hash.as_bytes());
        }
        hasher.update(self.timestamp.to_le_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        BlockHash::new(out)
    }

    /// Digest over the signed content plus signer and signature; used for
    /// duplicate filtering.
    pub fn full_hash(&self) -> BlockHash {
        let mut hasher = Blake2b256::new();
        hasher.update(self.hash().as_bytes());
        hasher.update(self.voting_account.as_bytes());
        hasher.update(self.signature.as_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        BlockHash::new(out)
    }
}

/// Result of applying a vote to one block hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteCode {
    /// Accepted and counted.
    Vote,
    /// An equal or newer vote from this representative is already held.
    Replay,
    /// No election exists for the hash.
    Indeterminate,
    /// The representative carries too little weight, or the vote is in cooldown.
    Ignored,
    /// Signature verification failed.
    Invalid,
}

impl VoteCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteCode::Vote => "vote",
            VoteCode::Replay => "replay",
            VoteCode::Indeterminate => "indeterminate",
            VoteCode::Ignored => "ignored",
            VoteCode::Invalid => "invalid",
        }
    }
}

/// Where a vote came from; local votes skip rebroadcast filtering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteSource {
    Live,
    Rebroadcast,
    Cache,
}
