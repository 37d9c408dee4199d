//! Legacy bootstrap requests and their streamed replies.
//!
//! Replies are sent as a sequence of chunk messages; an empty chunk ends the
//! stream.

use lattice_types::{Account, Amount, Block, BlockHash, HashOrAccount};
use serde::{Deserialize, Serialize};

/// Pull an account chain, newest first, from `start` back to `end`.
///
/// `start` is an account (pull from its head) or a block hash. A zero `end`
/// pulls down to the open block. `count` of zero means no limit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPull {
    pub start: HashOrAccount,
    pub end: BlockHash,
    pub count: u32,
    /// Serve oldest first instead.
    pub ascending: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BulkPullAccountFlags {
    PendingHashAndAmount,
    PendingAddressOnly,
    PendingHashAmountAndAddress,
}

/// Ask for the receivable entries of an account above a minimum amount.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPullAccount {
    pub account: Account,
    pub minimum_amount: Amount,
    pub flags: BulkPullAccountFlags,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEntry {
    pub hash: Option<BlockHash>,
    pub amount: Option<Amount>,
    pub source: Option<Account>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPullAccountResp {
    pub frontier: BlockHash,
    pub balance: Amount,
    pub entries: Vec<PendingEntry>,
}

/// Blocks pushed to a peer that lacks them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPush {
    pub blocks: Vec<Block>,
}

/// Request account frontiers in account order starting at `start`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierReq {
    pub start: Account,
    /// Only accounts modified within this many seconds; `u32::MAX` for all.
    pub age: u32,
    pub count: u32,
    pub only_confirmed: bool,
}

impl FrontierReq {
    pub fn all_from(start: Account, count: u32) -> Self {
        Self {
            start,
            age: u32::MAX,
            count,
            only_confirmed: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierResp {
    pub frontiers: Vec<(Account, BlockHash)>,
}

impl FrontierResp {
    pub fn is_end(&self) -> bool {
        self.frontiers.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPullResp {
    pub blocks: Vec<Block>,
}

impl BulkPullResp {
    /// Blocks per chunk; keeps every chunk well under the frame limit.
    pub const MAX_BLOCKS: usize = 128;

    pub fn is_end(&self) -> bool {
        self.blocks.is_empty()
    }
}
