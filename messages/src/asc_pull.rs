//! Ascending bootstrap: request/reply pairs matched by id.

use lattice_types::{Account, Block, BlockHash, HashOrAccount};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashType {
    Account,
    Block,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlocksReqPayload {
    pub start: HashOrAccount,
    pub count: u8,
    pub start_type: HashType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfoReqPayload {
    pub target: HashOrAccount,
    pub target_type: HashType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontiersReqPayload {
    pub start: Account,
    pub count: u16,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AscPullReqPayload {
    Blocks(BlocksReqPayload),
    AccountInfo(AccountInfoReqPayload),
    Frontiers(FrontiersReqPayload),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AscPullReq {
    pub id: u64,
    pub payload: AscPullReqPayload,
}

impl AscPullReq {
    pub const MAX_BLOCKS: u8 = 128;
    pub const MAX_FRONTIERS: u16 = 1000;
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfoAckPayload {
    pub account: Account,
    pub account_open: BlockHash,
    pub account_head: BlockHash,
    pub account_block_count: u64,
    pub account_conf_frontier: BlockHash,
    pub account_conf_height: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AscPullAckPayload {
    Blocks(Vec<Block>),
    AccountInfo(AccountInfoAckPayload),
    Frontiers(Vec<(Account, BlockHash)>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AscPullAck {
    pub id: u64,
    pub payload: AscPullAckPayload,
}
