//! Blocks and their ledger sideband.
//!
//! Five wire variants exist: the four legacy blocks (send, receive, open,
//! change) and the universal state block. Epoch blocks are state blocks whose
//! link names a registered epoch; that classification needs ledger context and
//! is recorded in the sideband.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::amount::Amount;
use crate::epoch::Epoch;
use crate::error::TypesError;
use crate::hash::{BlockHash, Link, QualifiedRoot, Root};
use crate::keys::Signature;

type Blake2b256 = Blake2b<U32>;

/// Wire discriminant of a block variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockType {
    Send = 2,
    Receive = 3,
    Open = 4,
    Change = 5,
    State = 6,
}

impl BlockType {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Send => "send",
            BlockType::Receive => "receive",
            BlockType::Open => "open",
            BlockType::Change => "change",
            BlockType::State => "state",
        }
    }
}

impl TryFrom<u8> for BlockType {
    type Error = TypesError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(BlockType::Send),
            3 => Ok(BlockType::Receive),
            4 => Ok(BlockType::Open),
            5 => Ok(BlockType::Change),
            6 => Ok(BlockType::State),
            other => Err(TypesError::UnknownBlockType(other)),
        }
    }
}

/// Semantic classification of a processed block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockSubType {
    Send,
    Receive,
    Open,
    Change,
    Epoch,
}

impl BlockSubType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockSubType::Send => "send",
            BlockSubType::Receive => "receive",
            BlockSubType::Open => "open",
            BlockSubType::Change => "change",
            BlockSubType::Epoch => "epoch",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendBlock {
    pub previous: BlockHash,
    pub destination: Account,
    pub balance: Amount,
    pub signature: Signature,
    pub work: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBlock {
    pub previous: BlockHash,
    pub source: BlockHash,
    pub signature: Signature,
    pub work: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBlock {
    pub source: BlockHash,
    pub representative: Account,
    pub account: Account,
    pub signature: Signature,
    pub work: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBlock {
    pub previous: BlockHash,
    pub representative: Account,
    pub signature: Signature,
    pub work: u64,
}

/// Universal block: every field of the account state is repeated so the
/// block alone describes the resulting account state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlock {
    pub account: Account,
    pub previous: BlockHash,
    pub representative: Account,
    pub balance: Amount,
    pub link: Link,
    pub signature: Signature,
    pub work: u64,
}

/// 32-byte preamble separating state block hashes from legacy ones.
const STATE_BLOCK_PREAMBLE: [u8; 32] = {
    let mut p = [0u8; 32];
    p[31] = BlockType::State as u8;
    p
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Send(SendBlock),
    Receive(ReceiveBlock),
    Open(OpenBlock),
    Change(ChangeBlock),
    State(StateBlock),
}

impl Block {
    /// Blake2b-256 over the signed fields.
    pub fn hash(&self) -> BlockHash {
        let mut hasher = Blake2b256::new();
        match self {
            Block::Send(b) => {
                hasher.update(b.previous.as_bytes());
                hasher.update(b.destination.as_bytes());
                hasher.update(b.balance.to_be_bytes());
            }
            Block::Receive(b) => {
                hasher.update(b.previous.as_bytes());
                hasher.update(b.source.as_bytes());
            }
            Block::Open(b) => {
                hasher.update(b.source.as_bytes());
                hasher.update(b.representative.as_bytes());
                hasher.update(b.account.as_bytes());
            }
            Block::Change(b) => {
                hasher.update(b.previous.as_bytes());
                hasher.update(b.representative.as_bytes());
            }
            Block::State(b) => {
                hasher.update(STATE_BLOCK_PREAMBLE);
                hasher.update(b.account.as_bytes());
                hasher.update(b.previous.as_bytes());
                hasher.update(b.representative.as_bytes());
                hasher.update(b.balance.to_be_bytes());
                hasher.update(b.link.as_bytes());
            }
        }
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        BlockHash::new(out)
    }

    pub fn block_type(&self) -> BlockType {
        match self {
            Block::Send(_) => BlockType::Send,
            Block::Receive(_) => BlockType::Receive,
            Block::Open(_) => BlockType::Open,
            Block::Change(_) => BlockType::Change,
            Block::State(_) => BlockType::State,
        }
    }

    /// Previous block in the account chain; zero for the first block.
    pub fn previous(&self) -> BlockHash {
        match self {
            Block::Send(b) => b.previous,
            Block::Receive(b) => b.previous,
            Block::Open(_) => BlockHash::ZERO,
            Block::Change(b) => b.previous,
            Block::State(b) => b.previous,
        }
    }

    /// Previous hash, or the account for the first block of a chain.
    pub fn root(&self) -> Root {
        match self {
            Block::Open(b) => b.account.into(),
            Block::State(b) if b.previous.is_zero() => b.account.into(),
            _ => self.previous().into(),
        }
    }

    pub fn qualified_root(&self) -> QualifiedRoot {
        QualifiedRoot::new(self.root(), self.previous())
    }

    /// Whether this block opens its account chain.
    pub fn is_open(&self) -> bool {
        match self {
            Block::Open(_) => true,
            Block::State(b) => b.previous.is_zero(),
            _ => false,
        }
    }

    pub fn is_legacy(&self) -> bool {
        !matches!(self, Block::State(_))
    }

    /// Account field, present on open and state blocks.
    pub fn account_field(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.account),
            Block::State(b) => Some(b.account),
            _ => None,
        }
    }

    pub fn representative_field(&self) -> Option<Account> {
        match self {
            Block::Open(b) => Some(b.representative),
            Block::Change(b) => Some(b.representative),
            Block::State(b) => Some(b.representative),
            _ => None,
        }
    }

    pub fn balance_field(&self) -> Option<Amount> {
        match self {
            Block::Send(b) => Some(b.balance),
            Block::State(b) => Some(b.balance),
            _ => None,
        }
    }

    /// Source hash of a legacy receive or open.
    pub fn source_field(&self) -> Option<BlockHash> {
        match self {
            Block::Receive(b) => Some(b.source),
            Block::Open(b) => Some(b.source),
            _ => None,
        }
    }

    pub fn destination_field(&self) -> Option<Account> {
        match self {
            Block::Send(b) => Some(b.destination),
            _ => None,
        }
    }

    pub fn link_field(&self) -> Option<Link> {
        match self {
            Block::State(b) => Some(b.link),
            _ => None,
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Block::Send(b) => &b.signature,
            Block::Receive(b) => &b.signature,
            Block::Open(b) => &b.signature,
            Block::Change(b) => &b.signature,
            Block::State(b) => &b.signature,
        }
    }

    pub fn set_signature(&mut self, signature: Signature) {
        match self {
            Block::Send(b) => b.signature = signature,
            Block::Receive(b) => b.signature = signature,
            Block::Open(b) => b.signature = signature,
            Block::Change(b) => b.signature = signature,
            Block::State(b) => b.signature = signature,
        }
    }

    pub fn work(&self) -> u64 {
        match self {
            Block::Send(b) => b.work,
            Block::Receive(b) => b.work,
            Block::Open(b) => b.work,
            Block::Change(b) => b.work,
            Block::State(b) => b.work,
        }
    }

    pub fn set_work(&mut self, work: u64) {
        match self {
            Block::Send(b) => b.work = work,
            Block::Receive(b) => b.work = work,
            Block::Open(b) => b.work = work,
            Block::Change(b) => b.work = work,
            Block::State(b) => b.work = work,
        }
    }

    /// Legacy blocks may only follow legacy blocks.
    pub fn valid_predecessor(&self, predecessor: BlockType) -> bool {
        match self {
            Block::State(_) => true,
            Block::Open(_) => false,
            _ => predecessor != BlockType::State,
        }
    }
}

/// Flags computed by the ledger when a block is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockDetails {
    pub epoch: Epoch,
    pub is_send: bool,
    pub is_receive: bool,
    pub is_epoch: bool,
}

impl BlockDetails {
    pub fn new(epoch: Epoch, is_send: bool, is_receive: bool, is_epoch: bool) -> Self {
        Self {
            epoch,
            is_send,
            is_receive,
            is_epoch,
        }
    }
}

/// Ledger-attached data that is not part of the signed block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSideband {
    pub account: Account,
    pub successor: BlockHash,
    pub balance: Amount,
    /// 1-based position in the account chain.
    pub height: u64,
    /// Unix seconds at which the block was applied locally.
    pub timestamp: u64,
    pub details: BlockDetails,
    pub source_epoch: Epoch,
}

/// A block together with its sideband, as stored in the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedBlock {
    pub block: Block,
    pub sideband: BlockSideband,
}

impl SavedBlock {
    pub fn new(block: Block, sideband: BlockSideband) -> Self {
        Self { block, sideband }
    }

    pub fn hash(&self) -> BlockHash {
        self.block.hash()
    }

    pub fn account(&self) -> Account {
        self.sideband.account
    }

    pub fn height(&self) -> u64 {
        self.sideband.height
    }

    pub fn balance(&self) -> Amount {
        self.sideband.balance
    }

    pub fn successor(&self) -> BlockHash {
        self.sideband.successor
    }

    pub fn epoch(&self) -> Epoch {
        self.sideband.details.epoch
    }

    pub fn previous(&self) -> BlockHash {
        self.block.previous()
    }

    pub fn is_send(&self) -> bool {
        match &self.block {
            Block::Send(_) => true,
            Block::State(_) => self.sideband.details.is_send,
            _ => false,
        }
    }

    pub fn is_receive(&self) -> bool {
        match &self.block {
            Block::Receive(_) | Block::Open(_) => true,
            Block::State(_) => self.sideband.details.is_receive,
            _ => false,
        }
    }

    pub fn is_epoch(&self) -> bool {
        self.sideband.details.is_epoch
    }

    pub fn is_change(&self) -> bool {
        match &self.block {
            Block::Change(_) => true,
            Block::State(b) => {
                !self.is_send() && !self.is_receive() && !self.is_epoch() && b.link.is_zero()
            }
            _ => false,
        }
    }

    pub fn subtype(&self) -> BlockSubType {
        match &self.block {
            Block::Send(_) => BlockSubType::Send,
            Block::Receive(_) => BlockSubType::Receive,
            Block::Open(_) => BlockSubType::Open,
            Block::Change(_) => BlockSubType::Change,
            Block::State(b) => {
                if self.sideband.details.is_send {
                    BlockSubType::Send
                } else if self.sideband.details.is_epoch {
                    BlockSubType::Epoch
                } else if b.previous.is_zero() {
                    BlockSubType::Open
                } else if self.sideband.details.is_receive {
                    BlockSubType::Receive
                } else {
                    BlockSubType::Change
                }
            }
        }
    }

    /// The send block this block receives from, if it is a receive.
    pub fn source(&self) -> Option<BlockHash> {
        match &self.block {
            Block::Receive(b) => Some(b.source),
            Block::Open(b) => Some(b.source),
            Block::State(b) if self.sideband.details.is_receive => Some(b.link.into()),
            _ => None,
        }
    }

    /// Receiving account, if this block is a send.
    pub fn destination(&self) -> Option<Account> {
        match &self.block {
            Block::Send(b) => Some(b.destination),
            Block::State(b) if self.sideband.details.is_send => Some(b.link.into()),
            _ => None,
        }
    }

    /// Representative in effect after this block, when the block names one.
    pub fn representative(&self) -> Option<Account> {
        self.block.representative_field()
    }
}
