//! Fundamental types for the lattice node.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! accounts, hashes, amounts, blocks and their sideband, votes, and the
//! per-account records the ledger persists.

pub mod account;
pub mod amount;
pub mod block;
pub mod epoch;
pub mod error;
pub mod hash;
pub mod keys;
pub mod ledger_records;
pub mod network;
pub mod time;
pub mod vote;

pub use account::Account;
pub use amount::{Amount, COIN_RAW};
pub use block::{
    Block, BlockDetails, BlockSideband, BlockSubType, BlockType, ChangeBlock, OpenBlock,
    ReceiveBlock, SavedBlock, SendBlock, StateBlock,
};
pub use epoch::Epoch;
pub use error::TypesError;
pub use hash::{BlockHash, HashOrAccount, Link, QualifiedRoot, Root};
pub use keys::{KeyPair, PrivateKey, PublicKey, Signature};
pub use ledger_records::{AccountInfo, ConfirmationHeightInfo, PendingInfo, PendingKey};
pub use network::{NetworkConstants, NetworkId};
pub use time::unix_millis;
pub use vote::{Vote, VoteCode, VoteSource};
