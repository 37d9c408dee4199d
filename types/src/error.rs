//! Errors raised while parsing or decoding core types.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypesError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid account address: {0}")]
    InvalidAccount(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unknown block type: {0}")]
    UnknownBlockType(u8),

    #[error("vote carries {0} hashes, the maximum is {max}", max = crate::vote::Vote::MAX_HASHES)]
    TooManyHashes(usize),
}
