//! Anti-spam proof-of-work.
//!
//! Not mining: a lightweight computational cost attached to every block that
//! makes flooding the network expensive. The work value is a nonce whose
//! Blake2b digest together with the block root clears a threshold that
//! depends on the block's epoch and kind.

pub mod difficulty;
pub mod error;
pub mod generator;
pub mod thresholds;
pub mod validator;

pub use difficulty::{difficulty, from_multiplier, to_multiplier};
pub use error::WorkError;
pub use generator::WorkGenerator;
pub use thresholds::WorkThresholds;
pub use validator::validate_work;

/// The result of PoW generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkNonce(pub u64);
