//! Ledger epochs.
//!
//! An account is upgraded from one epoch to the next by an epoch block signed
//! by the epoch signer. Epochs gate which block variants and work thresholds
//! are valid for an account.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Epoch {
    #[default]
    Epoch0,
    Epoch1,
    Epoch2,
}

impl Epoch {
    pub const MAX: Epoch = Epoch::Epoch2;

    pub fn as_u8(&self) -> u8 {
        match self {
            Epoch::Epoch0 => 0,
            Epoch::Epoch1 => 1,
            Epoch::Epoch2 => 2,
        }
    }

    pub fn from_u8(value: u8) -> Option<Epoch> {
        match value {
            0 => Some(Epoch::Epoch0),
            1 => Some(Epoch::Epoch1),
            2 => Some(Epoch::Epoch2),
            _ => None,
        }
    }

    /// Upgrades must go one epoch at a time.
    pub fn is_sequential(from: Epoch, to: Epoch) -> bool {
        to.as_u8() == from.as_u8() + 1
    }
}
