//! Epoch-aware PoW difficulty thresholds.
//!
//! Epoch 0 and 1 blocks all share one threshold. Epoch 2 raised the bar for
//! sends and changes and lowered it for receives, opens and epoch blocks,
//! since receiving is what a spammed account does.

use lattice_types::{Block, BlockDetails, Epoch};

use crate::difficulty::difficulty;

/// Per-epoch PoW thresholds.
///
/// Higher threshold values = harder work required.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkThresholds {
    pub epoch_1: u64,
    pub epoch_2: u64,
    pub epoch_2_receive: u64,
}

impl WorkThresholds {
    pub const fn new(epoch_1: u64, epoch_2: u64, epoch_2_receive: u64) -> Self {
        Self {
            epoch_1,
            epoch_2,
            epoch_2_receive,
        }
    }

    pub const fn publish_full() -> Self {
        Self::new(0xffff_ffc0_0000_0000, 0xffff_fff8_0000_0000, 0xffff_fe00_0000_0000)
    }

    pub const fn publish_beta() -> Self {
        Self::new(0xffff_f000_0000_0000, 0xffff_f000_0000_0000, 0xffff_e000_0000_0000)
    }

    /// Low thresholds so tests can generate work in microseconds.
    pub const fn publish_dev() -> Self {
        Self::new(0xfe00_0000_0000_0000, 0xffc0_0000_0000_0000, 0xf000_0000_0000_0000)
    }

    /// The highest threshold any block may need.
    pub fn threshold_max(&self) -> u64 {
        self.epoch_1.max(self.epoch_2).max(self.epoch_2_receive)
    }

    /// The lowest threshold any block may need; cheap pre-filter for unknown
    /// blocks whose details are not yet known.
    pub fn threshold_entry(&self) -> u64 {
        self.epoch_1.min(self.epoch_2).min(self.epoch_2_receive)
    }

    /// Threshold for a block once the ledger knows its details.
    pub fn threshold(&self, details: &BlockDetails) -> u64 {
        match details.epoch {
            Epoch::Epoch2 => {
                if details.is_receive || details.is_epoch {
                    self.epoch_2_receive
                } else {
                    self.epoch_2
                }
            }
            Epoch::Epoch0 | Epoch::Epoch1 => self.epoch_1,
        }
    }

    /// Whether `block` carries enough work for `details`.
    pub fn is_valid_pow(&self, block: &Block, details: &BlockDetails) -> bool {
        difficulty(&block.root(), block.work()) >= self.threshold(details)
    }

    /// Whether the work clears the entry threshold, before ledger lookup.
    pub fn validate_entry_block(&self, block: &Block) -> bool {
        difficulty(&block.root(), block.work()) >= self.threshold_entry()
    }
}

impl Default for WorkThresholds {
    fn default() -> Self {
        Self::publish_full()
    }
}
