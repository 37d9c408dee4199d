//! PoW validation.

use lattice_types::Root;

use crate::difficulty::difficulty;

/// Validate that a work nonce meets the minimum difficulty for a root.
pub fn validate_work(root: &Root, work: u64, min_difficulty: u64) -> bool {
    difficulty(root, work) >= min_difficulty
}
