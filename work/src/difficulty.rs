//! Work difficulty of a (root, nonce) pair and multiplier conversions.

use lattice_crypto::blake2b_256_multi;
use lattice_types::Root;

/// Difficulty of `work` for `root`: the first eight digest bytes, little endian.
pub fn difficulty(root: &Root, work: u64) -> u64 {
    let hash = blake2b_256_multi(&[root.as_bytes(), &work.to_le_bytes()]);
    let mut value = [0u8; 8];
    value.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(value)
}

/// How many times harder `difficulty` is than `base`.
///
/// The "difficulty inverse" is `u64::MAX - threshold`; the multiplier is the
/// ratio of the inverses.
pub fn to_multiplier(difficulty: u64, base: u64) -> f64 {
    let base_inv = (u64::MAX - base) as f64;
    let inv = (u64::MAX - difficulty).max(1) as f64;
    base_inv / inv
}

/// The threshold that is `multiplier` times harder than `base`.
pub fn from_multiplier(multiplier: f64, base: u64) -> u64 {
    if base == 0 {
        return 0;
    }
    let difficulty_inv = u64::MAX - base;
    let scaled_inv = (difficulty_inv as f64 / multiplier) as u64;
    u64::MAX - scaled_inv
}
