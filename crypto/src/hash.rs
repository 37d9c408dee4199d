//! Blake2b-256 digests.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

fn digest<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> [u8; 32] {
    let hasher = parts
        .into_iter()
        .fold(Blake2b256::new(), |hasher, part| hasher.chain_update(part));
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

pub fn blake2b_256(data: &[u8]) -> [u8; 32] {
    digest([data])
}

/// Digest of the concatenation of `parts`, without building it.
pub fn blake2b_256_multi(parts: &[&[u8]]) -> [u8; 32] {
    digest(parts.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_input_hashes_like_joined_input() {
        assert_eq!(
            blake2b_256(b"lattice-node"),
            blake2b_256_multi(&[b"lattice", b"-", b"node"])
        );
        assert_eq!(blake2b_256(b""), blake2b_256_multi(&[]));
    }
}
