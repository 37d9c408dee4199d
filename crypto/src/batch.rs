//! Batched signature verification.
//!
//! The block processor and vote processor verify many signatures at once.
//! Splitting the batch across the rayon pool keeps the single processing
//! thread from becoming the bottleneck.

use lattice_types::{PublicKey, Signature};
use rayon::prelude::*;

use crate::sign::verify_signature;

/// One signature to check: a 32-byte digest, its signature and the signer.
#[derive(Clone, Debug)]
pub struct SignatureCheck {
    pub message: [u8; 32],
    pub signature: Signature,
    pub public_key: PublicKey,
}

/// Below this size the batch is verified on the calling thread.
const PARALLEL_THRESHOLD: usize = 8;

/// Verify every entry, returning one flag per entry in input order.
pub fn verify_batch(checks: &[SignatureCheck]) -> Vec<bool> {
    if checks.len() < PARALLEL_THRESHOLD {
        return checks.iter().map(verify_one).collect();
    }
    checks.par_iter().map(verify_one).collect()
}

fn verify_one(check: &SignatureCheck) -> bool {
    verify_signature(&check.message, &check.signature, &check.public_key)
}
