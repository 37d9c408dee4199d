//! Ed25519 signing and verification of messages, blocks and votes.

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use lattice_types::{Block, PrivateKey, PublicKey, Signature, Vote};

pub fn sign_message(message: &[u8], private_key: &PrivateKey) -> Signature {
    Signature(SigningKey::from_bytes(&private_key.0).sign(message).to_bytes())
}

/// Strict verification: non-canonical signatures and weak keys fail.
pub fn verify_signature(message: &[u8], signature: &Signature, public_key: &PublicKey) -> bool {
    VerifyingKey::from_bytes(&public_key.0).is_ok_and(|key| {
        key.verify_strict(message, &ed25519_dalek::Signature::from_bytes(&signature.0))
            .is_ok()
    })
}

/// Sign the block hash in place.
pub fn sign_block(block: &mut Block, private_key: &PrivateKey) {
    let hash = block.hash();
    block.set_signature(sign_message(hash.as_bytes(), private_key));
}

/// Check the block signature against `signer`.
///
/// The signer is the block's account, or the epoch signer for epoch blocks;
/// picking the right one needs ledger context and is the caller's job.
pub fn validate_block_signature(block: &Block, signer: &PublicKey) -> bool {
    verify_signature(block.hash().as_bytes(), block.signature(), signer)
}

/// Sign a vote in place with the representative's key.
pub fn sign_vote(vote: &mut Vote, private_key: &PrivateKey) {
    vote.signature = sign_message(vote.hash().as_bytes(), private_key);
}

/// Check a vote signature against its voting account.
pub fn validate_vote(vote: &Vote) -> bool {
    verify_signature(
        vote.hash().as_bytes(),
        &vote.signature,
        &PublicKey::from(vote.voting_account),
    )
}
