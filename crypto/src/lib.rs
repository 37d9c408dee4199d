//! Cryptographic primitives for the lattice node.
//!
//! - **Ed25519** for signing and signature verification
//! - **Blake2b** for hashing and deterministic key derivation
//! - Batched, parallel signature verification for the block and vote pipelines
//! - `lat_` account addresses with a Blake2b checksum

pub mod address;
pub mod batch;
pub mod hash;
pub mod keys;
pub mod sign;

pub use address::{decode_account, encode_account, validate_account};
pub use batch::{verify_batch, SignatureCheck};
pub use hash::{blake2b_256, blake2b_256_multi};
pub use keys::{deterministic_key, generate_keypair, keypair_from_private, keypair_from_seed};
pub use sign::{
    sign_block, sign_message, sign_vote, validate_block_signature, validate_vote,
    verify_signature,
};
