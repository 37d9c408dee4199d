//! Ed25519 key pairs.

use ed25519_dalek::SigningKey;
use lattice_types::{KeyPair, PrivateKey, PublicKey};
use rand::rngs::OsRng;

use crate::hash::blake2b_256_multi;

fn from_signing_key(signing_key: &SigningKey) -> KeyPair {
    KeyPair {
        public: PublicKey(signing_key.verifying_key().to_bytes()),
        private: PrivateKey(signing_key.to_bytes()),
    }
}

pub fn generate_keypair() -> KeyPair {
    from_signing_key(&SigningKey::generate(&mut OsRng))
}

pub fn keypair_from_private(private: PrivateKey) -> KeyPair {
    from_signing_key(&SigningKey::from_bytes(&private.0))
}

/// Treat a 32-byte seed directly as the secret key.
pub fn keypair_from_seed(seed: &[u8; 32]) -> KeyPair {
    keypair_from_private(PrivateKey(*seed))
}

/// Key number `index` under `seed`: the secret is `blake2b(seed ‖ index_be)`.
/// Dev genesis and test accounts come from here.
pub fn deterministic_key(seed: &[u8; 32], index: u32) -> KeyPair {
    keypair_from_private(PrivateKey(blake2b_256_multi(&[seed, &index.to_be_bytes()])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuilding_from_the_secret_gives_the_same_public_key() {
        let generated = generate_keypair();
        let rebuilt = keypair_from_private(PrivateKey(generated.private.0));
        assert_eq!(generated.public, rebuilt.public);
    }

    #[test]
    fn derived_keys_differ_per_index_and_repeat_per_seed() {
        let seed = [5u8; 32];
        let first = deterministic_key(&seed, 0);
        assert_ne!(first.public, deterministic_key(&seed, 1).public);
        assert_eq!(first.public, deterministic_key(&seed, 0).public);
        assert_ne!(first.public, deterministic_key(&[6; 32], 0).public);
    }

    #[test]
    fn seed_is_the_secret() {
        let pair = keypair_from_seed(&[42; 32]);
        assert_eq!(pair.private.0, [42; 32]);
    }
}
