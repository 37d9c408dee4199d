use proptest::prelude::*;

use lattice_types::Root;
use lattice_work::{difficulty, validate_work, WorkGenerator};

proptest! {
    /// Generated PoW always passes its own validation.
    #[test]
    fn generated_pow_always_valid(
        root_byte in 0u8..=255,
        threshold in 0u64..0xf000_0000_0000_0000,
    ) {
        let root = Root::new([root_byte; 32]);
        let nonce = WorkGenerator.generate(&root, threshold).unwrap();
        prop_assert!(validate_work(&root, nonce.0, threshold));
    }

    /// Zero difficulty always passes regardless of nonce.
    #[test]
    fn zero_difficulty_always_passes(
        root_bytes in prop::array::uniform32(0u8..),
        nonce in any::<u64>(),
    ) {
        prop_assert!(validate_work(&Root::new(root_bytes), nonce, 0));
    }

    /// Validation agrees with the difficulty function.
    #[test]
    fn validation_matches_difficulty(
        root_bytes in prop::array::uniform32(0u8..),
        nonce in any::<u64>(),
        threshold in any::<u64>(),
    ) {
        let root = Root::new(root_bytes);
        prop_assert_eq!(
            validate_work(&root, nonce, threshold),
            difficulty(&root, nonce) >= threshold
        );
    }
}
