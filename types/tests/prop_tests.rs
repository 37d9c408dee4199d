use proptest::prelude::*;

use lattice_types::{Account, Amount, Block, BlockHash, Link, Signature, StateBlock, Vote};

fn state_block(account: [u8; 32], previous: [u8; 32], balance: u128, link: [u8; 32]) -> Block {
    Block::State(StateBlock {
        account: Account::new(account),
        previous: BlockHash::new(previous),
        representative: Account::new(account),
        balance: Amount::raw(balance),
        link: Link::new(link),
        signature: Signature::default(),
        work: 0,
    })
}

proptest! {
    /// BlockHash::is_zero is true only for all-zero bytes.
    #[test]
    fn block_hash_is_zero_correct(bytes in prop::array::uniform32(0u8..)) {
        let hash = BlockHash::new(bytes);
        prop_assert_eq!(hash.is_zero(), bytes == [0u8; 32]);
    }

    /// Hex encoding parses back to the same hash.
    #[test]
    fn block_hash_hex_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let hash = BlockHash::new(bytes);
        prop_assert_eq!(BlockHash::decode_hex(&hash.encode_hex()).unwrap(), hash);
    }

    /// A block survives bincode storage with the same hash.
    #[test]
    fn block_bincode_keeps_hash(
        account in prop::array::uniform32(0u8..),
        previous in prop::array::uniform32(0u8..),
        balance in any::<u128>(),
        link in prop::array::uniform32(0u8..),
    ) {
        let block = state_block(account, previous, balance, link);
        let encoded = bincode::serialize(&block).unwrap();
        let decoded: Block = bincode::deserialize(&encoded).unwrap();
        prop_assert_eq!(decoded.hash(), block.hash());
    }

    /// Changing any hashed field changes the hash.
    #[test]
    fn block_hash_sensitive_to_balance(balance in 0u128..u128::MAX) {
        let a = state_block([1; 32], [2; 32], balance, [3; 32]);
        let b = state_block([1; 32], [2; 32], balance + 1, [3; 32]);
        prop_assert_ne!(a.hash(), b.hash());
    }

    /// Root is the account exactly when previous is zero.
    #[test]
    fn root_is_previous_or_account(previous in prop::array::uniform32(0u8..)) {
        let block = state_block([7; 32], previous, 1, [0; 32]);
        let root = block.root();
        if previous == [0u8; 32] {
            prop_assert_eq!(root.as_bytes(), &[7u8; 32]);
        } else {
            prop_assert_eq!(root.as_bytes(), &previous);
        }
    }

    /// Packed vote timestamps keep the clock and the duration apart.
    #[test]
    fn vote_timestamp_packing(ms in 0u64..(u64::MAX - 16), duration in 0u8..15) {
        let packed = Vote::pack_timestamp(ms, duration);
        prop_assert_eq!(packed & 0xf, duration as u64);
        prop_assert_eq!(packed & !0xf, ms & !0xf);
        prop_assert_ne!(packed, Vote::FINAL_TIMESTAMP);
    }

    /// Amount: checked_sub returns None when b > a.
    #[test]
    fn amount_checked_sub_underflow(a in 0u128..1_000_000, b in 0u128..1_000_000) {
        let result = Amount::raw(a).checked_sub(Amount::raw(b));
        if b > a {
            prop_assert!(result.is_none());
        } else {
            prop_assert_eq!(result, Some(Amount::raw(a - b)));
        }
    }

    /// Amount big-endian bytes roundtrip.
    #[test]
    fn amount_be_bytes(raw in any::<u128>()) {
        let amount = Amount::raw(raw);
        prop_assert_eq!(Amount::from_be_bytes(amount.to_be_bytes()), amount);
    }
}
