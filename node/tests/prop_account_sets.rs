use std::time::Instant;

use proptest::prelude::*;

use lattice_node::bootstrap::{AccountSets, AccountSetsConfig};
use lattice_types::{Account, BlockHash};

#[derive(Clone, Debug)]
enum Op {
    Up(u8),
    Down(u8),
    Block(u8, u8),
    Unblock(u8),
    UnblockDependency(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u8..12).prop_map(Op::Up),
        (1u8..12).prop_map(Op::Down),
        (1u8..12, 1u8..4).prop_map(|(a, d)| Op::Block(a, d)),
        (1u8..12).prop_map(Op::Unblock),
        (1u8..4).prop_map(Op::UnblockDependency),
    ]
}

fn account(n: u8) -> Account {
    Account::new([n; 32])
}

fn dependency(n: u8) -> BlockHash {
    BlockHash::new([n; 32])
}

proptest! {
    /// An account is never both prioritized and blocked, and both sets
    /// respect their limits.
    #[test]
    fn sets_stay_disjoint_and_bounded(ops in prop::collection::vec(op(), 1..200)) {
        let mut sets = AccountSets::new(AccountSetsConfig {
            priorities_max: 6,
            blocking_max: 4,
            ..AccountSetsConfig::default()
        });
        for op in ops {
            match op {
                Op::Up(a) => { sets.priority_up(&account(a)); }
                Op::Down(a) => { sets.priority_down(&account(a)); }
                Op::Block(a, d) => sets.block(account(a), dependency(d)),
                Op::Unblock(a) => { sets.unblock(account(a), None); }
                Op::UnblockDependency(d) => { sets.unblock_dependency(&dependency(d)); }
            }
            prop_assert!(sets.priority_len() <= 6);
            prop_assert!(sets.blocked_len() <= 4);
            for n in 1u8..12 {
                prop_assert!(!(sets.prioritized(&account(n)) && sets.blocked(&account(n))));
            }
        }
        if let Some(next) = sets.next(Instant::now()) {
            prop_assert!(sets.prioritized(&next));
            prop_assert!(!sets.blocked(&next));
        }
    }
}
