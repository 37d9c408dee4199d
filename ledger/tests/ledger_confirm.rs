mod common;

use common::{key, TestLedger};
use lattice_ledger::LedgerError;
use lattice_types::{Amount, BlockHash, COIN_RAW};
use lattice_utils::{DetailType, Direction, StatType};

const QUORUM: Amount = Amount::raw(1_000_000 * COIN_RAW);

#[test]
fn single() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let genesis_account = t.ledger.constants.genesis_account;
    let genesis_hash = t.ledger.constants.genesis_hash();
    let send1 = t.lattice.genesis().send(key1.account(), Amount::raw(100));

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send1]);
    assert!(!t.ledger.block_confirmed(&txn, &send1.hash()));

    let confirmed = t.ledger.confirm(&mut txn, send1.hash());
    assert_eq!(confirmed.len(), 1);
    assert!(t.ledger.block_confirmed(&txn, &send1.hash()));
    let height = t.ledger.confirmation_height(&txn, &genesis_account);
    assert_eq!(height.height, 2);
    assert_eq!(height.frontier, send1.hash());

    assert!(matches!(
        t.ledger.rollback(&mut txn, &genesis_hash),
        Err(LedgerError::BlockConfirmed(_))
    ));
    assert!(matches!(
        t.ledger.rollback(&mut txn, &send1.hash()),
        Err(LedgerError::BlockConfirmed(_))
    ));
    assert_eq!(
        t.stats.count(
            StatType::ConfirmationHeight,
            DetailType::BlocksConfirmed,
            Direction::In
        ),
        1
    );
    assert_eq!(t.ledger.cemented_count(), 2);
}

#[test]
fn confirming_twice_is_a_no_op() {
    let mut t = TestLedger::new();
    let send = t.lattice.genesis().send(key(1).account(), Amount::raw(1));
    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send]);
    assert_eq!(t.ledger.confirm(&mut txn, send.hash()).len(), 1);
    assert!(t.ledger.confirm(&mut txn, send.hash()).is_empty());
    assert_eq!(t.ledger.cemented_count(), 2);
}

#[test]
fn send_receive_between_2_accounts() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let genesis_account = t.ledger.constants.genesis_account;

    let send1 = t
        .lattice
        .genesis()
        .send_all_except(key1.account(), QUORUM + Amount::raw(2));
    let open1 = t.lattice.account(&key1).receive(&send1);
    let send2 = t
        .lattice
        .account(&key1)
        .send_all_except(genesis_account, Amount::raw(1000));
    let send3 = t.lattice.account(&key1).send(genesis_account, Amount::raw(100));
    let send4 = t.lattice.account(&key1).send(genesis_account, Amount::raw(400));
    let receive1 = t.lattice.genesis().receive(&send2);
    let receive2 = t.lattice.genesis().receive(&send3);
    let receive3 = t.lattice.genesis().receive(&send4);
    let send5 = t
        .lattice
        .genesis()
        .send_all_except(key1.account(), QUORUM + Amount::raw(1));
    let receive4 = t.lattice.account(&key1).receive(&send5);
    let key2 = key(2);
    let send6 = t.lattice.genesis().send(key2.account(), Amount::raw(1));

    let mut txn = t.txn();
    t.process_all(
        &mut txn,
        &[
            &send1, &open1, &send2, &receive1, &send3, &send4, &receive2, &receive3, &send5,
            &send6,
        ],
    );
    assert_eq!(t.ledger.confirmation_height(&txn, &genesis_account).height, 1);
    assert_eq!(t.ledger.confirmation_height(&txn, &key1.account()).height, 0);

    t.process_all(&mut txn, &[&receive4]);
    let confirmed = t.ledger.confirm(&mut txn, receive4.hash());

    assert_eq!(confirmed.len(), 10);
    assert_eq!(
        t.stats.count(
            StatType::ConfirmationHeight,
            DetailType::BlocksConfirmed,
            Direction::In
        ),
        10
    );
    assert_eq!(t.ledger.cemented_count(), 11);
    assert!(t.ledger.block_confirmed(&txn, &receive4.hash()));
    assert!(!t.ledger.block_confirmed(&txn, &send6.hash()));

    let genesis_height = t.ledger.confirmation_height(&txn, &genesis_account);
    assert_eq!(genesis_height.height, 6);
    assert_eq!(genesis_height.frontier, send5.hash());
    assert_eq!(
        t.ledger.account_info(&txn, &genesis_account).unwrap().block_count,
        7
    );
    let key1_height = t.ledger.confirmation_height(&txn, &key1.account());
    assert_eq!(key1_height.height, 5);
    assert_eq!(key1_height.frontier, receive4.hash());
}

#[test]
fn multiple_accounts() {
    let mut t = TestLedger::new();
    let (key1, key2, key3) = (key(1), key(2), key(3));
    let genesis_account = t.ledger.constants.genesis_account;

    let send1 = t
        .lattice
        .genesis()
        .send_all_except(key1.account(), QUORUM + Amount::raw(300));
    let send2 = t.lattice.genesis().send(key2.account(), Amount::raw(100));
    let send3 = t.lattice.genesis().send(key3.account(), Amount::raw(100));
    let open1 = t.lattice.account(&key1).receive(&send1);
    let open2 = t.lattice.account(&key2).receive(&send2);
    let open3 = t.lattice.account(&key3).receive(&send3);
    let send4 = t
        .lattice
        .account(&key1)
        .send_all_except(key2.account(), Amount::raw(50));
    let send5 = t.lattice.account(&key1).send(key2.account(), Amount::raw(40));
    let receive1 = t.lattice.account(&key2).receive(&send4);
    let send6 = t
        .lattice
        .account(&key2)
        .send_all_except(key3.account(), Amount::raw(10));
    let receive2 = t.lattice.account(&key2).receive(&send5);

    let mut txn = t.txn();
    t.process_all(
        &mut txn,
        &[
            &send1, &send2, &send3, &open1, &open2, &open3, &send4, &send5, &receive1, &send6,
            &receive2,
        ],
    );
    for account in [key1.account(), key2.account(), key3.account()] {
        assert_eq!(t.ledger.confirmation_height(&txn, &account).height, 0);
    }

    let receive3 = t.lattice.account(&key3).receive(&send6);
    t.process_all(&mut txn, &[&receive3]);
    let confirmed = t.ledger.confirm(&mut txn, receive3.hash());

    assert_eq!(confirmed.len(), 10);
    assert_eq!(t.ledger.cemented_count(), 11);
    assert_eq!(t.ledger.confirmation_height(&txn, &genesis_account).height, 4);
    assert_eq!(t.ledger.confirmation_height(&txn, &key1.account()).height, 2);
    assert_eq!(t.ledger.confirmation_height(&txn, &key2.account()).height, 3);
    assert_eq!(t.ledger.confirmation_height(&txn, &key3.account()).height, 2);
    assert!(!t.ledger.block_confirmed(&txn, &send5.hash()));
    assert!(!t.ledger.block_confirmed(&txn, &receive2.hash()));

    // Dependencies are cemented before the blocks that need them.
    let position = |hash: BlockHash| confirmed.iter().position(|b| b.hash() == hash).unwrap();
    assert!(position(send1.hash()) < position(open1.hash()));
    assert!(position(send4.hash()) < position(receive1.hash()));
    assert!(position(send6.hash()) < position(receive3.hash()));
}

#[test]
fn confirm_max_bounds_each_pass() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let mut blocks = Vec::new();
    for _ in 0..6 {
        blocks.push(t.lattice.genesis().send(key1.account(), Amount::raw(1)));
    }
    let mut txn = t.txn();
    t.process_all(&mut txn, &blocks.iter().collect::<Vec<_>>());
    let last = blocks.last().unwrap().hash();

    let mut passes = 0;
    let mut total = 0;
    while !t.ledger.block_confirmed(&txn, &last) {
        let batch = t.ledger.confirm_max(&mut txn, last, 2);
        assert!(batch.len() <= 2);
        total += batch.len();
        passes += 1;
        assert!(passes < 20, "confirm_max made no progress");
    }
    assert_eq!(total, 6);
    assert_eq!(t.ledger.cemented_count(), 7);
}

#[test]
fn confirmation_height_never_decreases() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let genesis_account = t.ledger.constants.genesis_account;
    let send1 = t.lattice.genesis().send(key1.account(), Amount::raw(1));
    let send2 = t.lattice.genesis().send(key1.account(), Amount::raw(1));
    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send1, &send2]);

    t.ledger.confirm(&mut txn, send2.hash());
    assert_eq!(t.ledger.confirmation_height(&txn, &genesis_account).height, 3);
    assert_eq!(
        t.ledger
            .write_confirmation_height(&mut txn, &genesis_account, 2, send1.hash()),
        0
    );
    t.ledger.confirm(&mut txn, send1.hash());
    assert_eq!(t.ledger.confirmation_height(&txn, &genesis_account).height, 3);
    assert_eq!(t.ledger.cemented_count(), 3);
}
