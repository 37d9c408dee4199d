mod common;

use common::{key, TestLedger};
use lattice_ledger::LedgerError;
use lattice_types::{Amount, BlockHash, PendingKey};
use lattice_utils::{DetailType, Direction, StatType};

#[test]
fn rollback_of_unreceived_send_restores_sender() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let genesis_account = t.ledger.constants.genesis_account;
    let send = t.lattice.genesis().send(key1.account(), Amount::raw(50));

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send]);
    let rolled_back = t.ledger.rollback(&mut txn, &send.hash()).unwrap();

    assert_eq!(rolled_back.len(), 1);
    assert_eq!(rolled_back[0].hash(), send.hash());
    assert!(!t.ledger.block_exists(&txn, &send.hash()));
    assert_eq!(t.ledger.account_balance(&txn, &genesis_account), Amount::MAX);
    assert_eq!(t.ledger.weight(&genesis_account), Amount::MAX);
    assert_eq!(
        t.ledger.latest(&txn, &genesis_account),
        Some(t.ledger.constants.genesis_hash())
    );
    assert!(t
        .ledger
        .pending_info(&txn, &PendingKey::new(key1.account(), send.hash()))
        .is_none());
    assert_eq!(
        t.ledger
            .successor(&txn, &send.qualified_root()),
        None
    );
    assert_eq!(t.ledger.block_count(), 1);
    assert_eq!(
        t.stats
            .count(StatType::Rollback, DetailType::Send, Direction::In),
        1
    );
}

#[test]
fn rollback_of_received_send_unwinds_destination() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send1 = t.lattice.genesis().send(key1.account(), Amount::raw(50));
    let open = t.lattice.account(&key1).receive(&send1);
    let send2 = t.lattice.genesis().send(key1.account(), Amount::raw(30));
    let receive = t.lattice.account(&key1).receive(&send2);

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send1, &open, &send2, &receive]);
    assert_eq!(t.ledger.weight(&key1.account()), Amount::raw(80));

    let rolled_back = t.ledger.rollback(&mut txn, &send1.hash()).unwrap();
    let hashes: Vec<BlockHash> = rolled_back.iter().map(|b| b.hash()).collect();

    // Everything built on send1 goes, receivers first.
    assert_eq!(hashes.len(), 4);
    assert!(hashes.contains(&open.hash()));
    assert!(hashes.contains(&receive.hash()));
    assert!(hashes.contains(&send2.hash()));
    assert_eq!(hashes.last(), Some(&send1.hash()));
    assert!(
        hashes.iter().position(|h| *h == receive.hash())
            < hashes.iter().position(|h| *h == send2.hash())
    );

    assert!(t.ledger.account_info(&txn, &key1.account()).is_none());
    assert_eq!(t.ledger.weight(&key1.account()), Amount::ZERO);
    assert_eq!(t.ledger.account_count(), 1);
    assert_eq!(t.ledger.block_count(), 1);
    assert_eq!(
        t.ledger.account_receivable(&txn, &key1.account()),
        Amount::ZERO
    );
}

#[test]
fn rollback_of_receive_restores_pending() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send1 = t.lattice.genesis().send(key1.account(), Amount::raw(50));
    let open = t.lattice.account(&key1).receive(&send1);
    let send2 = t.lattice.genesis().send(key1.account(), Amount::raw(30));
    let receive = t.lattice.account(&key1).receive(&send2);

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send1, &open, &send2, &receive]);

    let rolled_back = t.ledger.rollback(&mut txn, &receive.hash()).unwrap();
    assert_eq!(rolled_back.len(), 1);

    let pending = t
        .ledger
        .pending_info(&txn, &PendingKey::new(key1.account(), send2.hash()))
        .unwrap();
    assert_eq!(pending.amount, Amount::raw(30));
    assert_eq!(pending.source, t.ledger.constants.genesis_account);
    let info = t.ledger.account_info(&txn, &key1.account()).unwrap();
    assert_eq!(info.head, open.hash());
    assert_eq!(info.balance, Amount::raw(50));
    assert_eq!(info.block_count, 1);
    assert_eq!(t.ledger.weight(&key1.account()), Amount::raw(50));

    // The same receive applies again.
    t.process_all(&mut txn, &[&receive]);
    assert_eq!(t.ledger.account_balance(&txn, &key1.account()), Amount::raw(80));
}

#[test]
fn rollback_of_change_restores_representative() {
    let mut t = TestLedger::new();
    let genesis_account = t.ledger.constants.genesis_account;
    let rep = key(4).account();
    let change = t.lattice.genesis().change(rep);

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&change]);
    t.ledger.rollback(&mut txn, &change.hash()).unwrap();

    let info = t.ledger.account_info(&txn, &genesis_account).unwrap();
    assert_eq!(info.representative, genesis_account);
    assert_eq!(t.ledger.weight(&genesis_account), Amount::MAX);
    assert_eq!(t.ledger.weight(&rep), Amount::ZERO);
}

#[test]
fn rollback_of_cemented_block_fails_and_changes_nothing() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send1 = t.lattice.genesis().send(key1.account(), Amount::raw(50));
    let send2 = t.lattice.genesis().send(key1.account(), Amount::raw(50));

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send1, &send2]);
    t.ledger.confirm(&mut txn, send1.hash());
    let blocks = t.ledger.block_count();

    let result = t.ledger.rollback(&mut txn, &send1.hash());
    assert!(matches!(result, Err(LedgerError::BlockConfirmed(h)) if h == send1.hash()));
    assert_eq!(t.ledger.block_count(), blocks);
    assert!(t.ledger.block_exists(&txn, &send2.hash()));

    // The uncemented successor alone may still go.
    let rolled_back = t.ledger.rollback(&mut txn, &send2.hash()).unwrap();
    assert_eq!(rolled_back.len(), 1);
    assert_eq!(
        t.ledger.latest(&txn, &t.ledger.constants.genesis_account),
        Some(send1.hash())
    );
}

#[test]
fn rollback_of_unknown_block_fails() {
    let t = TestLedger::new();
    let mut txn = t.txn();
    let missing = BlockHash::new([7; 32]);
    assert!(matches!(
        t.ledger.rollback(&mut txn, &missing),
        Err(LedgerError::BlockNotFound(h)) if h == missing
    ));
}

#[test]
fn pruned_blocks_count_as_confirmed() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send1 = t.lattice.genesis().send(key1.account(), Amount::raw(1));
    let send2 = t.lattice.genesis().send(key1.account(), Amount::raw(1));

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send1, &send2]);
    t.ledger.confirm(&mut txn, send2.hash());

    let pruned = t.ledger.prune(&mut txn, &send2.hash(), 10).unwrap();
    assert_eq!(pruned, 1);
    assert_eq!(t.ledger.pruned_count(), 1);
    assert!(!t.ledger.block_exists(&txn, &send1.hash()));
    assert!(t.ledger.block_or_pruned_exists(&txn, &send1.hash()));
    assert!(t.ledger.block_confirmed(&txn, &send1.hash()));
    assert!(t.ledger.block_exists(&txn, &send2.hash()));
    assert_eq!(t.ledger.unconfirmed_count(), 0);
}
