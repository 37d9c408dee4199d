mod common;

use common::{finish, key, TestLedger};
use lattice_crypto::{keypair_from_private, sign_block};
use lattice_ledger::{BlockStatus, LatticeBuilder};
use lattice_types::{
    Amount, Block, BlockDetails, Epoch, KeyPair, PendingKey, PrivateKey, SendBlock, Signature,
    StateBlock,
};
use lattice_utils::{DetailType, Direction, StatType};

#[test]
fn send_updates_balances_and_weights() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let genesis_account = t.ledger.constants.genesis_account;
    let send = t.lattice.genesis().send(key1.account(), Amount::raw(500));

    let mut txn = t.txn();
    let saved = t.ledger.process(&mut txn, &send).unwrap();

    assert_eq!(saved.height(), 2);
    assert_eq!(saved.account(), genesis_account);
    assert!(saved.is_send());
    assert_eq!(
        t.ledger.account_balance(&txn, &genesis_account),
        Amount::MAX - Amount::raw(500)
    );
    assert_eq!(
        t.ledger.account_receivable(&txn, &key1.account()),
        Amount::raw(500)
    );
    assert_eq!(t.ledger.weight(&genesis_account), Amount::MAX - Amount::raw(500));
    assert_eq!(t.ledger.amount(&txn, &send.hash()), Some(Amount::raw(500)));
    assert_eq!(t.ledger.block_count(), 2);
    assert_eq!(t.ledger.unconfirmed_count(), 1);
    assert_eq!(
        t.stats
            .count(StatType::Ledger, DetailType::Progress, Direction::In),
        1
    );
}

#[test]
fn open_moves_weight_to_new_representative() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send = t.lattice.genesis().send(key1.account(), Amount::raw(500));
    let open = t.lattice.account(&key1).receive(&send);

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send, &open]);

    assert_eq!(t.ledger.weight(&key1.account()), Amount::raw(500));
    assert_eq!(t.ledger.account_receivable(&txn, &key1.account()), Amount::ZERO);
    assert_eq!(t.ledger.account_count(), 2);
    let info = t.ledger.account_info(&txn, &key1.account()).unwrap();
    assert_eq!(info.head, open.hash());
    assert_eq!(info.open_block, open.hash());
    assert_eq!(info.block_count, 1);
    assert_eq!(info.representative, key1.account());
}

#[test]
fn change_moves_weight() {
    let mut t = TestLedger::new();
    let rep = key(7).account();
    let genesis_account = t.ledger.constants.genesis_account;
    let change = t.lattice.genesis().change(rep);

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&change]);

    assert_eq!(t.ledger.weight(&rep), Amount::MAX);
    assert_eq!(t.ledger.weight(&genesis_account), Amount::ZERO);
    assert_eq!(t.ledger.representative_block(&txn, &change.hash()), change.hash());
}

#[test]
fn gap_previous_then_progress() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send1 = t.lattice.genesis().send(key1.account(), Amount::raw(1));
    let send2 = t.lattice.genesis().send(key1.account(), Amount::raw(1));

    let mut txn = t.txn();
    assert_eq!(
        t.ledger.process(&mut txn, &send2).unwrap_err(),
        BlockStatus::GapPrevious
    );
    t.process_all(&mut txn, &[&send1, &send2]);
    assert_eq!(t.ledger.latest(&txn, &t.ledger.constants.genesis_account), Some(send2.hash()));
}

#[test]
fn gap_source() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send = t.lattice.genesis().send(key1.account(), Amount::raw(1));
    let open = t.lattice.account(&key1).receive(&send);

    let mut txn = t.txn();
    assert_eq!(
        t.ledger.process(&mut txn, &open).unwrap_err(),
        BlockStatus::GapSource
    );
    assert!(BlockStatus::GapSource.is_gap());
}

#[test]
fn duplicate_is_old_and_changes_nothing() {
    let mut t = TestLedger::new();
    let genesis_account = t.ledger.constants.genesis_account;
    let send = t.lattice.genesis().send(key(1).account(), Amount::raw(10));

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send]);
    let balance = t.ledger.account_balance(&txn, &genesis_account);
    let blocks = t.ledger.block_count();

    assert_eq!(t.ledger.process(&mut txn, &send).unwrap_err(), BlockStatus::Old);
    assert_eq!(t.ledger.account_balance(&txn, &genesis_account), balance);
    assert_eq!(t.ledger.block_count(), blocks);
    assert_eq!(
        t.stats.count(StatType::Ledger, DetailType::Old, Direction::In),
        1
    );
}

#[test]
fn competing_block_is_a_fork() {
    let mut t = TestLedger::new();
    let mut other = LatticeBuilder::new(&t.ledger.constants);
    let send = t.lattice.genesis().send(key(1).account(), Amount::raw(10));
    let fork = other.genesis().send(key(2).account(), Amount::raw(10));
    assert_eq!(send.qualified_root(), fork.qualified_root());

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send]);
    assert_eq!(t.ledger.process(&mut txn, &fork).unwrap_err(), BlockStatus::Fork);
    assert_eq!(
        t.ledger.successor(&txn, &fork.qualified_root()),
        Some(send.hash())
    );
}

#[test]
fn second_open_is_a_fork() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send1 = t.lattice.genesis().send(key1.account(), Amount::raw(10));
    let send2 = t.lattice.genesis().send(key1.account(), Amount::raw(10));
    let open = t.lattice.account(&key1).receive(&send1);

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send1, &send2, &open]);

    let mut second_open = Block::State(StateBlock {
        account: key1.account(),
        previous: Default::default(),
        representative: key1.account(),
        balance: Amount::raw(10),
        link: send2.hash().into(),
        signature: Signature::default(),
        work: 0,
    });
    finish(&t.ledger.constants, &mut second_open, &key1);
    assert_eq!(
        t.ledger.process(&mut txn, &second_open).unwrap_err(),
        BlockStatus::Fork
    );
}

#[test]
fn wrong_signature_is_rejected() {
    let mut t = TestLedger::new();
    let mut send = t.lattice.genesis().send(key(1).account(), Amount::raw(1));
    sign_block(&mut send, &key(9).private);

    let mut txn = t.txn();
    assert_eq!(
        t.ledger.process(&mut txn, &send).unwrap_err(),
        BlockStatus::BadSignature
    );
}

#[test]
fn insufficient_work_is_rejected() {
    let mut t = TestLedger::new();
    let mut send = t.lattice.genesis().send(key(1).account(), Amount::raw(1));
    let details = BlockDetails::new(Epoch::Epoch0, true, false, false);
    let mut nonce = 0;
    loop {
        send.set_work(nonce);
        if !t.ledger.constants.work.is_valid_pow(&send, &details) {
            break;
        }
        nonce += 1;
    }

    let mut txn = t.txn();
    assert_eq!(
        t.ledger.process(&mut txn, &send).unwrap_err(),
        BlockStatus::InsufficientWork
    );
}

#[test]
fn receive_with_wrong_amount_is_a_balance_mismatch() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send = t.lattice.genesis().send(key1.account(), Amount::raw(100));
    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send]);

    let mut open = Block::State(StateBlock {
        account: key1.account(),
        previous: Default::default(),
        representative: key1.account(),
        balance: Amount::raw(101),
        link: send.hash().into(),
        signature: Signature::default(),
        work: 0,
    });
    finish(&t.ledger.constants, &mut open, &key1);
    assert_eq!(
        t.ledger.process(&mut txn, &open).unwrap_err(),
        BlockStatus::BalanceMismatch
    );
}

#[test]
fn balance_change_without_link_is_a_balance_mismatch() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send = t.lattice.genesis().send(key1.account(), Amount::raw(100));
    let open = t.lattice.account(&key1).receive(&send);
    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send, &open]);

    let mut raise = Block::State(StateBlock {
        account: key1.account(),
        previous: open.hash(),
        representative: key1.account(),
        balance: Amount::raw(200),
        link: Default::default(),
        signature: Signature::default(),
        work: 0,
    });
    finish(&t.ledger.constants, &mut raise, &key1);
    assert_eq!(
        t.ledger.process(&mut txn, &raise).unwrap_err(),
        BlockStatus::BalanceMismatch
    );
}

#[test]
fn legacy_block_after_state_block_is_misplaced() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let state_send = t.lattice.genesis().send(key1.account(), Amount::raw(1));
    let legacy_send = t.lattice.genesis().legacy_send(key1.account(), Amount::raw(1));

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&state_send]);
    assert_eq!(
        t.ledger.process(&mut txn, &legacy_send).unwrap_err(),
        BlockStatus::BlockPosition
    );
}

#[test]
fn legacy_chain_is_accepted() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send = t.lattice.genesis().legacy_send(key1.account(), Amount::raw(50));
    let open = t.lattice.account(&key1).legacy_open(&send);
    let back = t
        .lattice
        .account(&key1)
        .legacy_send(t.ledger.constants.genesis_account, Amount::raw(20));
    let receive = t.lattice.genesis().legacy_receive(&back);
    let change = t.lattice.account(&key1).legacy_change(key(3).account());

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send, &open, &back, &receive, &change]);

    assert_eq!(t.ledger.account_balance(&txn, &key1.account()), Amount::raw(30));
    assert_eq!(t.ledger.weight(&key(3).account()), Amount::raw(30));
    assert_eq!(
        t.ledger.account_balance(&txn, &t.ledger.constants.genesis_account),
        Amount::MAX - Amount::raw(30)
    );
}

#[test]
fn legacy_send_raising_balance_is_negative_spend() {
    let mut t = TestLedger::new();
    let genesis_key = key_for_genesis(&t);
    let key1 = key(1);
    let send = t.lattice.genesis().legacy_send(key1.account(), Amount::raw(50));
    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send]);

    let mut negative = Block::Send(SendBlock {
        previous: send.hash(),
        destination: key1.account(),
        balance: Amount::MAX,
        signature: Signature::default(),
        work: 0,
    });
    finish(&t.ledger.constants, &mut negative, &genesis_key);
    assert_eq!(
        t.ledger.process(&mut txn, &negative).unwrap_err(),
        BlockStatus::NegativeSpend
    );
}

#[test]
fn epoch_upgrades_are_sequential() {
    let mut t = TestLedger::new();
    let genesis_account = t.ledger.constants.genesis_account;
    let epoch1 = t.lattice.genesis().epoch(Epoch::Epoch1);
    let epoch1_again = t.lattice.genesis().epoch(Epoch::Epoch1);

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&epoch1]);
    let info = t.ledger.account_info(&txn, &genesis_account).unwrap();
    assert_eq!(info.epoch, Epoch::Epoch1);
    assert_eq!(info.balance, Amount::MAX);
    assert!(t.ledger.block(&txn, &epoch1.hash()).unwrap().is_epoch());

    assert_eq!(
        t.ledger.process(&mut txn, &epoch1_again).unwrap_err(),
        BlockStatus::BlockPosition
    );
}

#[test]
fn epoch_may_not_change_representative() {
    let mut t = TestLedger::new();
    let genesis_account = t.ledger.constants.genesis_account;
    let genesis_key = key_for_genesis(&t);
    let mut block = Block::State(StateBlock {
        account: genesis_account,
        previous: t.ledger.constants.genesis_hash(),
        representative: key(5).account(),
        balance: Amount::MAX,
        link: t.ledger.constants.epochs.link(Epoch::Epoch1).unwrap(),
        signature: Signature::default(),
        work: 0,
    });
    finish(&t.ledger.constants, &mut block, &genesis_key);

    let mut txn = t.txn();
    assert_eq!(
        t.ledger.process(&mut txn, &block).unwrap_err(),
        BlockStatus::RepresentativeMismatch
    );
}

#[test]
fn epoch_open_needs_something_receivable() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let key2 = key(2);
    let send = t.lattice.genesis().send(key1.account(), Amount::raw(5));
    let open1 = t.lattice.epoch_open(key1.account(), Epoch::Epoch1);
    let open2 = t.lattice.epoch_open(key2.account(), Epoch::Epoch1);

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&send, &open1]);
    let info = t.ledger.account_info(&txn, &key1.account()).unwrap();
    assert_eq!(info.epoch, Epoch::Epoch1);
    assert_eq!(info.balance, Amount::ZERO);
    assert_eq!(
        t.ledger.process(&mut txn, &open2).unwrap_err(),
        BlockStatus::GapEpochOpenPending
    );
}

#[test]
fn legacy_open_cannot_receive_upgraded_send() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let epoch = t.lattice.genesis().epoch(Epoch::Epoch1);
    let send = t.lattice.genesis().send(key1.account(), Amount::raw(5));
    let open = t.lattice.account(&key1).legacy_open(&send);

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&epoch, &send]);
    assert_eq!(
        t.ledger.pending_info(
            &txn,
            &PendingKey::new(key1.account(), send.hash())
        )
        .unwrap()
        .epoch,
        Epoch::Epoch1
    );
    assert_eq!(
        t.ledger.process(&mut txn, &open).unwrap_err(),
        BlockStatus::Unreceivable
    );
}

#[test]
fn received_amount_inherits_source_epoch() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let epoch = t.lattice.genesis().epoch(Epoch::Epoch1);
    let send = t.lattice.genesis().send(key1.account(), Amount::raw(5));
    let open = t.lattice.account(&key1).receive(&send);

    let mut txn = t.txn();
    t.process_all(&mut txn, &[&epoch, &send, &open]);
    assert_eq!(
        t.ledger.account_info(&txn, &key1.account()).unwrap().epoch,
        Epoch::Epoch1
    );
    let saved = t.ledger.block(&txn, &open.hash()).unwrap();
    assert_eq!(saved.sideband.source_epoch, Epoch::Epoch1);
}

#[test]
fn could_fit_reports_missing_dependencies() {
    let mut t = TestLedger::new();
    let key1 = key(1);
    let send1 = t.lattice.genesis().send(key1.account(), Amount::raw(5));
    let send2 = t.lattice.genesis().send(key1.account(), Amount::raw(5));
    let open = t.lattice.account(&key1).receive(&send2);

    let mut txn = t.txn();
    assert!(t.ledger.could_fit(&txn, &send1));
    assert!(!t.ledger.could_fit(&txn, &send2));
    assert!(!t.ledger.could_fit(&txn, &open));
    t.process_all(&mut txn, &[&send1, &send2]);
    assert!(t.ledger.could_fit(&txn, &open));
}

fn key_for_genesis(t: &TestLedger) -> KeyPair {
    keypair_from_private(PrivateKey(
        t.ledger.constants.genesis_key.private.0,
    ))
}
