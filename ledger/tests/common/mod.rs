#![allow(dead_code)]

use std::sync::Arc;

use lattice_crypto::{deterministic_key, sign_block};
use lattice_ledger::{LatticeBuilder, Ledger, LedgerConstants};
use lattice_store::WriteTransaction;
use lattice_types::{Block, KeyPair};
use lattice_utils::Stats;
use lattice_work::WorkGenerator;

pub struct TestLedger {
    pub ledger: Ledger,
    pub stats: Arc<Stats>,
    pub lattice: LatticeBuilder,
}

impl TestLedger {
    pub fn new() -> Self {
        let constants = LedgerConstants::dev();
        let lattice = LatticeBuilder::new(&constants);
        let stats = Arc::new(Stats::new());
        let ledger = Ledger::new(lattice_nullables::null_store(), constants, Arc::clone(&stats))
            .expect("ledger opens on an empty store");
        Self {
            ledger,
            stats,
            lattice,
        }
    }

    pub fn txn(&self) -> WriteTransaction {
        self.ledger.store.tx_begin_write()
    }

    /// Process blocks that must all succeed.
    pub fn process_all(&self, txn: &mut WriteTransaction, blocks: &[&Block]) {
        for block in blocks {
            if let Err(status) = self.ledger.process(txn, block) {
                panic!("block {} failed with {:?}", block.hash(), status);
            }
        }
    }
}

pub fn key(n: u8) -> KeyPair {
    deterministic_key(&[n; 32], 0)
}

/// Attach valid work and sign with `key`.
pub fn finish(constants: &LedgerConstants, block: &mut Block, key: &KeyPair) {
    let work = WorkGenerator
        .generate(&block.root(), constants.work.threshold_max())
        .expect("work");
    block.set_work(work.0);
    sign_block(block, &key.private);
}
