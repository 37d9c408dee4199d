//! Ledger fixtures shared by the unit tests.

use std::sync::{Arc, Mutex};

use lattice_crypto::generate_keypair;
use lattice_ledger::{LatticeBuilder, Ledger, LedgerConstants};
use lattice_network::Network;
use lattice_nullables::{dev_network, NullClock};
use lattice_store::Store;
use lattice_types::{Amount, KeyPair};
use lattice_utils::Stats;

use crate::active_elections::ActiveElections;
use crate::config::{ActiveElectionsConfig, OnlineRepsConfig, VoteCacheConfig};
use crate::online_reps::OnlineReps;
use crate::representative_register::RepresentativeRegister;
use crate::vote_cache::VoteCache;

pub(crate) struct RepFixture {
    pub ledger: Arc<Ledger>,
    pub reps: Vec<Arc<KeyPair>>,
    /// Continues from the fixture's frontiers.
    pub builder: LatticeBuilder,
}

pub(crate) fn empty_ledger() -> Arc<Ledger> {
    let constants = LedgerConstants::dev();
    Arc::new(Ledger::new(Arc::new(Store::new_memory()), constants, Arc::new(Stats::new())).unwrap())
}

/// A dev ledger where each weight is delegated to its own representative.
pub(crate) fn ledger_with_reps(weights: &[u128]) -> RepFixture {
    let ledger = empty_ledger();
    let mut builder = LatticeBuilder::new(&ledger.constants);
    let mut reps = Vec::new();
    let mut txn = ledger.store.tx_begin_write();
    for weight in weights {
        let key = generate_keypair();
        let send = builder.genesis().send(key.account(), Amount::raw(*weight));
        let open = builder.account(&key).receive(&send);
        ledger.process(&mut txn, &send).unwrap();
        ledger.process(&mut txn, &open).unwrap();
        reps.push(Arc::new(key));
    }
    txn.commit().unwrap();
    drop(txn);
    RepFixture {
        ledger,
        reps,
        builder,
    }
}

/// Consensus components over a fixture ledger, with online weight pinned
/// to 1000 raw so the quorum delta is 670.
pub(crate) struct ConsensusFixture {
    pub ledger: Arc<Ledger>,
    pub reps: Vec<Arc<KeyPair>>,
    pub builder: LatticeBuilder,
    pub stats: Arc<Stats>,
    pub online_reps: Arc<OnlineReps>,
    pub register: Arc<RepresentativeRegister>,
    pub network: Arc<Network>,
    pub active: Arc<ActiveElections>,
    pub clock: Arc<NullClock>,
}

pub(crate) fn consensus(weights: &[u128]) -> ConsensusFixture {
    let RepFixture {
        ledger,
        reps,
        builder,
    } = ledger_with_reps(weights);
    let stats = Arc::new(Stats::new());
    let online_reps = Arc::new(OnlineReps::new(Arc::clone(&ledger), OnlineRepsConfig::dev()));
    online_reps.set_online(Amount::raw(1000));
    let register = Arc::new(RepresentativeRegister::new(
        Arc::clone(&ledger),
        Arc::clone(&online_reps),
        Arc::clone(&stats),
    ));
    let network = dev_network(Arc::clone(&stats));
    let clock = Arc::new(NullClock::new());
    let active = Arc::new(ActiveElections::new(
        ActiveElectionsConfig::default(),
        Arc::clone(&ledger),
        Arc::clone(&online_reps),
        Arc::clone(&register),
        Arc::clone(&network),
        Arc::new(Mutex::new(VoteCache::new(VoteCacheConfig::default()))),
        Arc::clone(&stats),
        clock.clone(),
    ));
    ConsensusFixture {
        ledger,
        reps,
        builder,
        stats,
        online_reps,
        register,
        network,
        active,
        clock,
    }
}
