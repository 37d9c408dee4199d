//! Recently seen blocks with a missing dependency, and who voted for them.
//!
//! If representatives with enough weight vote for a block this node cannot
//! place, the network has it and this node is behind: the block's hash is
//! handed to lazy bootstrap.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lattice_consensus::OnlineReps;
use lattice_ledger::Ledger;
use lattice_types::{Account, Amount, BlockHash, Vote};
use lattice_utils::{DetailType, StatType, Stats};

const MAX: usize = 256;

struct Gap {
    arrival: Instant,
    voters: Vec<Account>,
    bootstrap_started: bool,
}

#[derive(Default)]
struct Gaps {
    by_hash: HashMap<BlockHash, Gap>,
    by_arrival: BTreeMap<(Instant, BlockHash), ()>,
}

impl Gaps {
    fn trim(&mut self) {
        while self.by_hash.len() > MAX {
            let Some(((_, hash), _)) = self.by_arrival.pop_first() else {
                break;
            };
            self.by_hash.remove(&hash);
        }
    }
}

pub struct GapCache {
    ledger: Arc<Ledger>,
    online_reps: Arc<OnlineReps>,
    stats: Arc<Stats>,
    fraction_numerator: u32,
    gaps: Mutex<Gaps>,
}

impl GapCache {
    pub fn new(
        ledger: Arc<Ledger>,
        online_reps: Arc<OnlineReps>,
        stats: Arc<Stats>,
        fraction_numerator: u32,
    ) -> Self {
        Self {
            ledger,
            online_reps,
            stats,
            fraction_numerator,
            gaps: Mutex::new(Gaps::default()),
        }
    }

    /// Record a gap for `hash`, or refresh its arrival time.
    pub fn add(&self, hash: BlockHash, now: Instant) {
        let mut gaps = self.gaps.lock().unwrap();
        if let Some(gap) = gaps.by_hash.get_mut(&hash) {
            let old = gap.arrival;
            gap.arrival = now;
            gaps.by_arrival.remove(&(old, hash));
            gaps.by_arrival.insert((now, hash), ());
            return;
        }
        gaps.by_hash.insert(
            hash,
            Gap {
                arrival: now,
                voters: Vec::new(),
                bootstrap_started: false,
            },
        );
        gaps.by_arrival.insert((now, hash), ());
        gaps.trim();
        drop(gaps);
        self.stats.inc(StatType::GapCache, DetailType::Insert);
    }

    pub fn erase(&self, hash: &BlockHash) {
        let mut gaps = self.gaps.lock().unwrap();
        if let Some(gap) = gaps.by_hash.remove(hash) {
            gaps.by_arrival.remove(&(gap.arrival, *hash));
        }
    }

    /// Count the voter of `vote` towards every gap it names. Returns the
    /// hashes whose voters just crossed the lazy bootstrap threshold and
    /// that are still missing from the ledger.
    pub fn vote(&self, vote: &Vote) -> Vec<BlockHash> {
        let mut started = Vec::new();
        let mut gaps = self.gaps.lock().unwrap();
        for hash in &vote.hashes {
            let Some(gap) = gaps.by_hash.get_mut(hash) else {
                continue;
            };
            if gap.bootstrap_started || gap.voters.contains(&vote.voting_account) {
                continue;
            }
            gap.voters.push(vote.voting_account);
            if self.tally(&gap.voters) >= self.online_reps.delta() {
                gap.bootstrap_started = true;
                started.push(*hash);
            }
        }
        drop(gaps);
        if started.is_empty() {
            return started;
        }
        let txn = self.ledger.store.tx_begin_read();
        started.retain(|hash| !self.ledger.block_or_pruned_exists(&txn, hash));
        self.stats
            .add(StatType::GapCache, DetailType::InitiateLazy, started.len() as u64);
        started
    }

    fn tally(&self, voters: &[Account]) -> Amount {
        Amount::raw(voters.iter().map(|voter| self.ledger.weight(voter).number()).sum())
    }

    /// Weight that starts a legacy bootstrap when lazy bootstrap is disabled.
    pub fn bootstrap_threshold(&self) -> Amount {
        Amount::raw(self.online_reps.trended().number() / 256 * self.fraction_numerator as u128)
    }

    pub fn exists(&self, hash: &BlockHash) -> bool {
        self.gaps.lock().unwrap().by_hash.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.gaps.lock().unwrap().by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_consensus::OnlineRepsConfig;
    use lattice_ledger::LedgerConstants;
    use lattice_store::Store;
    use std::time::Duration;

    fn fixture() -> (Arc<Ledger>, Arc<OnlineReps>, GapCache) {
        let stats = Arc::new(Stats::new());
        let ledger = Arc::new(
            Ledger::new(Arc::new(Store::new_memory()), LedgerConstants::dev(), Arc::clone(&stats)).unwrap(),
        );
        let online_reps = Arc::new(OnlineReps::new(Arc::clone(&ledger), OnlineRepsConfig::dev()));
        let cache = GapCache::new(Arc::clone(&ledger), Arc::clone(&online_reps), stats, 1);
        (ledger, online_reps, cache)
    }

    #[test]
    fn add_refreshes_and_trims() {
        let (_, _, cache) = fixture();
        let start = Instant::now();
        for i in 0..(MAX + 10) {
            let mut bytes = [0u8; 32];
            bytes[..8].copy_from_slice(&(i as u64).to_be_bytes());
            cache.add(BlockHash::new(bytes), start + Duration::from_millis(i as u64));
        }
        assert_eq!(cache.len(), MAX);
        assert!(!cache.exists(&BlockHash::new([0; 32])));

        let hash = BlockHash::new([0xaa; 32]);
        cache.add(hash, start);
        cache.add(hash, start + Duration::from_secs(60));
        assert!(cache.exists(&hash));
        cache.erase(&hash);
        assert!(!cache.exists(&hash));
    }

    #[test]
    fn heavy_voters_trigger_lazy_bootstrap_once() {
        let (ledger, online_reps, cache) = fixture();
        let genesis = ledger.constants.genesis_account;
        online_reps.set_online(ledger.weight(&genesis));
        let missing = BlockHash::new([7; 32]);
        cache.add(missing, Instant::now());

        let vote = Vote::new(genesis, 1, 0, vec![missing, BlockHash::new([8; 32])]).unwrap();
        assert_eq!(cache.vote(&vote), vec![missing]);
        // Already started.
        assert!(cache.vote(&vote).is_empty());
    }

    #[test]
    fn light_voters_do_not_trigger() {
        let (ledger, online_reps, cache) = fixture();
        online_reps.set_online(ledger.weight(&ledger.constants.genesis_account));
        let missing = BlockHash::new([7; 32]);
        cache.add(missing, Instant::now());
        let vote = Vote::new(Account::new([3; 32]), 1, 0, vec![missing]).unwrap();
        assert!(cache.vote(&vote).is_empty());
    }
}
