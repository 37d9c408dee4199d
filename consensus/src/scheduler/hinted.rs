//! Starts elections for blocks the vote cache says the network is already
//! voting on.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use lattice_ledger::Ledger;
use lattice_types::{Amount, BlockHash};
use lattice_utils::{DetailType, StatType, Stats};

use crate::active_elections::ActiveElections;
use crate::config::HintedSchedulerConfig;
use crate::election::ElectionBehavior;
use crate::error::{spawn_named, ConsensusError};
use crate::online_reps::OnlineReps;

pub struct HintedScheduler {
    config: HintedSchedulerConfig,
    ledger: Arc<Ledger>,
    active: Arc<ActiveElections>,
    online_reps: Arc<OnlineReps>,
    stats: Arc<Stats>,
    stopped: Mutex<bool>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HintedScheduler {
    pub fn new(
        config: HintedSchedulerConfig,
        ledger: Arc<Ledger>,
        active: Arc<ActiveElections>,
        online_reps: Arc<OnlineReps>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            config,
            ledger,
            active,
            online_reps,
            stats,
            stopped: Mutex::new(false),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        if !self.config.enabled {
            return Ok(());
        }
        let scheduler = Arc::clone(self);
        let handle = spawn_named("sched hinted", move || scheduler.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        *self.stopped.lock().unwrap() = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Tally a cached hash needs before it gets an election.
    pub fn tally_threshold(&self) -> Amount {
        let base = self.online_reps.online().max(self.online_reps.trended_or_minimum());
        Amount::raw(base.number() / 100 * self.config.hinting_threshold_percent as u128)
    }

    fn run(&self) {
        let interval = std::time::Duration::from_millis(self.config.check_interval_ms);
        let mut stopped = self.stopped.lock().unwrap();
        loop {
            stopped = self
                .condition
                .wait_timeout_while(stopped, interval, |s| !*s)
                .unwrap()
                .0;
            if *stopped {
                return;
            }
            drop(stopped);
            self.run_once();
            stopped = self.stopped.lock().unwrap();
        }
    }

    /// Start elections for the heaviest cached hashes while hinted vacancy
    /// lasts. Returns how many were started.
    pub fn run_once(&self) -> usize {
        let threshold = self.tally_threshold();
        let top = self.active.vote_cache.lock().unwrap().top(threshold);
        let mut started = 0;
        for entry in top {
            if self.active.vacancy(ElectionBehavior::Hinted) <= 0 {
                break;
            }
            if self.active.active_hash(&entry.hash) {
                continue;
            }
            // A final tally past quorum means the network already decided;
            // pull in unconfirmed dependencies too.
            let with_dependents = entry.final_tally >= self.online_reps.delta();
            started += self.activate(&entry.hash, with_dependents);
        }
        started
    }

    fn activate(&self, hash: &BlockHash, with_dependents: bool) -> usize {
        let txn = self.ledger.store.tx_begin_read();
        let Some(block) = self.ledger.block(&txn, hash) else {
            self.stats.inc(StatType::ElectionScheduler, DetailType::MissingBlock);
            return 0;
        };
        if self.ledger.block_confirmed(&txn, hash) {
            return 0;
        }
        let mut started = 0;
        if with_dependents && !self.ledger.dependents_confirmed(&txn, &block) {
            for dependency in self.ledger.dependent_blocks(&block) {
                if dependency.is_zero() || self.ledger.block_confirmed(&txn, &dependency) {
                    continue;
                }
                if let Some(saved) = self.ledger.block(&txn, &dependency) {
                    if self.active.insert(&saved.block, ElectionBehavior::Hinted).0 {
                        started += 1;
                    }
                }
            }
        }
        drop(txn);
        if self.active.insert(&block.block, ElectionBehavior::Hinted).0 {
            self.stats.inc(StatType::ElectionScheduler, DetailType::Hinted);
            tracing::trace!(%hash, "hinted election");
            started += 1;
        }
        started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::consensus;
    use lattice_types::{Account, Vote, VoteSource};

    #[test]
    fn heavy_cached_votes_start_an_election() {
        let mut fixture = consensus(&[700]);
        let send = fixture.builder.genesis().send(Account::new([9; 32]), Amount::raw(1));
        {
            let mut txn = fixture.ledger.store.tx_begin_write();
            fixture.ledger.process(&mut txn, &send).unwrap();
            txn.commit().unwrap();
        }
        let scheduler = HintedScheduler::new(
            HintedSchedulerConfig::default(),
            Arc::clone(&fixture.ledger),
            Arc::clone(&fixture.active),
            Arc::clone(&fixture.online_reps),
            Arc::clone(&fixture.stats),
        );
        // 10% of the pinned 1000 raw online weight.
        assert_eq!(scheduler.tally_threshold(), Amount::raw(100));

        let vote = Arc::new(
            Vote::new(fixture.reps[0].account(), 1, 0, vec![send.hash()]).unwrap(),
        );
        fixture.active.vote(&vote, VoteSource::Live);
        assert!(!fixture.active.active_hash(&send.hash()));

        assert!(scheduler.run_once() >= 1);
        assert!(fixture.active.active_hash(&send.hash()));
    }

    #[test]
    fn unknown_blocks_are_counted() {
        let fixture = consensus(&[700]);
        let scheduler = HintedScheduler::new(
            HintedSchedulerConfig::default(),
            Arc::clone(&fixture.ledger),
            Arc::clone(&fixture.active),
            Arc::clone(&fixture.online_reps),
            Arc::clone(&fixture.stats),
        );
        let vote = Arc::new(
            Vote::new(fixture.reps[0].account(), 1, 0, vec![BlockHash::new([3; 32])]).unwrap(),
        );
        fixture.active.vote(&vote, VoteSource::Live);
        assert_eq!(scheduler.run_once(), 0);
        assert_eq!(
            fixture.stats.count(
                StatType::ElectionScheduler,
                DetailType::MissingBlock,
                lattice_utils::Direction::In
            ),
            1
        );
    }
}
