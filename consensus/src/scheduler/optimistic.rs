//! Elections on the head of accounts with a long unconfirmed tail.
//!
//! Confirming the head cements every block below it in one go, which is
//! much cheaper than walking the chain one election at a time.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use lattice_ledger::Ledger;
use lattice_types::{Account, AccountInfo, ConfirmationHeightInfo};
use lattice_utils::{DetailType, StatType, Stats};

use crate::active_elections::ActiveElections;
use crate::config::OptimisticSchedulerConfig;
use crate::election::ElectionBehavior;
use crate::error::{spawn_named, ConsensusError};

#[derive(Default)]
struct Candidates {
    stopped: bool,
    queue: VecDeque<Account>,
    queued: HashSet<Account>,
}

pub struct OptimisticScheduler {
    config: OptimisticSchedulerConfig,
    ledger: Arc<Ledger>,
    active: Arc<ActiveElections>,
    stats: Arc<Stats>,
    candidates: Mutex<Candidates>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl OptimisticScheduler {
    pub fn new(
        config: OptimisticSchedulerConfig,
        ledger: Arc<Ledger>,
        active: Arc<ActiveElections>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            config,
            ledger,
            active,
            stats,
            candidates: Mutex::new(Candidates::default()),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        if !self.config.enabled {
            return Ok(());
        }
        let scheduler = Arc::clone(self);
        let handle = spawn_named("sched optimist", move || scheduler.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.candidates.lock().unwrap().stopped = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn notify(&self) {
        self.condition.notify_all();
    }

    /// Unopened-then-unconfirmed accounts and accounts whose confirmation
    /// gap reached the threshold qualify.
    fn predicate(&self, info: &AccountInfo, conf: &ConfirmationHeightInfo) -> bool {
        if conf.height == 0 {
            return info.block_count > 0;
        }
        info.block_count.saturating_sub(conf.height) >= self.config.gap_threshold
    }

    /// Queue `account` if its unconfirmed tail is long enough.
    pub fn activate(&self, account: &Account, info: &AccountInfo, conf: &ConfirmationHeightInfo) -> bool {
        if !self.config.enabled || !self.predicate(info, conf) {
            return false;
        }
        {
            let mut candidates = self.candidates.lock().unwrap();
            if candidates.queued.contains(account) {
                return false;
            }
            if candidates.queue.len() >= self.config.max_size {
                drop(candidates);
                self.stats.inc(StatType::ElectionScheduler, DetailType::Overfill);
                return false;
            }
            candidates.queue.push_back(*account);
            candidates.queued.insert(*account);
        }
        self.stats.inc(StatType::ElectionScheduler, DetailType::Activated);
        self.condition.notify_all();
        true
    }

    fn run(&self) {
        loop {
            let vacant = self.active.vacancy(ElectionBehavior::Optimistic) > 0;
            let mut candidates = self.candidates.lock().unwrap();
            if candidates.stopped {
                return;
            }
            if vacant {
                if let Some(account) = candidates.queue.pop_front() {
                    candidates.queued.remove(&account);
                    drop(candidates);
                    self.run_one(&account);
                    continue;
                }
            }
            let _ = self
                .condition
                .wait_timeout(candidates, Duration::from_millis(100))
                .unwrap();
        }
    }

    /// Start an election on the current head of `account`.
    fn run_one(&self, account: &Account) -> bool {
        let txn = self.ledger.store.tx_begin_read();
        let Some(head) = self.ledger.latest(&txn, account) else {
            return false;
        };
        if self.ledger.block_confirmed(&txn, &head) {
            return false;
        }
        let Some(block) = self.ledger.block(&txn, &head) else {
            return false;
        };
        drop(txn);
        let (inserted, _) = self.active.insert(&block.block, ElectionBehavior::Optimistic);
        if inserted {
            self.stats.inc(StatType::ElectionScheduler, DetailType::Optimistic);
        }
        inserted
    }

    pub fn len(&self) -> usize {
        self.candidates.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::consensus;
    use lattice_types::{BlockHash, Epoch};

    fn info(block_count: u64) -> AccountInfo {
        AccountInfo {
            head: BlockHash::new([1; 32]),
            representative: Account::new([2; 32]),
            open_block: BlockHash::new([3; 32]),
            balance: Default::default(),
            modified: 0,
            block_count,
            epoch: Epoch::Epoch0,
        }
    }

    #[test]
    fn gap_threshold_gates_activation() {
        let fixture = consensus(&[]);
        let scheduler = OptimisticScheduler::new(
            OptimisticSchedulerConfig {
                enabled: true,
                gap_threshold: 8,
                max_size: 2,
            },
            Arc::clone(&fixture.ledger),
            Arc::clone(&fixture.active),
            Arc::clone(&fixture.stats),
        );
        let conf = ConfirmationHeightInfo::new(2, BlockHash::new([4; 32]));
        assert!(!scheduler.activate(&Account::new([1; 32]), &info(9), &conf));
        assert!(scheduler.activate(&Account::new([1; 32]), &info(10), &conf));
        // Already queued.
        assert!(!scheduler.activate(&Account::new([1; 32]), &info(10), &conf));
        // Never confirmed at all.
        let unconfirmed = ConfirmationHeightInfo::default();
        assert!(scheduler.activate(&Account::new([2; 32]), &info(1), &unconfirmed));
        assert!(!scheduler.activate(&Account::new([3; 32]), &info(1), &unconfirmed));
        assert_eq!(scheduler.len(), 2);
    }

    #[test]
    fn head_of_account_gets_the_election() {
        let fixture = consensus(&[700]);
        let scheduler = OptimisticScheduler::new(
            OptimisticSchedulerConfig::default(),
            Arc::clone(&fixture.ledger),
            Arc::clone(&fixture.active),
            Arc::clone(&fixture.stats),
        );
        let rep = fixture.reps[0].account();
        assert!(scheduler.run_one(&rep));
        let txn = fixture.ledger.store.tx_begin_read();
        let head = fixture.ledger.latest(&txn, &rep).unwrap();
        assert!(fixture.active.active_hash(&head));
    }
}
