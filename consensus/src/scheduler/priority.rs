//! Balance-bucketed scheduling of the next unconfirmed block per account.
//!
//! Each account whose confirmed frontier is followed by a block with
//! confirmed dependencies gets that block queued in the bucket matching its
//! balance. Buckets are drained round robin while the priority behavior has
//! vacancy, so small accounts cannot starve large ones and vice versa.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use lattice_ledger::Ledger;
use lattice_store::Transaction;
use lattice_types::{Account, Amount, Block, BlockHash, SavedBlock};
use lattice_utils::{DetailType, StatType, Stats};

use crate::active_elections::ActiveElections;
use crate::config::PrioritySchedulerConfig;
use crate::election::ElectionBehavior;
use crate::error::{spawn_named, ConsensusError};

/// Powers of two at which a new bucket starts.
const BUCKET_EXPONENTS: [u32; 10] = [79, 88, 92, 96, 100, 104, 108, 112, 116, 120];

/// Blocks waiting in one balance range. Older confirmed frontiers come
/// first.
struct Bucket {
    minimum: Amount,
    max_blocks: usize,
    queue: BTreeMap<(u64, BlockHash), Block>,
}

impl Bucket {
    fn new(minimum: Amount, max_blocks: usize) -> Self {
        Self {
            minimum,
            max_blocks,
            queue: BTreeMap::new(),
        }
    }

    /// Returns false when the block did not fit or was already queued.
    fn push(&mut self, time: u64, block: Block) -> bool {
        let key = (time, block.hash());
        if self.queue.contains_key(&key) {
            return false;
        }
        self.queue.insert(key, block);
        if self.queue.len() > self.max_blocks {
            let evicted = self.queue.pop_last().map(|((_, hash), _)| hash);
            return evicted != Some(key.1);
        }
        true
    }

    fn pop(&mut self) -> Option<Block> {
        self.queue.pop_first().map(|(_, block)| block)
    }
}

fn build_buckets(max_blocks: usize) -> Vec<Bucket> {
    std::iter::once(Amount::ZERO)
        .chain(BUCKET_EXPONENTS.iter().map(|e| Amount::raw(1u128 << e)))
        .map(|minimum| Bucket::new(minimum, max_blocks))
        .collect()
}

#[derive(Default)]
struct State {
    stopped: bool,
    buckets: Vec<Bucket>,
    /// Round robin cursor.
    next: usize,
}

impl State {
    fn bucket_index(&self, balance: Amount) -> usize {
        self.buckets
            .iter()
            .rposition(|b| b.minimum <= balance)
            .unwrap_or(0)
    }

    fn pop_next(&mut self) -> Option<Block> {
        let count = self.buckets.len();
        for offset in 0..count {
            let index = (self.next + offset) % count;
            if let Some(block) = self.buckets[index].pop() {
                self.next = (index + 1) % count;
                return Some(block);
            }
        }
        None
    }

    fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.queue.len()).sum()
    }
}

pub struct PriorityScheduler {
    config: PrioritySchedulerConfig,
    ledger: Arc<Ledger>,
    active: Arc<ActiveElections>,
    stats: Arc<Stats>,
    state: Mutex<State>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PriorityScheduler {
    pub fn new(
        config: PrioritySchedulerConfig,
        ledger: Arc<Ledger>,
        active: Arc<ActiveElections>,
        stats: Arc<Stats>,
    ) -> Self {
        let state = State {
            buckets: build_buckets(config.bucket_max_blocks),
            ..State::default()
        };
        Self {
            config,
            ledger,
            active,
            stats,
            state: Mutex::new(state),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        if !self.config.enabled {
            return Ok(());
        }
        let scheduler = Arc::clone(self);
        let handle = spawn_named("sched priority", move || scheduler.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.state.lock().unwrap().stopped = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Wake the worker, e.g. after an election ended.
    pub fn notify(&self) {
        self.condition.notify_all();
    }

    /// Queue the first unconfirmed block of `account` if its dependencies
    /// are confirmed.
    pub fn activate(&self, txn: &dyn Transaction, account: &Account) -> bool {
        if !self.config.enabled {
            return false;
        }
        let Some(info) = self.ledger.account_info(txn, account) else {
            return false;
        };
        let conf = self.ledger.confirmation_height(txn, account);
        if conf.height >= info.block_count {
            return false;
        }
        let frontier = if conf.height == 0 {
            None
        } else {
            self.ledger.block(txn, &conf.frontier)
        };
        let hash = match &frontier {
            Some(frontier) => frontier.successor(),
            None => info.open_block,
        };
        let Some(block) = self.ledger.block(txn, &hash) else {
            return false;
        };
        if !self.ledger.dependents_confirmed(txn, &block) {
            return false;
        }
        let previous_balance = frontier.as_ref().map(SavedBlock::balance).unwrap_or_default();
        let balance = block.balance().max(previous_balance);
        let time = frontier
            .as_ref()
            .map(|f| f.sideband.timestamp)
            .unwrap_or(block.sideband.timestamp);
        let added = {
            let mut state = self.state.lock().unwrap();
            let index = state.bucket_index(balance);
            state.buckets[index].push(time, block.block)
        };
        if added {
            self.stats.inc(StatType::ElectionScheduler, DetailType::Activated);
            tracing::trace!(%account, %hash, "priority activation");
            self.condition.notify_all();
        }
        added
    }

    /// After `block` is cemented, the next block of its account and of a
    /// send's destination may be ready.
    pub fn activate_successors(&self, txn: &dyn Transaction, block: &SavedBlock) -> bool {
        self.stats
            .inc(StatType::ElectionScheduler, DetailType::ActivateSuccessors);
        let mut result = self.activate(txn, &block.account());
        if let Some(destination) = block.destination() {
            if destination != block.account() {
                result |= self.activate(txn, &destination);
            }
        }
        result
    }

    fn run(&self) {
        loop {
            let vacant = self.active.vacancy(ElectionBehavior::Priority) > 0;
            let mut state = self.state.lock().unwrap();
            if state.stopped {
                return;
            }
            if vacant {
                if let Some(block) = state.pop_next() {
                    drop(state);
                    let (inserted, _) = self.active.insert(&block, ElectionBehavior::Priority);
                    if inserted {
                        self.stats.inc(StatType::ElectionScheduler, DetailType::Priority);
                    }
                    continue;
                }
            }
            let _ = self
                .condition
                .wait_timeout(state, Duration::from_millis(100))
                .unwrap();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
