//! Confirmation height processing.
//!
//! Confirmed election winners are queued here and cemented together with
//! every uncemented block they depend on: earlier blocks of the same
//! account and, for receives, the source send on another account chain.
//!
//! Two strategies share the queue. The unbounded one plans the whole
//! dependency tree up front and writes per-account height ranges; it is
//! fast but holds the plan in memory. The bounded one cements in fixed
//! size steps and is used once the uncemented backlog grows large.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;

use lattice_ledger::{Ledger, Writer};
use lattice_store::Transaction;
use lattice_types::{Account, BlockHash, SavedBlock};
use lattice_utils::{DetailType, StatType, Stats};

use crate::config::{ConfirmationHeightConfig, ConfirmationHeightMode};
use crate::error::{spawn_named, NodeError};

/// Below this many uncemented blocks the automatic mode plans unbounded.
pub const UNBOUNDED_CUTOFF: u64 = 16384;

type CementedObserver = Box<dyn Fn(&SavedBlock) + Send + Sync>;
type AlreadyCementedObserver = Box<dyn Fn(&BlockHash) + Send + Sync>;

/// One account's height range to raise in a single write.
#[derive(Clone, Debug, PartialEq, Eq)]
struct WriteDetails {
    account: Account,
    bottom_height: u64,
    top_height: u64,
    top_hash: BlockHash,
}

#[derive(Default)]
struct State {
    stopped: bool,
    queue: VecDeque<BlockHash>,
    queued: HashSet<BlockHash>,
    current: Option<BlockHash>,
}

pub struct ConfirmationHeightProcessor {
    config: ConfirmationHeightConfig,
    ledger: Arc<Ledger>,
    stats: Arc<Stats>,
    state: Mutex<State>,
    condition: Condvar,
    cemented_observers: RwLock<Vec<CementedObserver>>,
    already_cemented_observers: RwLock<Vec<AlreadyCementedObserver>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl ConfirmationHeightProcessor {
    pub fn new(config: ConfirmationHeightConfig, ledger: Arc<Ledger>, stats: Arc<Stats>) -> Self {
        Self {
            config,
            ledger,
            stats,
            state: Mutex::new(State::default()),
            condition: Condvar::new(),
            cemented_observers: RwLock::new(Vec::new()),
            already_cemented_observers: RwLock::new(Vec::new()),
            thread: Mutex::new(None),
        }
    }

    /// Called once per newly cemented block, dependencies first.
    pub fn on_cemented(&self, f: impl Fn(&SavedBlock) + Send + Sync + 'static) {
        self.cemented_observers.write().unwrap().push(Box::new(f));
    }

    /// Called when a queued hash turned out to be cemented already.
    pub fn on_already_cemented(&self, f: impl Fn(&BlockHash) + Send + Sync + 'static) {
        self.already_cemented_observers
            .write()
            .unwrap()
            .push(Box::new(f));
    }

    pub fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        let processor = Arc::clone(self);
        let handle = spawn_named("conf height", move || processor.run())?;
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

    /// Queue `hash` for cementing. Returns false if it is already queued.
    pub fn add(&self, hash: BlockHash) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if !state.queued.insert(hash) {
                return false;
            }
            state.queue.push_back(hash);
        }
        self.condition.notify_all();
        true
    }

    /// Whether `hash` is queued or being cemented right now.
    pub fn is_processing_block(&self, hash: &BlockHash) -> bool {
        let state = self.state.lock().unwrap();
        state.current.as_ref() == Some(hash) || state.queued.contains(hash)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until the queue is drained.
    pub fn flush(&self) {
        let state = self.state.lock().unwrap();
        let _guard = self
            .condition
            .wait_while(state, |s| !s.stopped && (!s.queue.is_empty() || s.current.is_some()))
            .unwrap();
    }

    fn run(&self) {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.stopped {
                return;
            }
            let Some(hash) = state.queue.pop_front() else {
                state = self.condition.wait(state).unwrap();
                continue;
            };
            state.current = Some(hash);
            drop(state);

            self.process(hash);

            state = self.state.lock().unwrap();
            state.queued.remove(&hash);
            state.current = None;
            self.condition.notify_all();
        }
    }

    fn mode(&self) -> ConfirmationHeightMode {
        match self.config.mode {
            ConfirmationHeightMode::Automatic => {
                if self.ledger.unconfirmed_count() < UNBOUNDED_CUTOFF {
                    ConfirmationHeightMode::Unbounded
                } else {
                    ConfirmationHeightMode::Bounded
                }
            }
            mode => mode,
        }
    }

    /// Cement `hash` and its dependencies, notifying observers per block.
    pub fn process(&self, hash: BlockHash) {
        let already = {
            let txn = self.ledger.store.tx_begin_read();
            self.ledger.block_confirmed(&txn, &hash)
        };
        if already {
            self.stats
                .inc(StatType::ConfirmationHeight, DetailType::AlreadyCemented);
            for observer in self.already_cemented_observers.read().unwrap().iter() {
                observer(&hash);
            }
            return;
        }
        match self.mode() {
            ConfirmationHeightMode::Bounded => self.cement_bounded(hash),
            _ => self.cement_unbounded(hash),
        }
    }

    fn notify_cemented(&self, blocks: &[SavedBlock]) {
        let observers = self.cemented_observers.read().unwrap();
        for block in blocks {
            for observer in observers.iter() {
                observer(block);
            }
        }
    }

    fn cement_bounded(&self, hash: BlockHash) {
        let step = self.config.batch_write_size.max(1);
        loop {
            let (cemented, done) = {
                let _guard = self.ledger.write_queue.wait(Writer::ConfirmationHeight);
                let mut txn = self.ledger.store.tx_begin_write();
                let cemented = self.ledger.confirm_max(&mut txn, hash, step);
                let done = cemented.is_empty() || self.ledger.block_confirmed(&txn, &hash);
                if let Err(e) = txn.commit() {
                    tracing::error!(error = %e, "cementing commit failed");
                    return;
                }
                (cemented, done)
            };
            self.stats.add(
                StatType::ConfirmationHeight,
                DetailType::BlocksConfirmedBounded,
                cemented.len() as u64,
            );
            self.notify_cemented(&cemented);
            if done {
                break;
            }
        }
        tracing::debug!(%hash, "cemented (bounded)");
    }

    fn cement_unbounded(&self, hash: BlockHash) {
        let guard = self.ledger.write_queue.wait(Writer::ConfirmationHeight);
        let mut txn = self.ledger.store.tx_begin_write();
        let plan = self.plan(&txn, hash);

        let mut written = 0usize;
        let mut cemented = Vec::new();
        for details in &plan {
            let added = self.ledger.write_confirmation_height(
                &mut txn,
                &details.account,
                details.top_height,
                details.top_hash,
            );
            if added == 0 {
                continue;
            }
            let bottom = (details.top_height - added + 1).max(details.bottom_height);
            cemented.extend(self.chain_segment(&txn, details.top_hash, bottom));
            written += added as usize;
            if written >= self.config.batch_write_size {
                if let Err(e) = txn.refresh() {
                    tracing::error!(error = %e, "cementing commit failed");
                    return;
                }
                written = 0;
            }
        }
        if let Err(e) = txn.commit() {
            tracing::error!(error = %e, "cementing commit failed");
            return;
        }
        drop(txn);
        drop(guard);

        let count = cemented.len() as u64;
        self.stats
            .add(StatType::ConfirmationHeight, DetailType::BlocksConfirmed, count);
        self.stats.add(
            StatType::ConfirmationHeight,
            DetailType::BlocksConfirmedUnbounded,
            count,
        );
        tracing::debug!(%hash, blocks = count, "cemented (unbounded)");
        self.notify_cemented(&cemented);
    }

    /// Per-account height ranges that cement `target`, ordered so every
    /// source send is written before the receive that depends on it.
    fn plan(&self, txn: &dyn Transaction, target: BlockHash) -> Vec<WriteDetails> {
        let mut planned: HashMap<Account, u64> = HashMap::new();
        let mut writes = Vec::new();
        let mut stack = vec![target];

        while let Some(&hash) = stack.last() {
            let Some(block) = self.ledger.block(txn, &hash) else {
                // Pruned blocks are cemented; anything else is missing.
                if !self.ledger.block_or_pruned_exists(txn, &hash) {
                    tracing::warn!(%hash, "dependency missing while cementing");
                }
                stack.pop();
                continue;
            };
            let account = block.account();
            let cemented = self.cemented_height(txn, &planned, &account);
            if block.height() <= cemented {
                stack.pop();
                continue;
            }

            let segment = self.chain_segment(txn, hash, cemented + 1);
            let missing_source = segment.iter().find_map(|b| {
                let source = self.ledger.dependent_blocks(b)[1];
                (!source.is_zero() && !self.is_cemented_or_planned(txn, &planned, &source))
                    .then_some(source)
            });
            if let Some(source) = missing_source {
                if stack.contains(&source) {
                    tracing::error!(%hash, %source, "cyclic dependency while cementing");
                    return Vec::new();
                }
                stack.push(source);
                continue;
            }

            stack.pop();
            planned.insert(account, block.height());
            writes.push(WriteDetails {
                account,
                bottom_height: cemented + 1,
                top_height: block.height(),
                top_hash: hash,
            });
        }
        writes
    }

    fn cemented_height(
        &self,
        txn: &dyn Transaction,
        planned: &HashMap<Account, u64>,
        account: &Account,
    ) -> u64 {
        let height = self.ledger.confirmation_height(txn, account).height;
        planned.get(account).copied().unwrap_or(0).max(height)
    }

    fn is_cemented_or_planned(
        &self,
        txn: &dyn Transaction,
        planned: &HashMap<Account, u64>,
        hash: &BlockHash,
    ) -> bool {
        match self.ledger.block(txn, hash) {
            Some(block) => block.height() <= self.cemented_height(txn, planned, &block.account()),
            None => self.ledger.block_or_pruned_exists(txn, hash),
        }
    }

    /// Blocks from height `bottom` up to `top`, in ascending order.
    fn chain_segment(&self, txn: &dyn Transaction, top: BlockHash, bottom: u64) -> Vec<SavedBlock> {
        let mut segment = Vec::new();
        let mut current = top;
        while let Some(block) = self.ledger.block(txn, &current) {
            if block.height() < bottom {
                break;
            }
            current = block.previous();
            segment.push(block);
            if current.is_zero() {
                break;
            }
        }
        segment.reverse();
        segment
    }
}
