//! Hash-driven bootstrap.
//!
//! Starts from a block hash (or account) the network is known to have and
//! follows dependencies: every pulled receive queues its missing source, and
//! every finished pull queues the block below the last one received.
//!
//! A state block's link is a source hash only when the block receives. That
//! takes the predecessor's balance, which is often not known yet because
//! pulls arrive newest first. Such blocks wait in a backlog keyed by their
//! predecessor.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lattice_ledger::Ledger;
use lattice_types::{Amount, Block, BlockHash, HashOrAccount};
use lattice_utils::{DetailType, StatType, Stats};

use super::attempt::{AttemptState, BootstrapAttempt, BootstrapMode};
use super::client::BootstrapConnections;
use super::pull::{execute_pulls, PullInfo};
use crate::block_processor::{BlockProcessor, BlockSource};
use crate::config::{BootstrapConfig, BootstrapConstants};

/// Idle rounds with nothing to pull before the attempt ends.
const IDLE_ROUNDS: u32 = 3;

/// A state block waiting for its predecessor's balance.
#[derive(Clone, Copy)]
struct BacklogEntry {
    link: BlockHash,
    balance: Amount,
}

#[derive(Default)]
struct Keys {
    queue: VecDeque<HashOrAccount>,
    seen: HashSet<HashOrAccount>,
    backlog: HashMap<BlockHash, BacklogEntry>,
}

pub struct LazyAttempt {
    state: AttemptState,
    ledger: Arc<Ledger>,
    block_processor: Arc<BlockProcessor>,
    connections: Arc<BootstrapConnections>,
    config: BootstrapConfig,
    constants: BootstrapConstants,
    stats: Arc<Stats>,
    keys: Mutex<Keys>,
}

impl LazyAttempt {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: AttemptState,
        ledger: Arc<Ledger>,
        block_processor: Arc<BlockProcessor>,
        connections: Arc<BootstrapConnections>,
        config: BootstrapConfig,
        constants: BootstrapConstants,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            state,
            ledger,
            block_processor,
            connections,
            config,
            constants,
            stats,
            keys: Mutex::new(Keys::default()),
        }
    }

    fn queue_key(&self, key: HashOrAccount) -> bool {
        if key.is_zero() {
            return false;
        }
        let mut keys = self.keys.lock().unwrap();
        if !keys.seen.insert(key) {
            return false;
        }
        keys.queue.push_back(key);
        drop(keys);
        self.state.notify();
        true
    }

    fn is_known(&self, hash: &BlockHash) -> bool {
        let txn = self.ledger.store.tx_begin_read();
        self.ledger.block_or_pruned_exists(&txn, hash)
    }

    /// Turn queued keys into pulls. Returns how many were added.
    fn drain_keys(&self) -> usize {
        let keys: Vec<HashOrAccount> = self.keys.lock().unwrap().queue.drain(..).collect();
        let mut added = 0;
        for key in keys {
            let head = BlockHash::from(key);
            if self.is_known(&head) {
                continue;
            }
            self.connections.add_pull(PullInfo::new(
                key,
                head,
                BlockHash::ZERO,
                self.constants.lazy_max_pull_blocks,
                self.id(),
                self.constants.lazy_requeued_pulls_limit,
            ));
            added += 1;
        }
        added
    }

    fn queue_unknown(&self, hash: BlockHash) {
        if !self.is_known(&hash) {
            self.queue_key(hash.into());
        }
    }

    /// Queue what `block` depends on besides its predecessor.
    fn queue_dependencies(&self, block: &Block) {
        self.resolve_backlog(&block.hash(), block);
        if block.is_legacy() {
            if let Some(source) = block.source_field() {
                self.queue_unknown(source);
            }
            return;
        }
        let (Some(link), Some(balance)) = (block.link_field(), block.balance_field()) else {
            return;
        };
        if link.is_zero() || self.ledger.is_epoch_link(&link) {
            return;
        }
        let link = BlockHash::from(link);
        let previous = block.previous();
        if previous.is_zero() {
            self.queue_unknown(link);
            return;
        }
        let previous_balance = {
            let txn = self.ledger.store.tx_begin_read();
            self.ledger.balance(&txn, &previous)
        };
        match previous_balance {
            Some(previous_balance) => {
                if balance > previous_balance {
                    self.queue_unknown(link);
                }
            }
            None => {
                self.keys
                    .lock()
                    .unwrap()
                    .backlog
                    .insert(previous, BacklogEntry { link, balance });
            }
        }
    }

    /// `block` arrived and may be the predecessor a backlogged block waits for.
    fn resolve_backlog(&self, hash: &BlockHash, block: &Block) {
        let Some(next) = self.keys.lock().unwrap().backlog.remove(hash) else {
            return;
        };
        match block.balance_field() {
            Some(balance) => {
                if next.balance > balance {
                    self.queue_unknown(next.link);
                }
            }
            // Legacy receive, open and change blocks carry no balance. Assume
            // a receive.
            None => self.queue_unknown(next.link),
        }
    }

    /// Resolve backlogged blocks whose predecessor reached the ledger some
    /// other way.
    fn backlog_cleanup(&self) {
        let entries: Vec<(BlockHash, BacklogEntry)> = self
            .keys
            .lock()
            .unwrap()
            .backlog
            .iter()
            .map(|(previous, entry)| (*previous, *entry))
            .collect();
        if entries.is_empty() {
            return;
        }
        let txn = self.ledger.store.tx_begin_read();
        for (previous, entry) in entries {
            let Some(previous_balance) = self.ledger.balance(&txn, &previous) else {
                continue;
            };
            self.keys.lock().unwrap().backlog.remove(&previous);
            if entry.balance > previous_balance {
                self.queue_unknown(entry.link);
            }
        }
    }

    fn queued_keys(&self) -> usize {
        self.keys.lock().unwrap().queue.len()
    }
}

impl BootstrapAttempt for LazyAttempt {
    fn state(&self) -> &AttemptState {
        &self.state
    }

    fn mode(&self) -> BootstrapMode {
        BootstrapMode::Lazy
    }

    fn run(&self) {
        tracing::info!(id = self.id(), label = %self.state.label, "lazy bootstrap started");
        let mut idle = 0;
        while !self.stopped() {
            self.backlog_cleanup();
            self.drain_keys();
            if self.connections.pulls_len(self.id()) == 0 {
                // Processing may still release blocks that queue new keys.
                self.block_processor.flush();
                if self.queued_keys() == 0 {
                    idle += 1;
                    if idle >= IDLE_ROUNDS {
                        break;
                    }
                    self.state.wait(Duration::from_secs(1));
                }
                continue;
            }
            idle = 0;
            let round = execute_pulls(self, &self.connections, self.config.io_timeout(), &self.stats);
            if round.connection_failed && round.completed == 0 {
                self.state.wait(Duration::from_secs(1));
            }
            if self.total_blocks() >= self.constants.lazy_blocks_restart_limit {
                self.stats.inc(StatType::Bootstrap, DetailType::LazyRestart);
                tracing::info!(id = self.id(), blocks = self.total_blocks(), "lazy bootstrap block limit reached");
                break;
            }
        }
        self.block_processor.flush();
        tracing::info!(
            id = self.id(),
            blocks = self.total_blocks(),
            elapsed_ms = self.state.started.elapsed().as_millis() as u64,
            "lazy bootstrap finished"
        );
    }

    fn process_block(&self, block: Block, _pull: &PullInfo) -> bool {
        while self.block_processor.half_full() && !self.stopped() {
            self.state.wait(Duration::from_millis(50));
        }
        self.queue_dependencies(&block);
        self.block_processor.add(block, BlockSource::Bootstrap);
        self.state.total_blocks.fetch_add(1, Ordering::SeqCst);
        self.stopped()
    }

    fn pull_finished(&self, pull: &PullInfo) {
        if !pull.head.is_zero() && pull.head != pull.end && !self.is_known(&pull.head) {
            self.queue_key(pull.head.into());
        }
    }

    fn lazy_start(&self, key: HashOrAccount) -> bool {
        if self.stopped() {
            return false;
        }
        self.queue_key(key)
    }
}
