//! Block processing pipeline.
//!
//! Blocks arrive from peers, bootstrap, the unchecked map, local submission
//! and elections. Each source has its own bounded queue; a single worker
//! takes weighted round-robin batches from the queues, pre-verifies the
//! signatures it can check without the ledger, and applies the batch under
//! one write transaction. Forced blocks jump every queue and replace a
//! competing successor.

use std::collections::VecDeque;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Instant;

use lattice_crypto::{validate_block_signature, verify_batch, SignatureCheck};
use lattice_ledger::{BlockStatus, Ledger, LedgerError, Writer};
use lattice_store::WriteTransaction;
use lattice_types::{Block, HashOrAccount, PublicKey, QualifiedRoot, SavedBlock};
use lattice_utils::{DetailType, StatType, Stats};

use crate::config::BlockProcessorConfig;
use crate::error::{spawn_named, NodeError};
use crate::gap_cache::GapCache;
use crate::unchecked::UncheckedMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockSource {
    Live,
    /// Published by the block's own account holder.
    LiveOriginator,
    Bootstrap,
    BootstrapLegacy,
    /// Released from the unchecked map once its dependency arrived.
    Unchecked,
    Local,
    /// Election winner replacing a competing block.
    Forced,
    Election,
}

impl BlockSource {
    const COUNT: usize = 8;

    fn index(self) -> usize {
        self as usize
    }

    pub fn detail(self) -> DetailType {
        match self {
            BlockSource::Live => DetailType::Live,
            BlockSource::LiveOriginator => DetailType::LiveOriginator,
            BlockSource::Bootstrap => DetailType::Bootstrap,
            BlockSource::BootstrapLegacy => DetailType::BootstrapLegacy,
            BlockSource::Unchecked => DetailType::Unchecked,
            BlockSource::Local => DetailType::Local,
            BlockSource::Forced => DetailType::Forced,
            BlockSource::Election => DetailType::Election,
        }
    }

    /// Sources whose progress is announced to the network.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            BlockSource::Live | BlockSource::LiveOriginator | BlockSource::Local
        )
    }
}

/// Round-robin order; forced blocks are served ahead of all of these.
const ROUND_ROBIN: [BlockSource; 7] = [
    BlockSource::Live,
    BlockSource::LiveOriginator,
    BlockSource::Bootstrap,
    BlockSource::BootstrapLegacy,
    BlockSource::Unchecked,
    BlockSource::Local,
    BlockSource::Election,
];

struct BlockContext {
    block: Block,
    source: BlockSource,
    waiter: Option<SyncSender<BlockStatus>>,
}

/// Outcome of one block, handed to batch observers after commit.
#[derive(Clone, Debug)]
pub struct ProcessedBlock {
    pub block: Block,
    pub source: BlockSource,
    pub status: BlockStatus,
    pub saved: Option<SavedBlock>,
}

type BatchObserver = Box<dyn Fn(&[ProcessedBlock]) + Send + Sync>;
type RollbackObserver = Box<dyn Fn(&[SavedBlock], &QualifiedRoot) + Send + Sync>;

struct Queues {
    stopped: bool,
    processing: bool,
    by_source: [VecDeque<BlockContext>; BlockSource::COUNT],
    cursor: usize,
    credit: usize,
}

impl Queues {
    fn total(&self) -> usize {
        self.by_source.iter().map(VecDeque::len).sum()
    }

    /// Next block by weighted round robin over the non-forced sources.
    fn pop_weighted(&mut self, weight: impl Fn(BlockSource) -> usize) -> Option<BlockContext> {
        for _ in 0..=ROUND_ROBIN.len() {
            if self.credit > 0 {
                let source = ROUND_ROBIN[self.cursor];
                if let Some(ctx) = self.by_source[source.index()].pop_front() {
                    self.credit -= 1;
                    return Some(ctx);
                }
            }
            self.cursor = (self.cursor + 1) % ROUND_ROBIN.len();
            self.credit = weight(ROUND_ROBIN[self.cursor]).max(1);
        }
        None
    }
}

pub struct BlockProcessor {
    config: BlockProcessorConfig,
    ledger: Arc<Ledger>,
    unchecked: Arc<UncheckedMap>,
    gap_cache: Arc<GapCache>,
    stats: Arc<Stats>,
    queues: Mutex<Queues>,
    condition: Condvar,
    batch_observers: RwLock<Vec<BatchObserver>>,
    rollback_observers: RwLock<Vec<RollbackObserver>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BlockProcessor {
    pub fn new(
        config: BlockProcessorConfig,
        ledger: Arc<Ledger>,
        unchecked: Arc<UncheckedMap>,
        gap_cache: Arc<GapCache>,
        stats: Arc<Stats>,
    ) -> Self {
        let credit = config.priority_live.max(1);
        Self {
            config,
            ledger,
            unchecked,
            gap_cache,
            stats,
            queues: Mutex::new(Queues {
                stopped: false,
                processing: false,
                by_source: std::array::from_fn(|_| VecDeque::new()),
                cursor: 0,
                credit,
            }),
            condition: Condvar::new(),
            batch_observers: RwLock::new(Vec::new()),
            rollback_observers: RwLock::new(Vec::new()),
            thread: Mutex::new(None),
        }
    }

    /// Called after every committed batch, in processing order.
    pub fn on_batch_processed(&self, f: impl Fn(&[ProcessedBlock]) + Send + Sync + 'static) {
        self.batch_observers.write().unwrap().push(Box::new(f));
    }

    /// Called with the blocks a forced block displaced, newest first.
    pub fn on_rolled_back(
        &self,
        f: impl Fn(&[SavedBlock], &QualifiedRoot) + Send + Sync + 'static,
    ) {
        self.rollback_observers.write().unwrap().push(Box::new(f));
    }

    pub fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        let processor = Arc::clone(self);
        let handle = spawn_named("block processing", move || processor.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.queues.lock().unwrap().stopped = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        // Dropping queued contexts releases anyone blocked in add_blocking.
        let mut queues = self.queues.lock().unwrap();
        for queue in queues.by_source.iter_mut() {
            queue.clear();
        }
    }

    fn max_queue(&self, source: BlockSource) -> usize {
        match source {
            BlockSource::Live | BlockSource::LiveOriginator => self.config.max_peer_queue,
            BlockSource::Forced => usize::MAX,
            _ => self.config.max_system_queue,
        }
    }

    fn priority(&self, source: BlockSource) -> usize {
        match source {
            BlockSource::Live | BlockSource::LiveOriginator => self.config.priority_live,
            BlockSource::Bootstrap | BlockSource::BootstrapLegacy | BlockSource::Unchecked => {
                self.config.priority_bootstrap
            }
            BlockSource::Local | BlockSource::Election | BlockSource::Forced => {
                self.config.priority_local
            }
        }
    }

    fn enqueue(&self, ctx: BlockContext) -> bool {
        let source = ctx.source;
        {
            let mut queues = self.queues.lock().unwrap();
            if queues.stopped || queues.by_source[source.index()].len() >= self.max_queue(source) {
                drop(queues);
                self.stats.inc(StatType::BlockProcessor, DetailType::Overfill);
                tracing::trace!(hash = %ctx.block.hash(), ?source, "block queue full");
                return false;
            }
            queues.by_source[source.index()].push_back(ctx);
        }
        self.stats.inc(StatType::BlockProcessor, DetailType::Process);
        self.stats.inc(StatType::BlockProcessor, source.detail());
        self.condition.notify_all();
        true
    }

    /// Queue a block. Returns false if its source queue is full.
    pub fn add(&self, block: Block, source: BlockSource) -> bool {
        self.enqueue(BlockContext {
            block,
            source,
            waiter: None,
        })
    }

    pub fn add_local(&self, block: Block) -> bool {
        self.add(block, BlockSource::Local)
    }

    /// Queue a block that must win its slot, rolling back whatever
    /// currently succeeds its root.
    pub fn force(&self, block: Block) {
        self.stats.inc(StatType::BlockProcessor, DetailType::Forced);
        self.add(block, BlockSource::Forced);
    }

    /// Queue a block and wait for its ledger result. None if the block was
    /// not accepted or the processor stopped first.
    pub fn add_blocking(&self, block: Block, source: BlockSource) -> Option<BlockStatus> {
        let (tx, rx) = sync_channel(1);
        let accepted = self.enqueue(BlockContext {
            block,
            source,
            waiter: Some(tx),
        });
        if !accepted {
            return None;
        }
        rx.recv().ok()
    }

    /// Block until every queued block has been processed.
    pub fn flush(&self) {
        let queues = self.queues.lock().unwrap();
        let _guard = self
            .condition
            .wait_while(queues, |q| !q.stopped && (q.total() > 0 || q.processing))
            .unwrap();
    }

    pub fn size(&self) -> usize {
        self.queues.lock().unwrap().total()
    }

    pub fn full(&self) -> bool {
        self.size() >= self.config.max_system_queue
    }

    pub fn half_full(&self) -> bool {
        self.size() >= self.config.max_system_queue / 2
    }

    fn run(&self) {
        let mut queues = self.queues.lock().unwrap();
        loop {
            if queues.stopped {
                return;
            }
            if queues.total() == 0 {
                queues = self.condition.wait(queues).unwrap();
                continue;
            }
            let batch = self.next_batch(&mut queues);
            queues.processing = true;
            drop(queues);

            let leftover = self.process_batch(batch);

            queues = self.queues.lock().unwrap();
            // Whatever missed the deadline goes back to the head of its queue.
            for ctx in leftover.into_iter().rev() {
                queues.by_source[ctx.source.index()].push_front(ctx);
            }
            queues.processing = false;
            self.condition.notify_all();
        }
    }

    fn next_batch(&self, queues: &mut Queues) -> Vec<BlockContext> {
        let max = self.config.batch_size.max(1);
        let mut batch = Vec::with_capacity(max.min(queues.total()));
        while batch.len() < max {
            if let Some(ctx) = queues.by_source[BlockSource::Forced.index()].pop_front() {
                batch.push(ctx);
                continue;
            }
            match queues.pop_weighted(|source| self.priority(source)) {
                Some(ctx) => batch.push(ctx),
                None => break,
            }
        }
        batch
    }

    /// Drop blocks whose signature matches neither their account nor, for
    /// epoch links, the epoch signer. Legacy blocks other than opens carry
    /// no account and are left to the ledger.
    fn verify_signatures(&self, batch: Vec<BlockContext>) -> Vec<BlockContext> {
        let needs_check = |block: &Block| block.account_field().is_some();
        let checks: Vec<SignatureCheck> = batch
            .iter()
            .filter(|ctx| ctx.source != BlockSource::Forced && needs_check(&ctx.block))
            .filter_map(|ctx| {
                ctx.block.account_field().map(|account| SignatureCheck {
                    message: *ctx.block.hash().as_bytes(),
                    signature: *ctx.block.signature(),
                    public_key: PublicKey::from(account),
                })
            })
            .collect();
        let mut results = verify_batch(&checks).into_iter();

        let mut valid = Vec::with_capacity(batch.len());
        for ctx in batch {
            if ctx.source == BlockSource::Forced || !needs_check(&ctx.block) {
                valid.push(ctx);
                continue;
            }
            let signed_by_account = results.next().unwrap_or(false);
            if signed_by_account || self.signed_by_epoch_signer(&ctx.block) {
                valid.push(ctx);
            } else {
                self.stats.inc(StatType::BlockProcessor, DetailType::BadSignature);
                tracing::debug!(hash = %ctx.block.hash(), source = ?ctx.source, "block with bad signature dropped");
                if let Some(waiter) = &ctx.waiter {
                    let _ = waiter.try_send(BlockStatus::BadSignature);
                }
            }
        }
        valid
    }

    fn signed_by_epoch_signer(&self, block: &Block) -> bool {
        let epochs = &self.ledger.constants.epochs;
        block
            .link_field()
            .and_then(|link| epochs.epoch(&link))
            .and_then(|epoch| epochs.signer(epoch))
            .map(|signer| validate_block_signature(block, &PublicKey::from(signer)))
            .unwrap_or(false)
    }

    /// Apply a batch under one write transaction. Returns the blocks left
    /// over when the batch deadline passed.
    fn process_batch(&self, batch: Vec<BlockContext>) -> Vec<BlockContext> {
        let batch = self.verify_signatures(batch);
        if batch.is_empty() {
            return Vec::new();
        }

        let started = Instant::now();
        let mut processed = Vec::with_capacity(batch.len());
        let mut rolled_back = Vec::new();
        let mut leftover = Vec::new();
        let committed;
        {
            let _guard = self.ledger.write_queue.wait(Writer::ProcessBatch);
            let mut txn = self.ledger.store.tx_begin_write();
            let mut batch = batch.into_iter();
            for ctx in batch.by_ref() {
                if let Some(displaced) = self.rollback_competitor(&mut txn, &ctx) {
                    rolled_back.push(displaced);
                }
                let (status, saved) = match self.ledger.process(&mut txn, &ctx.block) {
                    Ok(saved) => (BlockStatus::Progress, Some(saved)),
                    Err(status) => (status, None),
                };
                processed.push((ctx, status, saved));
                if started.elapsed() > self.config.batch_max_time() {
                    break;
                }
            }
            leftover.extend(batch);
            committed = txn.commit();
            drop(txn);
            if let Err(e) = &committed {
                self.stats.inc(StatType::BlockProcessor, DetailType::WriteFailed);
                tracing::error!(error = %e, blocks = processed.len(), "block batch commit failed");
                // Processing already moved the in-memory counters and weights.
                self.ledger.rebuild_cache();
            }
        }
        if committed.is_err() {
            for (ctx, _, _) in processed {
                if let Some(waiter) = &ctx.waiter {
                    let _ = waiter.try_send(BlockStatus::WriteFailed);
                }
            }
            return leftover;
        }
        let elapsed = started.elapsed();
        self.stats
            .add(StatType::BlockProcessor, DetailType::Processed, processed.len() as u64);
        if processed.len() > 1 {
            tracing::debug!(
                blocks = processed.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "processed block batch"
            );
        }

        for (blocks, root) in &rolled_back {
            for observer in self.rollback_observers.read().unwrap().iter() {
                observer(blocks, root);
            }
        }

        let now = Instant::now();
        let mut results = Vec::with_capacity(processed.len());
        for (ctx, status, saved) in processed {
            self.handle_result(&ctx, status, saved.as_ref(), now);
            if let Some(waiter) = &ctx.waiter {
                let _ = waiter.try_send(status);
            }
            results.push(ProcessedBlock {
                block: ctx.block,
                source: ctx.source,
                status,
                saved,
            });
        }
        for observer in self.batch_observers.read().unwrap().iter() {
            observer(&results);
        }
        leftover
    }

    /// For a forced block, roll back the block currently occupying its slot.
    fn rollback_competitor(
        &self,
        txn: &mut WriteTransaction,
        ctx: &BlockContext,
    ) -> Option<(Vec<SavedBlock>, QualifiedRoot)> {
        if ctx.source != BlockSource::Forced {
            return None;
        }
        let hash = ctx.block.hash();
        let root = ctx.block.qualified_root();
        let successor = self.ledger.successor(&*txn, &root)?;
        if successor == hash {
            return None;
        }
        match self.ledger.rollback(txn, &successor) {
            Ok(blocks) => {
                self.stats
                    .add(StatType::Rollback, DetailType::All, blocks.len() as u64);
                tracing::debug!(%hash, %successor, count = blocks.len(), "rolled back competitor");
                Some((blocks, root))
            }
            Err(LedgerError::BlockConfirmed(confirmed)) => {
                self.stats.inc(StatType::Ledger, DetailType::RollbackFailed);
                tracing::error!(%hash, %successor, %confirmed, "cannot replace a cemented block");
                None
            }
            Err(e) => {
                self.stats.inc(StatType::Ledger, DetailType::RollbackFailed);
                tracing::error!(%hash, %successor, error = %e, "rollback of competitor failed");
                None
            }
        }
    }

    fn handle_result(
        &self,
        ctx: &BlockContext,
        status: BlockStatus,
        saved: Option<&SavedBlock>,
        now: Instant,
    ) {
        let block = &ctx.block;
        let hash = block.hash();
        match status {
            BlockStatus::Progress => {
                self.gap_cache.erase(&hash);
                self.release_dependents(hash.into());
                if let Some(destination) = saved.and_then(SavedBlock::destination) {
                    // Epoch opens wait on the account until something is receivable.
                    self.release_dependents(destination.into());
                }
            }
            BlockStatus::GapPrevious => {
                self.unchecked.put(block.previous().into(), block.clone(), now);
                self.gap_cache.add(hash, now);
            }
            BlockStatus::GapSource => {
                let source = block
                    .source_field()
                    .or_else(|| block.link_field().map(Into::into))
                    .unwrap_or_default();
                self.unchecked.put(source.into(), block.clone(), now);
                self.gap_cache.add(hash, now);
            }
            BlockStatus::GapEpochOpenPending => {
                if let Some(account) = block.account_field() {
                    self.unchecked.put(account.into(), block.clone(), now);
                }
            }
            BlockStatus::Old => {
                tracing::trace!(%hash, source = ?ctx.source, "old block");
            }
            BlockStatus::Fork => {
                tracing::debug!(%hash, root = %block.root(), source = ?ctx.source, "fork");
            }
            _ => {
                tracing::debug!(%hash, source = ?ctx.source, status = status.as_str(), "block rejected");
            }
        }
    }

    fn release_dependents(&self, dependency: HashOrAccount) {
        for block in self.unchecked.trigger(&dependency) {
            self.add(block, BlockSource::Unchecked);
        }
    }
}
