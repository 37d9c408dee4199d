//! Ascending bootstrap: keep asking peers for the blocks that follow each
//! account's local head.
//!
//! Accounts are chosen from [`AccountSets`]. Successful pulls raise an
//! account's priority, empty replies lower it, and blocks whose source is
//! missing park their account until the source chain catches up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lattice_ledger::{BlockStatus, Ledger};
use lattice_messages::{
    AscPullAck, AscPullAckPayload, AscPullReq, AscPullReqPayload, BlocksReqPayload,
    FrontiersReqPayload, HashType, Message,
};
use lattice_network::{Channel, ChannelId, DropPolicy, Network, TrafficType};
use lattice_types::{Account, Block, BlockHash, HashOrAccount};
use lattice_utils::{DetailType, Direction, StatType, Stats};

use super::account_sets::{AccountSets, AccountSetsConfig, PriorityDown, PriorityUp};
use crate::block_processor::{BlockProcessor, BlockSource, ProcessedBlock};
use crate::config::BootstrapAscendingConfig;
use crate::error::spawn_named;
use crate::NodeError;

/// Accounts read from the ledger per database scan step.
const SCAN_BATCH: usize = 32;
const IDLE_WAIT: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug)]
enum TagKind {
    /// Expecting blocks of `account`, starting at `start`.
    Blocks { account: Account, start: HashOrAccount, start_type: HashType },
    Frontiers,
}

#[derive(Clone, Copy, Debug)]
struct Tag {
    kind: TagKind,
    channel: ChannelId,
    sent: Instant,
}

struct Shared {
    accounts: AccountSets,
    tags: HashMap<u64, Tag>,
    per_channel: HashMap<ChannelId, usize>,
    scan_cursor: Account,
    frontier_cursor: Account,
}

impl Shared {
    fn release(&mut self, tag: &Tag) {
        if let Some(count) = self.per_channel.get_mut(&tag.channel) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.per_channel.remove(&tag.channel);
            }
        }
    }
}

pub struct BootstrapAscending {
    config: BootstrapAscendingConfig,
    ledger: Arc<Ledger>,
    block_processor: Arc<BlockProcessor>,
    network: Arc<Network>,
    stats: Arc<Stats>,
    shared: Mutex<Shared>,
    condition: Condvar,
    stopped: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BootstrapAscending {
    pub fn new(
        config: BootstrapAscendingConfig,
        ledger: Arc<Ledger>,
        block_processor: Arc<BlockProcessor>,
        network: Arc<Network>,
        stats: Arc<Stats>,
    ) -> Self {
        let accounts = AccountSets::new(AccountSetsConfig {
            priorities_max: config.priorities_max,
            blocking_max: config.blocking_max,
            cooldown: config.cooldown(),
            ..AccountSetsConfig::default()
        });
        Self {
            config,
            ledger,
            block_processor,
            network,
            stats,
            shared: Mutex::new(Shared {
                accounts,
                tags: HashMap::new(),
                per_channel: HashMap::new(),
                scan_cursor: Account::ZERO,
                frontier_cursor: Account::ZERO,
            }),
            condition: Condvar::new(),
            stopped: AtomicBool::new(false),
            thread: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        if !self.config.enable {
            return Ok(());
        }
        let service = Arc::clone(self);
        let handle = spawn_named("bootstrap asc", move || service.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        {
            let _guard = self.shared.lock().unwrap();
            self.condition.notify_all();
        }
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Ask for `account` soon.
    pub fn prioritize(&self, account: &Account) -> bool {
        let inserted = self.shared.lock().unwrap().accounts.priority_up(account) == PriorityUp::Inserted;
        self.condition.notify_all();
        inserted
    }

    pub fn priority(&self, account: &Account) -> Option<f64> {
        self.shared.lock().unwrap().accounts.priority(account)
    }

    pub fn blocked(&self, account: &Account) -> bool {
        self.shared.lock().unwrap().accounts.blocked(account)
    }

    pub fn in_flight(&self) -> usize {
        self.shared.lock().unwrap().tags.len()
    }

    fn run(&self) {
        tracing::debug!("ascending bootstrap started");
        let mut shared = self.shared.lock().unwrap();
        while !self.stopped() {
            self.expire_tags(&mut shared, Instant::now());
            let throttled = shared.tags.len() >= self.config.max_requests;
            drop(shared);

            let sent = !throttled
                && self.block_processor.size() < self.config.block_processor_threshold
                && self.run_one();

            shared = self.shared.lock().unwrap();
            if !sent && !self.stopped() {
                shared = self.condition.wait_timeout(shared, IDLE_WAIT).unwrap().0;
            }
        }
        tracing::debug!("ascending bootstrap stopped");
    }

    /// Send one request. Returns false if there was nothing to ask or no
    /// peer to ask.
    fn run_one(&self) -> bool {
        let Some(channel) = self.pick_channel() else {
            return false;
        };
        let now = Instant::now();
        let mut shared = self.shared.lock().unwrap();
        let mut kind = self.next_blocks_request(&mut shared, now);
        if kind.is_none() && self.config.enable_database_scan {
            self.database_scan(&mut shared);
            kind = self.next_blocks_request(&mut shared, now);
        }
        if kind.is_none() && !shared.tags.values().any(|t| matches!(t.kind, TagKind::Frontiers)) {
            kind = Some(TagKind::Frontiers);
        }
        let Some(kind) = kind else {
            return false;
        };

        let id = rand::random::<u64>();
        let payload = match kind {
            TagKind::Blocks { start, start_type, .. } => AscPullReqPayload::Blocks(BlocksReqPayload {
                start,
                count: self.config.max_pull_count.min(AscPullReq::MAX_BLOCKS),
                start_type,
            }),
            TagKind::Frontiers => AscPullReqPayload::Frontiers(FrontiersReqPayload {
                start: shared.frontier_cursor,
                count: AscPullReq::MAX_FRONTIERS,
            }),
        };
        let tag = Tag {
            kind,
            channel: channel.channel_id(),
            sent: now,
        };
        shared.tags.insert(id, tag);
        *shared.per_channel.entry(tag.channel).or_default() += 1;
        drop(shared);

        let request = Message::AscPullReq(AscPullReq { id, payload });
        if channel.send(&request, DropPolicy::CanDrop, TrafficType::Bootstrap) {
            self.stats
                .inc_dir(StatType::BootstrapAscending, DetailType::Request, Direction::Out);
        } else {
            let mut shared = self.shared.lock().unwrap();
            if let Some(tag) = shared.tags.remove(&id) {
                shared.release(&tag);
            }
        }
        true
    }

    fn pick_channel(&self) -> Option<Arc<dyn Channel>> {
        let shared = self.shared.lock().unwrap();
        let per_channel = shared.per_channel.clone();
        drop(shared);
        self.network
            .random_channels(usize::MAX)
            .into_iter()
            .find(|channel| {
                !channel.max(TrafficType::Bootstrap)
                    && per_channel.get(&channel.channel_id()).copied().unwrap_or(0)
                        < self.config.channel_limit
            })
    }

    fn next_blocks_request(&self, shared: &mut MutexGuard<Shared>, now: Instant) -> Option<TagKind> {
        let account = shared.accounts.next(now)?;
        shared.accounts.timestamp_set(&account, now);
        let txn = self.ledger.store.tx_begin_read();
        let kind = match self.ledger.latest(&txn, &account) {
            Some(head) => TagKind::Blocks {
                account,
                start: head.into(),
                start_type: HashType::Block,
            },
            None => TagKind::Blocks {
                account,
                start: account.into(),
                start_type: HashType::Account,
            },
        };
        Some(kind)
    }

    fn database_scan(&self, shared: &mut MutexGuard<Shared>) {
        let txn = self.ledger.store.tx_begin_read();
        let accounts: Vec<Account> = self
            .ledger
            .store
            .account
            .iter_from(&txn, &shared.scan_cursor)
            .take(SCAN_BATCH)
            .map(|(account, _)| account)
            .collect();
        shared.scan_cursor = match accounts.last() {
            Some(last) if accounts.len() == SCAN_BATCH => last.next(),
            _ => Account::ZERO,
        };
        let mut inserted = 0;
        for account in &accounts {
            if shared.accounts.priority_set(account) {
                inserted += 1;
            }
        }
        self.stats
            .add(StatType::BootstrapAscending, DetailType::DatabaseScan, inserted);
    }

    fn expire_tags(&self, shared: &mut Shared, now: Instant) {
        let timeout = self.config.request_timeout();
        let expired: Vec<u64> = shared
            .tags
            .iter()
            .filter(|(_, tag)| now.saturating_duration_since(tag.sent) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(tag) = shared.tags.remove(&id) {
                shared.release(&tag);
                self.stats.inc(StatType::BootstrapAscending, DetailType::Timeout);
            }
        }
    }

    /// Handle a reply to one of our requests.
    pub fn process(&self, ack: AscPullAck, channel: &Arc<dyn Channel>) {
        let tag = {
            let mut shared = self.shared.lock().unwrap();
            let Some(tag) = shared.tags.remove(&ack.id) else {
                drop(shared);
                self.stats
                    .inc(StatType::BootstrapAscending, DetailType::ResponseUnsolicited);
                tracing::trace!(id = ack.id, peer = %channel.remote_endpoint(), "unsolicited ascending reply");
                return;
            };
            shared.release(&tag);
            tag
        };
        self.condition.notify_all();
        self.stats
            .inc_dir(StatType::BootstrapAscending, DetailType::Reply, Direction::In);

        match (tag.kind, ack.payload) {
            (TagKind::Blocks { account, start, start_type }, AscPullAckPayload::Blocks(blocks)) => {
                self.process_blocks(account, start, start_type, blocks)
            }
            (TagKind::Frontiers, AscPullAckPayload::Frontiers(frontiers)) => {
                self.process_frontiers(frontiers)
            }
            _ => {
                self.stats.inc(StatType::BootstrapAscending, DetailType::Invalid);
            }
        }
    }

    fn process_blocks(&self, account: Account, start: HashOrAccount, start_type: HashType, blocks: Vec<Block>) {
        if blocks.is_empty() {
            self.deprioritize(&account);
            return;
        }
        if !Self::verify_chain(account, start, start_type, &blocks) {
            self.stats.inc(StatType::BootstrapAscending, DetailType::Invalid);
            tracing::debug!(%account, "ascending reply does not chain");
            return;
        }
        // Only our own head came back.
        if start_type == HashType::Block && blocks.len() == 1 {
            self.deprioritize(&account);
            return;
        }
        for block in blocks {
            self.block_processor.add(block, BlockSource::Bootstrap);
        }
        self.shared.lock().unwrap().accounts.timestamp_reset(&account);
    }

    fn verify_chain(account: Account, start: HashOrAccount, start_type: HashType, blocks: &[Block]) -> bool {
        let Some(first) = blocks.first() else {
            return true;
        };
        let first_ok = match start_type {
            HashType::Block => first.hash() == BlockHash::from(start),
            HashType::Account => {
                first.previous().is_zero()
                    && first.account_field().map_or(true, |a| a == account)
            }
        };
        first_ok
            && blocks
                .windows(2)
                .all(|pair| pair[1].previous() == pair[0].hash())
    }

    fn process_frontiers(&self, frontiers: Vec<(Account, BlockHash)>) {
        let ascending = frontiers.windows(2).all(|pair| pair[0].0 < pair[1].0);
        if !ascending {
            self.stats.inc(StatType::BootstrapAscending, DetailType::Invalid);
            return;
        }
        let txn = self.ledger.store.tx_begin_read();
        let outdated: Vec<Account> = frontiers
            .iter()
            .filter(|(_, frontier)| !self.ledger.block_or_pruned_exists(&txn, frontier))
            .map(|(account, _)| *account)
            .collect();
        drop(txn);
        let mut shared = self.shared.lock().unwrap();
        shared.frontier_cursor = match frontiers.last() {
            Some((last, _)) if frontiers.len() == AscPullReq::MAX_FRONTIERS as usize => last.next(),
            _ => Account::ZERO,
        };
        for account in &outdated {
            shared.accounts.priority_up(account);
        }
        drop(shared);
        self.stats.add(
            StatType::BootstrapAscending,
            DetailType::Prioritize,
            outdated.len() as u64,
        );
    }

    fn deprioritize(&self, account: &Account) {
        let result = self.shared.lock().unwrap().accounts.priority_down(account);
        if result != PriorityDown::NotFound {
            self.stats.inc(StatType::BootstrapAscending, DetailType::Deprioritize);
        }
    }

    /// Update account priorities from a processed batch.
    pub fn inspect(&self, batch: &[ProcessedBlock]) {
        let mut shared = self.shared.lock().unwrap();
        for processed in batch {
            match (processed.status, &processed.saved) {
                (BlockStatus::Progress, Some(saved)) => {
                    shared.accounts.priority_up(&saved.account());
                    if let Some(destination) = saved.destination() {
                        shared.accounts.priority_up(&destination);
                    }
                    let unblocked = shared.accounts.unblock_dependency(&saved.hash());
                    if !unblocked.is_empty() {
                        self.stats.add(
                            StatType::BootstrapAscending,
                            DetailType::Unblocked,
                            unblocked.len() as u64,
                        );
                    }
                }
                (BlockStatus::GapSource, _) if processed.source == BlockSource::Bootstrap => {
                    let Some(source) = processed.block.source_field().or_else(|| {
                        processed.block.link_field().map(BlockHash::from)
                    }) else {
                        continue;
                    };
                    let account = match processed.block.account_field() {
                        Some(account) => Some(account),
                        None => {
                            let txn = self.ledger.store.tx_begin_read();
                            self.ledger.account(&txn, &processed.block.previous())
                        }
                    };
                    if let Some(account) = account {
                        shared.accounts.block(account, source);
                        self.stats.inc(StatType::BootstrapAscending, DetailType::Blocking);
                    }
                }
                _ => {}
            }
        }
        drop(shared);
        self.condition.notify_all();
    }
}
