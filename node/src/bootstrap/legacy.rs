//! Frontier-based bootstrap.
//!
//! Ask one peer for every account frontier, pull the chains where the
//! peer is ahead and push the chains where this node is ahead.

use std::sync::Arc;
use std::time::Duration;

use lattice_ledger::Ledger;
use lattice_messages::{BulkPullResp, BulkPush, FrontierReq, Message};
use lattice_store::Transaction;
use lattice_types::{Account, Block, BlockHash};
use lattice_utils::{DetailType, Direction, StatType, Stats};

use super::attempt::{AttemptState, BootstrapAttempt, BootstrapMode};
use super::client::{BootstrapClient, BootstrapConnections};
use super::pull::{execute_pulls, PullInfo};
use crate::block_processor::{BlockProcessor, BlockSource};
use crate::config::{BootstrapConfig, BootstrapConstants};

/// Accounts pushed to one peer per frontier round.
const MAX_PUSH_TARGETS: usize = 1024;
/// Blocks pushed per account chain.
const MAX_PUSH_BLOCKS: usize = 4096;

/// A chain the peer is missing: our head, and the peer's frontier (zero
/// if the peer lacks the account).
type PushTarget = (BlockHash, BlockHash);

pub struct LegacyAttempt {
    state: AttemptState,
    ledger: Arc<Ledger>,
    block_processor: Arc<BlockProcessor>,
    connections: Arc<BootstrapConnections>,
    config: BootstrapConfig,
    constants: BootstrapConstants,
    stats: Arc<Stats>,
}

impl LegacyAttempt {
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
        }
    }

    fn request_frontiers(&self) -> Option<Vec<PushTarget>> {
        for retry in 0..=self.constants.frontier_retry_limit {
            if self.stopped() {
                return None;
            }
            if retry > 0 {
                self.stats.inc(StatType::Bootstrap, DetailType::FrontierRetry);
                self.state.wait(Duration::from_millis(500));
            }
            let Some(client) = self.connections.connection() else {
                continue;
            };
            match self.frontier_exchange(&client) {
                Some(pushes) => {
                    self.connections.pool_connection(client);
                    return Some(pushes);
                }
                None => self.connections.discard(&client),
            }
        }
        tracing::debug!(id = self.id(), "frontier request failed");
        None
    }

    fn frontier_exchange(&self, client: &BootstrapClient) -> Option<Vec<PushTarget>> {
        let request = FrontierReq::all_from(Account::ZERO, self.config.frontier_request_count);
        if !client.send(&Message::FrontierReq(request)) {
            return None;
        }
        self.stats
            .inc_dir(StatType::Bootstrap, DetailType::FrontierReq, Direction::Out);

        let mut pulls = Vec::new();
        let mut pushes = Vec::new();
        let mut next_local = Account::ZERO;
        loop {
            if self.stopped() {
                return None;
            }
            match client.receive(self.config.io_timeout())? {
                Message::FrontierResp(resp) => {
                    if resp.is_end() {
                        break;
                    }
                    let txn = self.ledger.store.tx_begin_read();
                    for (account, frontier) in resp.frontiers {
                        self.local_only(&txn, next_local, Some(account), &mut pushes);
                        self.diff(&txn, account, frontier, &mut pulls, &mut pushes);
                        next_local = account.next();
                    }
                }
                other => {
                    tracing::trace!(message = ?other.message_type(), "unexpected message during frontier request");
                }
            }
        }
        {
            let txn = self.ledger.store.tx_begin_read();
            self.local_only(&txn, next_local, None, &mut pushes);
        }
        tracing::debug!(id = self.id(), pulls = pulls.len(), pushes = pushes.len(), "frontiers compared");
        for pull in pulls {
            self.connections.add_pull(pull);
        }
        Some(pushes)
    }

    fn diff(
        &self,
        txn: &dyn Transaction,
        account: Account,
        frontier: BlockHash,
        pulls: &mut Vec<PullInfo>,
        pushes: &mut Vec<PushTarget>,
    ) {
        let retry_limit = self.constants.legacy_requeued_pulls_limit;
        match self.ledger.latest(txn, &account) {
            None => pulls.push(PullInfo::new(
                account.into(),
                frontier,
                BlockHash::ZERO,
                0,
                self.id(),
                retry_limit,
            )),
            Some(local) if local == frontier => {}
            Some(local) => {
                if self.ledger.block_or_pruned_exists(txn, &frontier) {
                    if pushes.len() < MAX_PUSH_TARGETS {
                        pushes.push((local, frontier));
                    }
                } else {
                    pulls.push(PullInfo::new(
                        account.into(),
                        frontier,
                        local,
                        0,
                        self.id(),
                        retry_limit,
                    ));
                }
            }
        }
    }

    /// Local accounts in `[from, until)` the peer did not list.
    fn local_only(
        &self,
        txn: &dyn Transaction,
        from: Account,
        until: Option<Account>,
        pushes: &mut Vec<PushTarget>,
    ) {
        for (account, info) in self.ledger.store.account.iter_from(txn, &from) {
            if until.is_some_and(|until| account >= until) || pushes.len() >= MAX_PUSH_TARGETS {
                break;
            }
            pushes.push((info.head, BlockHash::ZERO));
        }
    }

    fn bulk_push(&self, targets: &[PushTarget]) {
        let Some(client) = self.connections.connection() else {
            return;
        };
        for (head, remote) in targets {
            if self.stopped() {
                break;
            }
            let blocks = self.chain_above(*head, *remote);
            for chunk in blocks.chunks(BulkPullResp::MAX_BLOCKS) {
                let message = Message::BulkPush(BulkPush {
                    blocks: chunk.to_vec(),
                });
                if !client.send(&message) {
                    self.connections.discard(&client);
                    return;
                }
                self.stats
                    .inc_dir(StatType::Bootstrap, DetailType::BulkPush, Direction::Out);
            }
        }
        self.connections.pool_connection(client);
    }

    /// Blocks from `head` back to `end` (exclusive), oldest first.
    fn chain_above(&self, head: BlockHash, end: BlockHash) -> Vec<Block> {
        let txn = self.ledger.store.tx_begin_read();
        let mut blocks = Vec::new();
        let mut current = head;
        while !current.is_zero() && current != end && blocks.len() < MAX_PUSH_BLOCKS {
            let Some(block) = self.ledger.block(&txn, &current) else {
                break;
            };
            current = block.previous();
            blocks.push(block.block);
        }
        blocks.reverse();
        blocks
    }

    fn pull_all(&self) {
        while !self.stopped() && self.connections.pulls_len(self.id()) > 0 {
            let round = execute_pulls(self, &self.connections, self.config.io_timeout(), &self.stats);
            if round.connection_failed && round.completed == 0 {
                self.state.wait(Duration::from_secs(1));
            }
        }
    }
}

impl BootstrapAttempt for LegacyAttempt {
    fn state(&self) -> &AttemptState {
        &self.state
    }

    fn mode(&self) -> BootstrapMode {
        BootstrapMode::Legacy
    }

    fn run(&self) {
        tracing::info!(id = self.id(), label = %self.state.label, "legacy bootstrap started");
        let mut rounds = 0;
        while !self.stopped() {
            let before = self.total_blocks();
            let Some(pushes) = self.request_frontiers() else {
                break;
            };
            self.pull_all();
            if !self.config.disable_bulk_push_client && !pushes.is_empty() {
                self.bulk_push(&pushes);
            }
            rounds += 1;
            if self.total_blocks() == before || rounds > self.constants.frontier_retry_limit {
                break;
            }
            self.stats.inc(StatType::Bootstrap, DetailType::FrontierRetry);
        }
        self.block_processor.flush();
        tracing::info!(
            id = self.id(),
            blocks = self.total_blocks(),
            elapsed_ms = self.state.started.elapsed().as_millis() as u64,
            "legacy bootstrap finished"
        );
    }

    fn process_block(&self, block: Block, _pull: &PullInfo) -> bool {
        while self.block_processor.half_full() && !self.stopped() {
            self.state.wait(Duration::from_millis(50));
        }
        self.block_processor.add(block, BlockSource::Bootstrap);
        self.state
            .total_blocks
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.stopped()
    }
}
