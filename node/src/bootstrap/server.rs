//! Answers bootstrap requests from other nodes.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use lattice_ledger::Ledger;
use lattice_messages::{
    AccountInfoAckPayload, AccountInfoReqPayload, AscPullAck, AscPullAckPayload, AscPullReq,
    AscPullReqPayload, BlocksReqPayload, BulkPull, BulkPullAccount, BulkPullAccountFlags,
    BulkPullAccountResp, BulkPullResp, BulkPush, FrontierReq, FrontierResp, FrontiersReqPayload,
    HashType, Message, PendingEntry,
};
use lattice_network::channel::message_detail;
use lattice_network::{Channel, DropPolicy, TrafficType};
use lattice_store::Transaction;
use lattice_types::{Account, Block, BlockHash, HashOrAccount};
use lattice_utils::{DetailType, Direction, StatType, Stats};

use crate::block_processor::{BlockProcessor, BlockSource};
use crate::error::spawn_named;
use crate::NodeError;

const MAX_QUEUE: usize = 1024;
/// Frontiers per streamed chunk.
const FRONTIER_CHUNK: usize = 256;
/// How long a reply waits for a congested channel.
const SEND_PATIENCE: Duration = Duration::from_secs(5);

struct Queue {
    stopped: bool,
    requests: VecDeque<(Message, Arc<dyn Channel>)>,
}

pub struct BootstrapServer {
    ledger: Arc<Ledger>,
    block_processor: Arc<BlockProcessor>,
    stats: Arc<Stats>,
    queue: Mutex<Queue>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BootstrapServer {
    pub fn new(ledger: Arc<Ledger>, block_processor: Arc<BlockProcessor>, stats: Arc<Stats>) -> Self {
        Self {
            ledger,
            block_processor,
            stats,
            queue: Mutex::new(Queue {
                stopped: false,
                requests: VecDeque::new(),
            }),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        let server = Arc::clone(self);
        let handle = spawn_named("bootstrap server", move || server.run())?;
        *self.thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn stop(&self) {
        self.queue.lock().unwrap().stopped = true;
        self.condition.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Queue a request. Returns false when the queue is full.
    pub fn request(&self, message: Message, channel: Arc<dyn Channel>) -> bool {
        let mut queue = self.queue.lock().unwrap();
        if queue.stopped || queue.requests.len() >= MAX_QUEUE {
            drop(queue);
            self.stats.inc(StatType::BootstrapServer, DetailType::Overfill);
            return false;
        }
        queue.requests.push_back((message, channel));
        drop(queue);
        self.condition.notify_one();
        true
    }

    fn run(&self) {
        let mut queue = self.queue.lock().unwrap();
        loop {
            queue = self
                .condition
                .wait_while(queue, |q| !q.stopped && q.requests.is_empty())
                .unwrap();
            if queue.stopped {
                return;
            }
            let Some((message, channel)) = queue.requests.pop_front() else {
                continue;
            };
            drop(queue);
            self.serve(message, &*channel);
            queue = self.queue.lock().unwrap();
        }
    }

    /// Answer one request on `channel`.
    pub fn serve(&self, message: Message, channel: &dyn Channel) {
        self.stats.inc_dir(
            StatType::BootstrapServer,
            message_detail(message.message_type()),
            Direction::In,
        );
        match message {
            Message::FrontierReq(req) => self.serve_frontiers(&req, channel),
            Message::BulkPull(req) => self.serve_bulk_pull(&req, channel),
            Message::BulkPullAccount(req) => self.serve_bulk_pull_account(&req, channel),
            Message::BulkPush(push) => self.accept_bulk_push(push),
            Message::AscPullReq(req) => self.serve_asc_pull(req, channel),
            other => {
                tracing::trace!(message = ?other.message_type(), "not a bootstrap request");
            }
        }
    }

    fn send(&self, channel: &dyn Channel, message: Message) -> bool {
        let deadline = Instant::now() + SEND_PATIENCE;
        while channel.max(TrafficType::Bootstrap) && channel.is_alive() {
            if Instant::now() >= deadline {
                tracing::debug!(peer = %channel.remote_endpoint(), "bootstrap reply dropped, channel saturated");
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let sent = channel.send(&message, DropPolicy::ShouldNotDrop, TrafficType::Bootstrap);
        if sent {
            self.stats.inc_dir(
                StatType::BootstrapServer,
                message_detail(message.message_type()),
                Direction::Out,
            );
        }
        sent
    }

    fn serve_frontiers(&self, req: &FrontierReq, channel: &dyn Channel) {
        let frontiers = self.frontiers(req);
        for chunk in frontiers.chunks(FRONTIER_CHUNK) {
            let message = Message::FrontierResp(FrontierResp {
                frontiers: chunk.to_vec(),
            });
            if !self.send(channel, message) {
                return;
            }
        }
        self.send(channel, Message::FrontierResp(FrontierResp::default()));
    }

    fn frontiers(&self, req: &FrontierReq) -> Vec<(Account, BlockHash)> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let limit = if req.count == 0 { usize::MAX } else { req.count as usize };
        let txn = self.ledger.store.tx_begin_read();
        let mut result = Vec::new();
        for (account, info) in self.ledger.store.account.iter_from(&txn, &req.start) {
            if result.len() >= limit {
                break;
            }
            if req.age != u32::MAX && now.saturating_sub(info.modified) > u64::from(req.age) {
                continue;
            }
            let frontier = if req.only_confirmed {
                let confirmed = self.ledger.confirmation_height(&txn, &account);
                if confirmed.height == 0 {
                    continue;
                }
                confirmed.frontier
            } else {
                info.head
            };
            result.push((account, frontier));
        }
        result
    }

    fn serve_bulk_pull(&self, req: &BulkPull, channel: &dyn Channel) {
        let blocks = self.bulk_pull_blocks(req);
        for chunk in blocks.chunks(BulkPullResp::MAX_BLOCKS) {
            let message = Message::BulkPullResp(BulkPullResp {
                blocks: chunk.to_vec(),
            });
            if !self.send(channel, message) {
                return;
            }
        }
        self.send(channel, Message::BulkPullResp(BulkPullResp::default()));
    }

    /// Resolve `start` as a block hash, falling back to the head of the
    /// account with the same bytes.
    fn resolve_start(&self, txn: &dyn Transaction, start: HashOrAccount) -> Option<BlockHash> {
        let hash = BlockHash::from(start);
        if self.ledger.block(txn, &hash).is_some() {
            return Some(hash);
        }
        self.ledger.latest(txn, &Account::from(start))
    }

    fn bulk_pull_blocks(&self, req: &BulkPull) -> Vec<Block> {
        let limit = if req.count == 0 { usize::MAX } else { req.count as usize };
        let txn = self.ledger.store.tx_begin_read();
        let Some(start) = self.resolve_start(&txn, req.start) else {
            return Vec::new();
        };
        let mut blocks = Vec::new();
        let mut current = start;
        while !current.is_zero() && blocks.len() < limit {
            if !req.ascending && current == req.end {
                break;
            }
            let Some(block) = self.ledger.block(&txn, &current) else {
                break;
            };
            let next = if req.ascending {
                block.successor()
            } else {
                block.previous()
            };
            blocks.push(block.block);
            if req.ascending && current == req.end {
                break;
            }
            current = next;
        }
        blocks
    }

    fn serve_bulk_pull_account(&self, req: &BulkPullAccount, channel: &dyn Channel) {
        let txn = self.ledger.store.tx_begin_read();
        let (frontier, balance) = self
            .ledger
            .account_info(&txn, &req.account)
            .map(|info| (info.head, info.balance))
            .unwrap_or_default();
        let mut sources = HashSet::new();
        let entries: Vec<PendingEntry> = self
            .ledger
            .store
            .pending
            .iter_account(&txn, &req.account)
            .filter(|(_, info)| info.amount >= req.minimum_amount)
            .filter_map(|(key, info)| match req.flags {
                BulkPullAccountFlags::PendingHashAndAmount => Some(PendingEntry {
                    hash: Some(key.send_block_hash),
                    amount: Some(info.amount),
                    source: None,
                }),
                BulkPullAccountFlags::PendingAddressOnly => {
                    sources.insert(info.source).then_some(PendingEntry {
                        hash: None,
                        amount: None,
                        source: Some(info.source),
                    })
                }
                BulkPullAccountFlags::PendingHashAmountAndAddress => Some(PendingEntry {
                    hash: Some(key.send_block_hash),
                    amount: Some(info.amount),
                    source: Some(info.source),
                }),
            })
            .collect();
        drop(txn);
        self.send(
            channel,
            Message::BulkPullAccountResp(BulkPullAccountResp {
                frontier,
                balance,
                entries,
            }),
        );
    }

    fn accept_bulk_push(&self, push: BulkPush) {
        for block in push.blocks {
            self.block_processor.add(block, BlockSource::BootstrapLegacy);
        }
    }

    fn serve_asc_pull(&self, req: AscPullReq, channel: &dyn Channel) {
        let payload = match req.payload {
            AscPullReqPayload::Blocks(payload) => AscPullAckPayload::Blocks(self.asc_blocks(&payload)),
            AscPullReqPayload::AccountInfo(payload) => {
                AscPullAckPayload::AccountInfo(self.asc_account_info(&payload))
            }
            AscPullReqPayload::Frontiers(payload) => {
                AscPullAckPayload::Frontiers(self.asc_frontiers(&payload))
            }
        };
        self.send(channel, Message::AscPullAck(AscPullAck { id: req.id, payload }));
    }

    fn asc_blocks(&self, payload: &BlocksReqPayload) -> Vec<Block> {
        let count = payload.count.min(AscPullReq::MAX_BLOCKS) as usize;
        let txn = self.ledger.store.tx_begin_read();
        let start = match payload.start_type {
            HashType::Block => {
                let hash = BlockHash::from(payload.start);
                self.ledger.block(&txn, &hash).map(|_| hash)
            }
            HashType::Account => self
                .ledger
                .account_info(&txn, &Account::from(payload.start))
                .map(|info| info.open_block),
        };
        let mut blocks = Vec::new();
        let mut current = start.unwrap_or_default();
        while !current.is_zero() && blocks.len() < count {
            let Some(block) = self.ledger.block(&txn, &current) else {
                break;
            };
            current = block.successor();
            blocks.push(block.block);
        }
        blocks
    }

    fn asc_account_info(&self, payload: &AccountInfoReqPayload) -> AccountInfoAckPayload {
        let txn = self.ledger.store.tx_begin_read();
        let account = match payload.target_type {
            HashType::Account => Some(Account::from(payload.target)),
            HashType::Block => self.ledger.account(&txn, &BlockHash::from(payload.target)),
        };
        let Some(account) = account else {
            return AccountInfoAckPayload::default();
        };
        let Some(info) = self.ledger.account_info(&txn, &account) else {
            return AccountInfoAckPayload {
                account,
                ..AccountInfoAckPayload::default()
            };
        };
        let confirmed = self.ledger.confirmation_height(&txn, &account);
        AccountInfoAckPayload {
            account,
            account_open: info.open_block,
            account_head: info.head,
            account_block_count: info.block_count,
            account_conf_frontier: confirmed.frontier,
            account_conf_height: confirmed.height,
        }
    }

    fn asc_frontiers(&self, payload: &FrontiersReqPayload) -> Vec<(Account, BlockHash)> {
        let count = payload.count.min(AscPullReq::MAX_FRONTIERS) as usize;
        let txn = self.ledger.store.tx_begin_read();
        self.ledger
            .store
            .account
            .iter_from(&txn, &payload.start)
            .take(count)
            .map(|(account, info)| (account, info.head))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_consensus::{OnlineReps, OnlineRepsConfig};
    use lattice_crypto::generate_keypair;
    use lattice_ledger::{LatticeBuilder, LedgerConstants};
    use lattice_nullables::NullChannel;
    use lattice_store::Store;
    use lattice_types::Amount;

    use crate::config::BlockProcessorConfig;
    use crate::gap_cache::GapCache;
    use crate::unchecked::UncheckedMap;

    struct Fixture {
        ledger: Arc<Ledger>,
        block_processor: Arc<BlockProcessor>,
        server: BootstrapServer,
        /// genesis send, then open by `account`.
        blocks: Vec<Block>,
        account: Account,
    }

    fn fixture() -> Fixture {
        let stats = Arc::new(Stats::new());
        let ledger = Arc::new(
            Ledger::new(Arc::new(Store::new_memory()), LedgerConstants::dev(), Arc::clone(&stats)).unwrap(),
        );
        let online_reps = Arc::new(OnlineReps::new(Arc::clone(&ledger), OnlineRepsConfig::dev()));
        let gap_cache = Arc::new(GapCache::new(Arc::clone(&ledger), online_reps, Arc::clone(&stats), 1));
        let block_processor = Arc::new(BlockProcessor::new(
            BlockProcessorConfig::default(),
            Arc::clone(&ledger),
            Arc::new(UncheckedMap::new(1024, Arc::clone(&stats))),
            gap_cache,
            Arc::clone(&stats),
        ));

        let mut builder = LatticeBuilder::new(&ledger.constants);
        let key = generate_keypair();
        let send1 = builder.genesis().send(key.account(), Amount::raw(10));
        let send2 = builder.genesis().send(key.account(), Amount::raw(20));
        let open = builder.account(&key).receive(&send1);
        let blocks = vec![send1, send2, open];
        let mut txn = ledger.store.tx_begin_write();
        for block in &blocks {
            ledger.process(&mut txn, block).unwrap();
        }
        txn.commit().unwrap();

        let server = BootstrapServer::new(Arc::clone(&ledger), Arc::clone(&block_processor), stats);
        Fixture {
            ledger,
            block_processor,
            server,
            blocks,
            account: key.account(),
        }
    }

    fn hashes(blocks: &[Block]) -> Vec<BlockHash> {
        blocks.iter().map(Block::hash).collect()
    }

    fn pulled(channel: &NullChannel) -> Vec<Vec<BlockHash>> {
        channel
            .take_sent()
            .into_iter()
            .map(|message| match message {
                Message::BulkPullResp(resp) => hashes(&resp.blocks),
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn bulk_pull_streams_newest_first_until_end() {
        let f = fixture();
        let channel = NullChannel::new(1);
        let genesis = f.ledger.constants.genesis_account;
        let genesis_open = f.ledger.constants.genesis.hash();

        f.server.serve(
            Message::BulkPull(BulkPull {
                start: genesis.into(),
                end: BlockHash::ZERO,
                count: 0,
                ascending: false,
            }),
            &*channel,
        );
        let chunks = pulled(&channel);
        assert_eq!(
            chunks,
            vec![
                vec![f.blocks[1].hash(), f.blocks[0].hash(), genesis_open],
                vec![]
            ]
        );

        f.server.serve(
            Message::BulkPull(BulkPull {
                start: f.blocks[1].hash().into(),
                end: f.blocks[0].hash(),
                count: 0,
                ascending: false,
            }),
            &*channel,
        );
        assert_eq!(pulled(&channel), vec![vec![f.blocks[1].hash()], vec![]]);
    }

    #[test]
    fn bulk_pull_of_unknown_start_is_just_the_end_marker() {
        let f = fixture();
        let channel = NullChannel::new(1);
        f.server.serve(
            Message::BulkPull(BulkPull {
                start: BlockHash::new([0x77; 32]).into(),
                end: BlockHash::ZERO,
                count: 0,
                ascending: false,
            }),
            &*channel,
        );
        assert_eq!(pulled(&channel), vec![Vec::<BlockHash>::new()]);
    }

    #[test]
    fn frontier_req_lists_every_account_then_ends() {
        let f = fixture();
        let channel = NullChannel::new(1);
        f.server.serve(
            Message::FrontierReq(FrontierReq::all_from(Account::ZERO, 0)),
            &*channel,
        );
        let sent = channel.take_sent();
        assert_eq!(sent.len(), 2);
        let Message::FrontierResp(resp) = &sent[0] else {
            panic!("expected frontiers");
        };
        let mut expected = vec![
            (f.ledger.constants.genesis_account, f.blocks[1].hash()),
            (f.account, f.blocks[2].hash()),
        ];
        expected.sort();
        assert_eq!(resp.frontiers, expected);
        assert_eq!(sent[1], Message::FrontierResp(FrontierResp::default()));
    }

    #[test]
    fn asc_pull_blocks_ascend_from_the_open_block() {
        let f = fixture();
        let channel = NullChannel::new(1);
        let genesis = f.ledger.constants.genesis_account;
        f.server.serve(
            Message::AscPullReq(AscPullReq {
                id: 7,
                payload: AscPullReqPayload::Blocks(BlocksReqPayload {
                    start: genesis.into(),
                    count: 2,
                    start_type: HashType::Account,
                }),
            }),
            &*channel,
        );
        let sent = channel.take_sent();
        let Some(Message::AscPullAck(ack)) = sent.first() else {
            panic!("expected asc_pull_ack");
        };
        assert_eq!(ack.id, 7);
        assert_eq!(
            ack.payload,
            AscPullAckPayload::Blocks(vec![f.ledger.constants.genesis.block.clone(), f.blocks[0].clone()])
        );
    }

    #[test]
    fn asc_pull_account_info_reports_head_and_count() {
        let f = fixture();
        let channel = NullChannel::new(1);
        f.server.serve(
            Message::AscPullReq(AscPullReq {
                id: 1,
                payload: AscPullReqPayload::AccountInfo(AccountInfoReqPayload {
                    target: f.blocks[2].hash().into(),
                    target_type: HashType::Block,
                }),
            }),
            &*channel,
        );
        let Some(Message::AscPullAck(ack)) = channel.take_sent().pop() else {
            panic!("expected asc_pull_ack");
        };
        let AscPullAckPayload::AccountInfo(info) = ack.payload else {
            panic!("expected account info");
        };
        assert_eq!(info.account, f.account);
        assert_eq!(info.account_head, f.blocks[2].hash());
        assert_eq!(info.account_block_count, 1);
        assert_eq!(info.account_conf_height, 0);
    }

    #[test]
    fn bulk_pull_account_filters_by_amount() {
        let f = fixture();
        let channel = NullChannel::new(1);
        f.server.serve(
            Message::BulkPullAccount(BulkPullAccount {
                account: f.account,
                minimum_amount: Amount::raw(15),
                flags: BulkPullAccountFlags::PendingHashAndAmount,
            }),
            &*channel,
        );
        let Some(Message::BulkPullAccountResp(resp)) = channel.take_sent().pop() else {
            panic!("expected bulk_pull_account reply");
        };
        assert_eq!(resp.frontier, f.blocks[2].hash());
        assert_eq!(
            resp.entries,
            vec![PendingEntry {
                hash: Some(f.blocks[1].hash()),
                amount: Some(Amount::raw(20)),
                source: None,
            }]
        );
    }

    #[test]
    fn bulk_push_feeds_the_block_processor() {
        let f = fixture();
        f.server.serve(
            Message::BulkPush(BulkPush {
                blocks: vec![f.blocks[0].clone()],
            }),
            &*NullChannel::new(1),
        );
        assert_eq!(f.block_processor.size(), 1);
    }
}
