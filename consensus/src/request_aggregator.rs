//! Answers confirm_req messages from peers.
//!
//! Requests queue per channel and a worker replies with votes from the
//! local history when it has them. Blocks without a cached vote are handed
//! to the final generator when already confirmed or finalized, otherwise to
//! the normal one.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use lattice_ledger::Ledger;
use lattice_messages::{ConfirmAck, Message};
use lattice_network::{Channel, DropPolicy, TrafficType};
use lattice_types::{Block, BlockHash, Root, Vote};
use lattice_utils::{DetailType, Direction, StatType, Stats};

use crate::config::RequestAggregatorConfig;
use crate::error::{spawn_named, ConsensusError};
use crate::local_vote_history::LocalVoteHistory;
use crate::vote_generator::VoteGenerator;

type Request = (Arc<dyn Channel>, Vec<(BlockHash, Root)>);

#[derive(Default)]
struct Queue {
    stopped: bool,
    processing: bool,
    requests: VecDeque<Request>,
}

/// What a single request resolved to.
#[derive(Default, Debug, PartialEq, Eq)]
pub struct AggregateResult {
    pub cached_votes: usize,
    pub to_generate_final: Vec<BlockHash>,
    pub to_generate: Vec<BlockHash>,
    pub unknown: usize,
}

pub struct RequestAggregator {
    config: RequestAggregatorConfig,
    ledger: Arc<Ledger>,
    history: Arc<LocalVoteHistory>,
    generator: Arc<VoteGenerator>,
    final_generator: Arc<VoteGenerator>,
    stats: Arc<Stats>,
    queue: Mutex<Queue>,
    condition: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl RequestAggregator {
    pub fn new(
        config: RequestAggregatorConfig,
        ledger: Arc<Ledger>,
        history: Arc<LocalVoteHistory>,
        generator: Arc<VoteGenerator>,
        final_generator: Arc<VoteGenerator>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            config,
            ledger,
            history,
            generator,
            final_generator,
            stats,
            queue: Mutex::new(Queue::default()),
            condition: Condvar::new(),
            thread: Mutex::new(None),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        let aggregator = Arc::clone(self);
        let handle = spawn_named("request aggr", move || aggregator.run())?;
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

    /// Queue a confirm_req from `channel`. Duplicate pairs within the
    /// request are dropped. Returns false when the queue is full.
    pub fn request(&self, pairs: Vec<(BlockHash, Root)>, channel: Arc<dyn Channel>) -> bool {
        if pairs.is_empty() {
            return false;
        }
        let mut seen = HashSet::new();
        let pairs: Vec<(BlockHash, Root)> = pairs.into_iter().filter(|p| seen.insert(*p)).collect();
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.stopped || queue.requests.len() >= self.config.max_queue {
                drop(queue);
                self.stats.inc(StatType::RequestAggregator, DetailType::AggregatorDropped);
                return false;
            }
            queue.requests.push_back((channel, pairs));
        }
        self.stats.inc(StatType::RequestAggregator, DetailType::AggregatorAccepted);
        self.condition.notify_all();
        true
    }

    fn run(&self) {
        let mut queue = self.queue.lock().unwrap();
        loop {
            if queue.stopped {
                return;
            }
            if queue.requests.is_empty() {
                queue = self.condition.wait(queue).unwrap();
                continue;
            }
            let take = queue.requests.len().min(self.config.batch_size.max(1));
            let batch: Vec<Request> = queue.requests.drain(..take).collect();
            queue.processing = true;
            drop(queue);

            for (channel, pairs) in batch {
                // A full channel would drop the replies anyway.
                if channel.max(TrafficType::Generic) {
                    self.stats.inc(StatType::RequestAggregator, DetailType::Drop);
                    continue;
                }
                self.process(&pairs, &channel);
            }

            queue = self.queue.lock().unwrap();
            queue.processing = false;
            self.condition.notify_all();
        }
    }

    /// Answer one request immediately.
    pub fn process(&self, pairs: &[(BlockHash, Root)], channel: &Arc<dyn Channel>) -> AggregateResult {
        let (cached, result) = self.aggregate(pairs);
        for vote in &cached {
            let message = Message::ConfirmAck(ConfirmAck::new((**vote).clone()));
            channel.send(&message, DropPolicy::CanDrop, TrafficType::Generic);
        }
        let (final_blocks, blocks) = self.load_blocks(&result);
        if !final_blocks.is_empty() {
            self.final_generator.generate(&final_blocks, channel);
        }
        if !blocks.is_empty() {
            self.generator.generate(&blocks, channel);
        }
        self.stats.add(
            StatType::RequestAggregator,
            DetailType::RequestsCachedVotes,
            result.cached_votes as u64,
        );
        self.stats.add(
            StatType::RequestAggregator,
            DetailType::RequestsGeneratedVotes,
            (result.to_generate.len() + result.to_generate_final.len()) as u64,
        );
        self.stats
            .add(StatType::RequestAggregator, DetailType::RequestsUnknown, result.unknown as u64);
        self.stats.add_dir(
            StatType::RequestAggregator,
            DetailType::ConfirmAck,
            Direction::Out,
            cached.len() as u64,
        );
        result
    }

    /// Sort pairs into cached votes, final candidates, normal candidates and
    /// unknown hashes.
    fn aggregate(&self, pairs: &[(BlockHash, Root)]) -> (Vec<Arc<Vote>>, AggregateResult) {
        let txn = self.ledger.store.tx_begin_read();
        let mut result = AggregateResult::default();
        let mut cached: Vec<Arc<Vote>> = Vec::new();
        let mut sent_votes = HashSet::new();
        for (hash, root) in pairs {
            let votes = self.history.votes(root, hash, false);
            if !votes.is_empty() {
                result.cached_votes += 1;
                for vote in votes {
                    if sent_votes.insert(vote.hash()) {
                        cached.push(vote);
                    }
                }
                continue;
            }
            if !self.ledger.block_exists(&txn, hash) {
                result.unknown += 1;
                continue;
            }
            let finalized = self.ledger.store.final_vote.get_root(&txn, root).contains(hash);
            if finalized || self.ledger.block_confirmed(&txn, hash) {
                result.to_generate_final.push(*hash);
            } else {
                result.to_generate.push(*hash);
            }
        }
        (cached, result)
    }

    fn load_blocks(&self, result: &AggregateResult) -> (Vec<Block>, Vec<Block>) {
        let txn = self.ledger.store.tx_begin_read();
        let load = |hashes: &[BlockHash]| -> Vec<Block> {
            hashes
                .iter()
                .filter_map(|h| self.ledger.block(&txn, h))
                .map(|saved| saved.block)
                .collect()
        };
        (load(&result.to_generate_final), load(&result.to_generate))
    }

    /// Block until every queued request has been answered.
    pub fn flush(&self) {
        let queue = self.queue.lock().unwrap();
        let _guard = self
            .condition
            .wait_while(queue, |q| !q.stopped && (!q.requests.is_empty() || q.processing))
            .unwrap();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestAggregatorConfig;
    use crate::testing::{consensus, ConsensusFixture};
    use crate::vote_generator::LocalRepresentatives;
    use lattice_crypto::sign_vote;
    use lattice_nullables::NullChannel;
    use lattice_types::{Account, Amount};

    struct Harness {
        fixture: ConsensusFixture,
        history: Arc<LocalVoteHistory>,
        aggregator: Arc<RequestAggregator>,
    }

    fn harness(weights: &[u128], max_queue: usize) -> Harness {
        let fixture = consensus(weights);
        let history = Arc::new(LocalVoteHistory::new(1024));
        let local = Arc::new(LocalRepresentatives::new(Arc::clone(&fixture.ledger)));
        if let Some(key) = fixture.reps.first() {
            local.insert(Arc::clone(key));
        }
        let generator = |is_final| {
            Arc::new(VoteGenerator::new(
                is_final,
                Arc::clone(&fixture.ledger),
                Arc::clone(&history),
                Arc::clone(&fixture.register),
                Arc::clone(&local),
                Arc::clone(&fixture.network),
                Arc::clone(&fixture.stats),
                fixture.clock.clone(),
            ))
        };
        let normal = generator(false);
        let final_generator = generator(true);
        let aggregator = Arc::new(RequestAggregator::new(
            RequestAggregatorConfig {
                max_queue,
                batch_size: 4,
            },
            Arc::clone(&fixture.ledger),
            Arc::clone(&history),
            normal,
            final_generator,
            Arc::clone(&fixture.stats),
        ));
        Harness {
            fixture,
            history,
            aggregator,
        }
    }

    fn channel(id: usize) -> (Arc<NullChannel>, Arc<dyn Channel>) {
        let null = NullChannel::new(id);
        let channel: Arc<dyn Channel> = null.clone();
        (null, channel)
    }

    #[test]
    fn queue_is_bounded() {
        let h = harness(&[], 2);
        let (_, c) = channel(1);
        let pair = vec![(BlockHash::new([1; 32]), Root::new([1; 32]))];
        assert!(h.aggregator.request(pair.clone(), Arc::clone(&c)));
        assert!(h.aggregator.request(pair.clone(), Arc::clone(&c)));
        assert!(!h.aggregator.request(pair, c));
        assert_eq!(
            h.fixture
                .stats
                .count(StatType::RequestAggregator, DetailType::AggregatorDropped, Direction::In),
            1
        );
    }

    #[test]
    fn cached_votes_are_replayed() {
        let h = harness(&[700], 128);
        let key = &h.fixture.reps[0];
        let hash = BlockHash::new([4; 32]);
        let root = Root::new([5; 32]);
        let mut vote = Vote::new_final(key.account(), vec![hash]).unwrap();
        sign_vote(&mut vote, &key.private);
        h.history.add(&root, &hash, Arc::new(vote));

        let (null, c) = channel(1);
        let result = h.aggregator.process(&[(hash, root), (hash, root)], &c);
        assert_eq!(result.cached_votes, 2);
        // The same vote is sent once.
        assert_eq!(null.take_sent().len(), 1);
    }

    #[test]
    fn unknown_hashes_are_counted() {
        let h = harness(&[700], 128);
        let (null, c) = channel(1);
        let result = h
            .aggregator
            .process(&[(BlockHash::new([9; 32]), Root::new([9; 32]))], &c);
        assert_eq!(result.unknown, 1);
        assert!(null.sent().is_empty());
        assert_eq!(
            h.fixture
                .stats
                .count(StatType::RequestAggregator, DetailType::RequestsUnknown, Direction::In),
            1
        );
    }

    #[test]
    fn confirmed_blocks_get_final_votes() {
        let mut h = harness(&[700], 128);
        let send = h
            .fixture
            .builder
            .genesis()
            .send(Account::new([8; 32]), Amount::raw(1));
        {
            let ledger = &h.fixture.ledger;
            let mut txn = ledger.store.tx_begin_write();
            ledger.process(&mut txn, &send).unwrap();
            ledger.confirm(&mut txn, send.hash());
            txn.commit().unwrap();
        }
        let (null, c) = channel(1);
        h.aggregator.start().unwrap();
        assert!(h.aggregator.request(vec![(send.hash(), send.root())], c));
        h.aggregator.flush();
        h.aggregator.stop();

        let sent = null.take_sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Message::ConfirmAck(ack) => assert!(ack.vote.is_final()),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(h.history.votes(&send.root(), &send.hash(), true).len(), 1);
    }

    #[test]
    fn unconfirmed_blocks_with_unconfirmed_dependencies_get_nothing() {
        let h = harness(&[700], 128);
        let txn = h.fixture.ledger.store.tx_begin_read();
        let open = h
            .fixture
            .ledger
            .latest(&txn, &h.fixture.reps[0].account())
            .unwrap();
        let root = h.fixture.ledger.block(&txn, &open).unwrap().block.root();
        drop(txn);
        let (null, c) = channel(1);
        let result = h.aggregator.process(&[(open, root)], &c);
        assert_eq!(result.to_generate, vec![open]);
        assert!(null.sent().is_empty());
    }
}
