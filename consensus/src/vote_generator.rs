//! Vote generation for the node's own representatives.
//!
//! Two generators run side by side: one signs normal votes for blocks whose
//! dependencies are confirmed, the other signs final votes and records them
//! in the `final_vote` table so the node never finalizes two blocks on one
//! root. Candidates are batched into votes of up to twelve hashes.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use lattice_crypto::sign_vote;
use lattice_ledger::{Ledger, Writer};
use lattice_messages::{ConfirmAck, Message};
use lattice_network::{Channel, DropPolicy, Network, TrafficType};
use lattice_store::{Transaction, WriteTransaction};
use lattice_types::{unix_millis, Account, Amount, Block, BlockHash, KeyPair, Root, Vote};
use lattice_utils::{Clock, DetailType, Direction, StatType, Stats};

use crate::error::{spawn_named, ConsensusError};
use crate::local_vote_history::LocalVoteHistory;
use crate::representative_register::RepresentativeRegister;
use crate::vote_spacing::VoteSpacing;

/// Duration bits carried by normal votes.
const VOTE_DURATION_BITS: u8 = 0x9;

/// Keys of the representatives this node votes for.
pub struct LocalRepresentatives {
    ledger: Arc<Ledger>,
    keys: RwLock<Vec<Arc<KeyPair>>>,
}

impl LocalRepresentatives {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            keys: RwLock::new(Vec::new()),
        }
    }

    pub fn insert(&self, key: Arc<KeyPair>) {
        let mut keys = self.keys.write().unwrap();
        if !keys.iter().any(|k| k.account() == key.account()) {
            tracing::info!(rep = %key.account(), "voting enabled");
            keys.push(key);
        }
    }

    /// Keys whose account currently holds voting weight.
    pub fn voting(&self) -> Vec<Arc<KeyPair>> {
        self.keys
            .read()
            .unwrap()
            .iter()
            .filter(|k| !self.ledger.weight(&k.account()).is_zero())
            .cloned()
            .collect()
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.keys.read().unwrap().iter().map(|k| k.account()).collect()
    }

    pub fn total_weight(&self) -> Amount {
        self.accounts().iter().map(|a| self.ledger.weight(a)).sum()
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type VoteObserver = Box<dyn Fn(&Arc<Vote>) + Send + Sync>;

#[derive(Default)]
struct Candidates {
    stopped: bool,
    queue: VecDeque<(Root, BlockHash)>,
}

pub struct VoteGenerator {
    is_final: bool,
    ledger: Arc<Ledger>,
    history: Arc<LocalVoteHistory>,
    representatives: Arc<RepresentativeRegister>,
    local_reps: Arc<LocalRepresentatives>,
    network: Arc<Network>,
    stats: Arc<Stats>,
    clock: Arc<dyn Clock>,
    spacing: Mutex<VoteSpacing>,
    /// How long to wait for a full batch before voting on a partial one.
    batch_delay: Duration,
    max_queue: usize,
    candidates: Mutex<Candidates>,
    condition: Condvar,
    observers: RwLock<Vec<VoteObserver>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl VoteGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        is_final: bool,
        ledger: Arc<Ledger>,
        history: Arc<LocalVoteHistory>,
        representatives: Arc<RepresentativeRegister>,
        local_reps: Arc<LocalRepresentatives>,
        network: Arc<Network>,
        stats: Arc<Stats>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let is_dev = network.constants.is_dev();
        let spacing_delay = if is_dev {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(15)
        };
        Self {
            is_final,
            ledger,
            history,
            representatives,
            local_reps,
            network,
            stats,
            clock,
            spacing: Mutex::new(VoteSpacing::new(spacing_delay)),
            batch_delay: if is_dev {
                Duration::from_millis(10)
            } else {
                Duration::from_millis(100)
            },
            max_queue: 32 * 1024,
            candidates: Mutex::new(Candidates::default()),
            condition: Condvar::new(),
            observers: RwLock::new(Vec::new()),
            thread: Mutex::new(None),
        }
    }

    pub fn is_final(&self) -> bool {
        self.is_final
    }

    /// Called for every vote this generator signs.
    pub fn on_vote(&self, f: impl Fn(&Arc<Vote>) + Send + Sync + 'static) {
        self.observers.write().unwrap().push(Box::new(f));
    }

    pub fn start(self: &Arc<Self>) -> Result<(), ConsensusError> {
        let generator = Arc::clone(self);
        let name = if self.is_final { "voting final" } else { "voting" };
        let handle = spawn_named(name, move || generator.run())?;
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

    /// Queue `hash` on `root` as a vote candidate.
    pub fn add(&self, root: &Root, hash: &BlockHash) {
        if self.local_reps.is_empty() {
            return;
        }
        {
            let mut candidates = self.candidates.lock().unwrap();
            if candidates.queue.len() >= self.max_queue {
                drop(candidates);
                self.stats.inc(StatType::VoteGenerator, DetailType::Overfill);
                return;
            }
            candidates.queue.push_back((*root, *hash));
        }
        self.condition.notify_all();
    }

    pub fn len(&self) -> usize {
        self.candidates.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn run(&self) {
        let mut candidates = self.candidates.lock().unwrap();
        loop {
            candidates = self
                .condition
                .wait_while(candidates, |c| !c.stopped && c.queue.is_empty())
                .unwrap();
            if candidates.stopped {
                return;
            }
            if candidates.queue.len() < Vote::MAX_HASHES {
                candidates = self
                    .condition
                    .wait_timeout_while(candidates, self.batch_delay, |c| {
                        !c.stopped && c.queue.len() < Vote::MAX_HASHES
                    })
                    .unwrap()
                    .0;
            }
            let batch: Vec<(Root, BlockHash)> = candidates.queue.drain(..).collect();
            drop(candidates);
            self.process(batch);
            candidates = self.candidates.lock().unwrap();
        }
    }

    /// Vote on and broadcast every candidate that passes the ledger and
    /// spacing checks.
    pub fn process(&self, batch: Vec<(Root, BlockHash)>) {
        let votable = self.filter_votable(batch);
        for chunk in votable.chunks(Vote::MAX_HASHES) {
            for vote in self.vote(chunk) {
                self.broadcast(&vote);
            }
        }
    }

    fn filter_votable(&self, batch: Vec<(Root, BlockHash)>) -> Vec<(Root, BlockHash)> {
        let checked: Vec<(Root, BlockHash)> = if self.is_final {
            let _guard = self.ledger.write_queue.wait(Writer::VotingFinal);
            let mut txn = self.ledger.store.tx_begin_write();
            let checked = batch
                .into_iter()
                .filter(|(root, hash)| self.should_vote_final(&mut txn, root, hash))
                .collect();
            if let Err(error) = txn.commit() {
                tracing::warn!(%error, "failed to commit final vote records");
            }
            checked
        } else {
            let txn = self.ledger.store.tx_begin_read();
            batch
                .into_iter()
                .filter(|(_, hash)| self.should_vote(&txn, hash))
                .collect()
        };
        let now = self.clock.now();
        let spacing = self.spacing.lock().unwrap();
        let mut seen_roots = HashSet::new();
        checked
            .into_iter()
            .filter(|(root, hash)| {
                if !seen_roots.insert(*root) {
                    return false;
                }
                let ok = spacing.votable(root, hash, now);
                if !ok {
                    self.stats.inc(StatType::VoteGenerator, DetailType::GeneratorSpacing);
                }
                ok
            })
            .collect()
    }

    /// Normal votes need the block's dependencies confirmed.
    fn should_vote(&self, txn: &dyn Transaction, hash: &BlockHash) -> bool {
        self.ledger
            .block(txn, hash)
            .is_some_and(|block| self.ledger.dependents_confirmed(txn, &block))
    }

    /// Final votes additionally claim the root in the `final_vote` table; a
    /// root already finalized for another hash refuses.
    fn should_vote_final(&self, txn: &mut WriteTransaction, root: &Root, hash: &BlockHash) -> bool {
        let Some(block) = self.ledger.block(&*txn, hash) else {
            return false;
        };
        debug_assert_eq!(block.block.root(), *root);
        if !self.ledger.dependents_confirmed(&*txn, &block) {
            return false;
        }
        let qualified_root = block.block.qualified_root();
        self.ledger.store.final_vote.put_final(txn, &qualified_root, hash)
    }

    /// Sign one vote per local representative over `pairs` and record it.
    fn vote(&self, pairs: &[(Root, BlockHash)]) -> Vec<Arc<Vote>> {
        if pairs.is_empty() {
            return Vec::new();
        }
        let hashes: Vec<BlockHash> = pairs.iter().map(|(_, h)| *h).collect();
        let now = self.clock.now();
        let mut votes = Vec::new();
        for key in self.local_reps.voting() {
            let unsigned = if self.is_final {
                Vote::new_final(key.account(), hashes.clone())
            } else {
                Vote::new(key.account(), unix_millis(), VOTE_DURATION_BITS, hashes.clone())
            };
            let mut vote = match unsigned {
                Ok(vote) => vote,
                Err(error) => {
                    tracing::warn!(%error, "vote construction failed");
                    continue;
                }
            };
            sign_vote(&mut vote, &key.private);
            let vote = Arc::new(vote);
            for (root, hash) in pairs {
                self.history.add(root, hash, Arc::clone(&vote));
            }
            votes.push(vote);
        }
        let mut spacing = self.spacing.lock().unwrap();
        for (root, hash) in pairs {
            spacing.flag(root, hash, now);
        }
        if self.is_final {
            self.stats.add(StatType::VoteGenerator, DetailType::FinalVotes, votes.len() as u64);
        }
        votes
    }

    /// Send to principal representatives directly and flood a random
    /// fanout of the remaining peers.
    fn broadcast(&self, vote: &Arc<Vote>) {
        let message = Message::ConfirmAck(ConfirmAck::new((**vote).clone()));
        let principals = self.representatives.principal_representatives(usize::MAX);
        let mut sent = HashSet::new();
        for rep in &principals {
            if sent.insert(rep.channel_id()) {
                rep.channel.send(&message, DropPolicy::CanDrop, TrafficType::Generic);
            }
        }
        for channel in self.network.random_fanout(1.0) {
            if sent.insert(channel.channel_id()) {
                channel.send(&message, DropPolicy::CanDrop, TrafficType::Generic);
            }
        }
        self.stats
            .inc_dir(StatType::VoteGenerator, DetailType::GeneratorBroadcasts, Direction::Out);
        self.notify(vote);
    }

    fn notify(&self, vote: &Arc<Vote>) {
        for observer in self.observers.read().unwrap().iter() {
            observer(vote);
        }
    }

    /// Vote on `blocks` and reply to `channel` only. Returns how many
    /// blocks were voted on.
    pub fn generate(&self, blocks: &[Block], channel: &Arc<dyn Channel>) -> usize {
        if self.local_reps.is_empty() {
            return 0;
        }
        let pairs: Vec<(Root, BlockHash)> = blocks.iter().map(|b| (b.root(), b.hash())).collect();
        let votable = self.filter_votable(pairs);
        for chunk in votable.chunks(Vote::MAX_HASHES) {
            for vote in self.vote(chunk) {
                let message = Message::ConfirmAck(ConfirmAck::new((*vote).clone()));
                channel.send(&message, DropPolicy::CanDrop, TrafficType::Generic);
                self.stats
                    .inc_dir(StatType::VoteGenerator, DetailType::GeneratorReplies, Direction::Out);
                self.notify(&vote);
            }
        }
        votable.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{consensus, ConsensusFixture};
    use lattice_crypto::validate_vote;
    use lattice_nullables::NullChannel;

    fn generator(fixture: &ConsensusFixture, is_final: bool) -> (Arc<VoteGenerator>, Arc<LocalVoteHistory>) {
        let history = Arc::new(LocalVoteHistory::new(1024));
        let local = Arc::new(LocalRepresentatives::new(Arc::clone(&fixture.ledger)));
        local.insert(Arc::clone(&fixture.reps[0]));
        let generator = Arc::new(VoteGenerator::new(
            is_final,
            Arc::clone(&fixture.ledger),
            Arc::clone(&history),
            Arc::clone(&fixture.register),
            local,
            Arc::clone(&fixture.network),
            Arc::clone(&fixture.stats),
            fixture.clock.clone(),
        ));
        (generator, history)
    }

    /// Cement the fixture chains and append an unconfirmed send from genesis.
    fn votable_send(fixture: &mut ConsensusFixture) -> Block {
        let send = fixture
            .builder
            .genesis()
            .send(Account::new([8; 32]), Amount::raw(1));
        let mut txn = fixture.ledger.store.tx_begin_write();
        let rep = fixture.reps[0].account();
        let open = fixture.ledger.latest(&txn, &rep).unwrap();
        fixture.ledger.confirm(&mut txn, open);
        fixture.ledger.process(&mut txn, &send).unwrap();
        txn.commit().unwrap();
        send
    }

    #[test]
    fn unconfirmed_dependencies_get_no_vote() {
        let mut fixture = consensus(&[700]);
        let (generator, history) = generator(&fixture, false);
        let send = fixture
            .builder
            .genesis()
            .send(Account::new([8; 32]), Amount::raw(1));
        {
            let mut txn = fixture.ledger.store.tx_begin_write();
            fixture.ledger.process(&mut txn, &send).unwrap();
            txn.commit().unwrap();
        }
        let null = NullChannel::new(2);
        let target: Arc<dyn Channel> = null.clone();
        assert_eq!(generator.generate(&[send.clone()], &target), 0);
        assert!(null.sent().is_empty());
        assert!(!history.exists(&send.root()));
    }

    #[test]
    fn replies_go_to_the_requesting_channel() {
        let mut fixture = consensus(&[700]);
        let (generator, history) = generator(&fixture, false);
        let send = votable_send(&mut fixture);
        let null = NullChannel::new(2);
        let target: Arc<dyn Channel> = null.clone();
        assert_eq!(generator.generate(&[send.clone()], &target), 1);
        let sent = null.take_sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Message::ConfirmAck(ack) => {
                assert_eq!(ack.vote.hashes, vec![send.hash()]);
                assert!(!ack.vote.is_final());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(history.votes(&send.root(), &send.hash(), false).len(), 1);
        // Spacing refuses an immediate second vote on the same root.
        assert_eq!(generator.generate(&[send], &target), 0);
    }

    #[test]
    fn spacing_blocks_second_vote_for_other_hash() {
        let fixture = consensus(&[700]);
        let (generator, _) = generator(&fixture, false);
        let root = Root::new([1; 32]);
        let now = fixture.clock.now();
        generator.spacing.lock().unwrap().flag(&root, &BlockHash::new([2; 32]), now);
        let spacing = generator.spacing.lock().unwrap();
        assert!(!spacing.votable(&root, &BlockHash::new([3; 32]), now));
    }

    #[test]
    fn final_votes_claim_the_root() {
        let mut fixture = consensus(&[700]);
        let (generator, history) = generator(&fixture, true);
        let send = votable_send(&mut fixture);
        let votes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&votes);
        generator.on_vote(move |vote| sink.lock().unwrap().push(Arc::clone(vote)));

        generator.process(vec![(send.root(), send.hash())]);
        let votes = votes.lock().unwrap().clone();
        assert_eq!(votes.len(), 1);
        assert!(votes[0].is_final());
        assert!(validate_vote(&votes[0]));
        assert_eq!(history.votes(&send.root(), &send.hash(), true).len(), 1);

        let txn = fixture.ledger.store.tx_begin_read();
        assert_eq!(
            fixture.ledger.store.final_vote.get(&txn, &send.qualified_root()),
            Some(send.hash())
        );
    }

    #[test]
    fn queued_candidates_are_voted_by_thread() {
        let mut fixture = consensus(&[700]);
        let (generator, history) = generator(&fixture, false);
        let send = votable_send(&mut fixture);
        generator.start().unwrap();
        generator.add(&send.root(), &send.hash());
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !history.exists(&send.root()) && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        generator.stop();
        assert_eq!(history.votes(&send.root(), &send.hash(), false).len(), 1);
        assert_eq!(
            fixture
                .stats
                .count(StatType::VoteGenerator, DetailType::GeneratorBroadcasts, Direction::Out),
            1
        );
    }
}
